//! shiplane-lib: declarative build/deploy pipeline composition
//!
//! This crate describes one application's delivery infrastructure as a graph
//! of descriptors and compiles it into a manifest for a provisioning engine:
//! - `RegistryDescriptor`: the container image registry and its pull grants
//! - `RoleDescriptor` / `ExistingRole`: identities stage projects run as
//! - `ProjectDescriptor`: what a pipeline action runs, where, and as whom
//! - `Pipeline`: the Source → Build → Deploy stage sequence
//! - `Stack`: the composed graph, synthesized into a `Manifest`

pub mod buildspec;
pub mod config;
pub mod consts;
pub mod engine;
pub mod manifest;
pub mod pipeline;
pub mod placeholder;
pub mod policy;
pub mod project;
pub mod registry;
pub mod role;
pub mod stack;
pub mod util;
