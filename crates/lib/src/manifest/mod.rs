//! The synthesized stack: the single unit handed to the provisioning engine.
//!
//! A manifest is produced by [`crate::stack::Stack::synthesize`] and contains
//! every descriptor keyed by logical name, ready for the engine to diff
//! against whatever it recorded on the previous run.

mod diff;
mod types;

pub use diff::*;
pub use types::*;
