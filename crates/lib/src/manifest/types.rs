//! Manifest types.
//!
//! # Structure
//!
//! - `stack`: the stack's logical name
//! - `resources`: one [`ManifestEntry`] per descriptor, keyed by logical name
//!
//! # Identity
//!
//! The engine correlates desired and recorded state by logical name. Each
//! entry's `hash` covers its kind, dependencies and properties, so a changed
//! hash under an unchanged name is an update rather than a replacement.
//!
//! # Ordering
//!
//! [`BTreeMap`] keeps serialization deterministic, so the manifest hash only
//! changes when content does.
//!
//! # Example
//!
//! ```json
//! {
//!   "stack": "AppInfrastructureStack",
//!   "resources": {
//!     "AppRepository": {
//!       "kind": "registry",
//!       "hash": "a1b2c3d4e5f6789012ab",
//!       "depends_on": [],
//!       "properties": { "tag_mutability": "IMMUTABLE", ... }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::{HashError, Hashable, ObjectHash};

#[derive(Debug, Error)]
pub enum SynthError {
  #[error("failed to serialize descriptor '{name}': {source}")]
  Serialize {
    name: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to hash manifest: {0}")]
  Hash(#[from] HashError),
}

/// The kinds of descriptor a stack can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
  Registry,
  Role,
  RoleReference,
  Project,
  Pipeline,
}

impl DescriptorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      DescriptorKind::Registry => "registry",
      DescriptorKind::Role => "role",
      DescriptorKind::RoleReference => "role_reference",
      DescriptorKind::Project => "project",
      DescriptorKind::Pipeline => "pipeline",
    }
  }
}

impl std::fmt::Display for DescriptorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
  pub kind: DescriptorKind,
  pub hash: ObjectHash,
  /// Logical names this entry must be applied after.
  pub depends_on: Vec<String>,
  pub properties: serde_json::Value,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub stack: String,
  pub resources: BTreeMap<String, ManifestEntry>,
}

impl Hashable for Manifest {}

impl Manifest {
  pub fn count(&self, kind: DescriptorKind) -> usize {
    self.resources.values().filter(|e| e.kind == kind).count()
  }

  /// Descriptor counts by kind, for summaries.
  pub fn counts(&self) -> BTreeMap<DescriptorKind, usize> {
    let mut counts = BTreeMap::new();
    for entry in self.resources.values() {
      *counts.entry(entry.kind).or_insert(0) += 1;
    }
    counts
  }
}
