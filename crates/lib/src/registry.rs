//! Container image repository descriptor.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::PULL_ACTIONS;
use crate::placeholder::{AttrRef, Attribute};
use crate::policy::{PolicyError, PolicyStatement, Principal, Scope};

/// Whether an image tag may be pushed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagMutability {
  Mutable,
  /// Production-safe: a pushed tag can never be silently overwritten.
  Immutable,
}

/// What happens to stored images when the descriptor is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
  /// Keep the repository and its images.
  Retain,
  /// Delete the repository, force-deleting any images. Eases teardown of test
  /// environments; not a production default.
  Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDescriptor {
  pub name: String,
  pub tag_mutability: TagMutability,
  pub cleanup: CleanupPolicy,
  pub resource_policy: Vec<PolicyStatement>,
}

impl RegistryDescriptor {
  pub fn declare(name: impl Into<String>, tag_mutability: TagMutability, cleanup: CleanupPolicy) -> Self {
    Self {
      name: name.into(),
      tag_mutability,
      cleanup,
      resource_policy: Vec::new(),
    }
  }

  /// Allow `principal` to pull images.
  ///
  /// Only the read actions in [`PULL_ACTIONS`] are accepted; anything that
  /// could push or delete is rejected.
  pub fn grant_pull(mut self, principal: Principal, actions: &[&str]) -> Result<Self, PolicyError> {
    if actions.is_empty() {
      return Err(PolicyError::NoActions);
    }
    if let Some(forbidden) = actions.iter().find(|a| !PULL_ACTIONS.contains(*a)) {
      return Err(PolicyError::ForbiddenAction(forbidden.to_string()));
    }

    debug!(registry = %self.name, ?principal, "granting pull access");
    self
      .resource_policy
      .push(PolicyStatement::allow(actions.iter().copied(), Scope::Attached).with_principal(principal));
    Ok(self)
  }

  pub fn arn(&self) -> AttrRef {
    AttrRef::new(&self.name, Attribute::Arn)
  }

  pub fn repository_uri(&self) -> AttrRef {
    AttrRef::new(&self.name, Attribute::RepositoryUri)
  }

  /// Every principal named by the resource policy.
  pub fn principals(&self) -> Vec<&Principal> {
    self.resource_policy.iter().flat_map(|s| s.principals.iter()).collect()
  }
}
