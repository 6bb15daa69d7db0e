//! Permission grants: who may do what, on which resources.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::placeholder::AttrRef;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
  #[error("action '{0}' is not a read-only pull action")]
  ForbiddenAction(String),

  #[error("grant must name at least one action")]
  NoActions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
  Allow,
  Deny,
}

/// An identity permissions are granted to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
  /// A managed service, e.g. the build executor.
  Service(String),
}

impl Principal {
  pub fn service(name: impl Into<String>) -> Self {
    Principal::Service(name.into())
  }
}

/// The resources a statement applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
  /// The resource the policy is attached to (resource policies).
  Attached,
  /// One specific declared resource.
  Resource(AttrRef),
  /// Every resource (`*`).
  Global,
}

/// One grant: principals, an action set, and a resource scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
  pub effect: Effect,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub principals: Vec<Principal>,
  pub actions: BTreeSet<String>,
  pub scope: Scope,
}

impl PolicyStatement {
  pub fn allow<I, S>(actions: I, scope: Scope) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      effect: Effect::Allow,
      principals: Vec::new(),
      actions: actions.into_iter().map(Into::into).collect(),
      scope,
    }
  }

  pub fn with_principal(mut self, principal: Principal) -> Self {
    self.principals.push(principal);
    self
  }

  pub fn is_global(&self) -> bool {
    matches!(self.scope, Scope::Global)
  }

  /// Whether this statement allows `action`, honoring trailing `*` wildcards.
  pub fn allows(&self, action: &str) -> bool {
    self.effect == Effect::Allow
      && self.actions.iter().any(|granted| match granted.strip_suffix('*') {
        Some(prefix) => action.starts_with(prefix),
        None => granted == action,
      })
  }
}

/// An inline policy: an ordered list of statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
  pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
  pub fn new(statements: Vec<PolicyStatement>) -> Self {
    Self { statements }
  }

  pub fn allows(&self, action: &str) -> bool {
    self.statements.iter().any(|s| s.allows(action))
  }
}
