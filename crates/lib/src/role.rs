//! Execution roles for stage projects.
//!
//! Two kinds exist side by side:
//! - [`RoleDescriptor`]: declared and owned by this stack, with an inline policy.
//! - [`ExistingRole`]: a pre-existing role referenced by name only.
//!
//! Nothing here can check what an existing role is allowed to do. It must
//! already carry cluster-admin-equivalent permissions and be registered in the
//! cluster's identity mapping; a bad reference surfaces only when the stage
//! that assumes it runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consts::{LOG_ACTIONS, REGISTRY_ALL_ACTIONS, REGISTRY_TOKEN_ACTION};
use crate::placeholder::{AttrRef, Attribute};
use crate::policy::{PolicyDocument, PolicyStatement, Principal, Scope};
use crate::registry::RegistryDescriptor;

/// Name of the inline policy attached to the build role.
pub const BUILD_POLICY_NAME: &str = "buildPolicy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
  pub name: String,
  pub assumed_by: Principal,
  pub inline_policies: BTreeMap<String, PolicyDocument>,
}

impl RoleDescriptor {
  pub fn declare(name: impl Into<String>, assumed_by: Principal) -> Self {
    Self {
      name: name.into(),
      assumed_by,
      inline_policies: BTreeMap::new(),
    }
  }

  pub fn with_inline_policy(mut self, name: impl Into<String>, document: PolicyDocument) -> Self {
    self.inline_policies.insert(name.into(), document);
    self
  }

  /// The build role: assumed by `assumed_by`, with exactly three statements.
  ///
  /// 1. Full registry control, scoped to `registry` only.
  /// 2. The registry login token action, scoped to `*`. The provisioning API
  ///    rejects any narrower scope for this action, so this is the one
  ///    deliberate exception to least privilege.
  /// 3. Log group/stream creation and writes, scoped to `*` since log sinks
  ///    are created by the executor at run time.
  pub fn for_build(name: impl Into<String>, assumed_by: Principal, registry: &RegistryDescriptor) -> Self {
    let document = PolicyDocument::new(vec![
      PolicyStatement::allow([REGISTRY_ALL_ACTIONS], Scope::Resource(registry.arn())),
      PolicyStatement::allow([REGISTRY_TOKEN_ACTION], Scope::Global),
      PolicyStatement::allow(LOG_ACTIONS, Scope::Global),
    ]);

    Self::declare(name, assumed_by).with_inline_policy(BUILD_POLICY_NAME, document)
  }

  pub fn arn(&self) -> AttrRef {
    AttrRef::new(&self.name, Attribute::Arn)
  }

  /// Logical names of the descriptors this role's policies point at.
  pub fn referenced_resources(&self) -> Vec<&str> {
    self
      .inline_policies
      .values()
      .flat_map(|doc| doc.statements.iter())
      .filter_map(|statement| match &statement.scope {
        Scope::Resource(r) => Some(r.resource.as_str()),
        Scope::Attached | Scope::Global => None,
      })
      .collect()
  }
}

/// A role that already exists outside this stack.
///
/// An opaque capability: the stack neither creates nor inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingRole {
  /// Logical name within the stack.
  pub name: String,
  /// Physical role name the engine looks up.
  pub role_name: String,
}

impl ExistingRole {
  pub fn from_role_name(name: impl Into<String>, role_name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      role_name: role_name.into(),
    }
  }
}

/// How a project names the role it runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleRef {
  Declared(String),
  Existing(String),
}

impl RoleRef {
  /// Logical name of the role descriptor.
  pub fn name(&self) -> &str {
    match self {
      RoleRef::Declared(name) | RoleRef::Existing(name) => name,
    }
  }
}

impl From<&RoleDescriptor> for RoleRef {
  fn from(role: &RoleDescriptor) -> Self {
    RoleRef::Declared(role.name.clone())
  }
}

impl From<&ExistingRole> for RoleRef {
  fn from(role: &ExistingRole) -> Self {
    RoleRef::Existing(role.name.clone())
  }
}
