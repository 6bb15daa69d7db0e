//! Stage project descriptors: what a pipeline action runs, where, and as whom.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::buildspec::{BuildSpec, ScriptError, ScriptSource};
use crate::consts::BUILD_IMAGE;
use crate::placeholder::{AttrRef, Placeholder, Resolver, Segment, VariableRef, substitute_segments};
use crate::role::RoleRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeType {
  Small,
  Medium,
  Large,
}

/// The build container a project runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeProfile {
  pub image: String,
  pub compute_type: ComputeType,
  /// Needed to run a container daemon inside the build.
  pub privileged: bool,
}

impl Default for ComputeProfile {
  fn default() -> Self {
    Self {
      image: BUILD_IMAGE.to_string(),
      compute_type: ComputeType::Small,
      privileged: true,
    }
  }
}

/// A project environment value.
///
/// References are kept as references: if the referenced descriptor changes,
/// the value changes with it on the next composition. Literals are opaque;
/// token-shaped text inside one is never treated as a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvValue {
  Literal(String),
  Attribute(AttrRef),
  Variable(VariableRef),
}

impl EnvValue {
  pub fn literal(value: impl Into<String>) -> Self {
    EnvValue::Literal(value.into())
  }

  /// The value as the engine sees it: literal text or a reference token.
  pub fn render(&self) -> String {
    match self {
      EnvValue::Literal(s) => s.clone(),
      EnvValue::Attribute(r) => r.token(),
      EnvValue::Variable(r) => r.token(),
    }
  }

  /// The reference this value carries, if any.
  pub fn reference(&self) -> Option<Placeholder> {
    match self {
      EnvValue::Literal(_) => None,
      EnvValue::Attribute(r) => Some(Placeholder::Attribute(r.clone())),
      EnvValue::Variable(r) => Some(Placeholder::Variable(r.clone())),
    }
  }

  /// The value the executor sees. An unresolved reference becomes empty.
  pub fn resolve(&self, resolver: &impl Resolver) -> String {
    match self {
      EnvValue::Literal(s) => s.clone(),
      EnvValue::Attribute(_) | EnvValue::Variable(_) => {
        let segments: Vec<Segment> = self.reference().map(Segment::Placeholder).into_iter().collect();
        substitute_segments(&segments, resolver)
      }
    }
  }
}

impl From<AttrRef> for EnvValue {
  fn from(reference: AttrRef) -> Self {
    EnvValue::Attribute(reference)
  }
}

impl From<VariableRef> for EnvValue {
  fn from(reference: VariableRef) -> Self {
    EnvValue::Variable(reference)
  }
}

pub type EnvironmentVariables = BTreeMap<String, EnvValue>;

/// Descriptor names referenced by attribute values in `env`.
pub fn attribute_dependencies(env: &EnvironmentVariables) -> BTreeSet<String> {
  env
    .values()
    .filter_map(|value| match value.reference() {
      Some(Placeholder::Attribute(r)) => Some(r.resource),
      _ => None,
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
  pub name: String,
  pub script: ScriptSource,
  pub compute: ComputeProfile,
  pub role: RoleRef,
  pub environment: EnvironmentVariables,
}

impl ProjectDescriptor {
  pub fn declare(
    name: impl Into<String>,
    script: ScriptSource,
    compute: ComputeProfile,
    role: RoleRef,
    environment: EnvironmentVariables,
  ) -> Self {
    Self {
      name: name.into(),
      script,
      compute,
      role,
      environment,
    }
  }

  pub fn validate(&self) -> Result<(), ScriptError> {
    self.script.validate()
  }

  pub fn inline_script(&self) -> Option<&BuildSpec> {
    match &self.script {
      ScriptSource::Inline(spec) => Some(spec),
      ScriptSource::File(_) => None,
    }
  }

  /// Logical names of every descriptor this project depends on.
  pub fn dependencies(&self) -> BTreeSet<String> {
    let mut deps = attribute_dependencies(&self.environment);
    deps.insert(self.role.name().to_string());
    deps
  }
}
