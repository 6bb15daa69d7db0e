//! Stack composition.
//!
//! Descriptors are added one at a time in dependency order: registry and
//! roles, then projects, then the pipeline. A descriptor may only reference
//! descriptors added before it, so the construction order is always a valid
//! topological order of the dependency graph; the engine relies on that
//! order to infer dependencies it cannot see.
//!
//! Every check here runs before anything is handed to the engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::buildspec::{ScriptError, ScriptSource, deploy_script};
use crate::config::Config;
use crate::consts::{
  BUILD_SCRIPT_FILE, BUILD_SERVICE_PRINCIPAL, BUILD_VARIABLES_NAMESPACE, BUILD_VERSION_VAR, PULL_ACTIONS, STACK_NAME,
};
use crate::manifest::{DescriptorKind, Manifest, ManifestEntry, SynthError};
use crate::pipeline::{Action, Artifact, Pipeline, PipelineError, SecretRef, StageKind};
use crate::placeholder::VariableRef;
use crate::policy::{PolicyError, Principal};
use crate::project::{ComputeProfile, EnvValue, EnvironmentVariables, ProjectDescriptor};
use crate::registry::{CleanupPolicy, RegistryDescriptor, TagMutability};
use crate::role::{ExistingRole, RoleDescriptor, RoleRef};
use crate::util::hash::Hashable;

pub const REGISTRY_NAME: &str = "AppRepository";
pub const BUILD_ROLE_NAME: &str = "BuildProjectRole";
pub const DEPLOY_ROLE_NAME: &str = "DeployProjectRole";
pub const BUILD_PROJECT_NAME: &str = "BuildProject";
pub const DEPLOY_PROJECT_NAME: &str = "DeployProject";
pub const PIPELINE_NAME: &str = "BuildPipeline";
pub const SOURCE_ARTIFACT_NAME: &str = "SourceOutput";

#[derive(Debug, Error)]
pub enum ComposeError {
  #[error("duplicate descriptor name '{0}'")]
  DuplicateName(String),

  #[error("'{descriptor}' depends on '{dependency}', which has not been declared yet")]
  UndeclaredDependency { descriptor: String, dependency: String },

  #[error("'{descriptor}' expects '{dependency}' to be a {expected}, found {found}")]
  KindMismatch {
    descriptor: String,
    dependency: String,
    expected: DescriptorKind,
    found: DescriptorKind,
  },

  #[error("invalid script in '{descriptor}': {source}")]
  Script {
    descriptor: String,
    #[source]
    source: ScriptError,
  },

  #[error("dependency cycle detected")]
  CycleDetected,

  #[error(transparent)]
  Policy(#[from] PolicyError),

  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

/// One declared resource.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Descriptor {
  Registry(RegistryDescriptor),
  Role(RoleDescriptor),
  RoleReference(ExistingRole),
  Project(ProjectDescriptor),
  Pipeline(Pipeline),
}

impl Descriptor {
  pub fn name(&self) -> &str {
    match self {
      Descriptor::Registry(d) => &d.name,
      Descriptor::Role(d) => &d.name,
      Descriptor::RoleReference(d) => &d.name,
      Descriptor::Project(d) => &d.name,
      Descriptor::Pipeline(d) => &d.name,
    }
  }

  pub fn kind(&self) -> DescriptorKind {
    match self {
      Descriptor::Registry(_) => DescriptorKind::Registry,
      Descriptor::Role(_) => DescriptorKind::Role,
      Descriptor::RoleReference(_) => DescriptorKind::RoleReference,
      Descriptor::Project(_) => DescriptorKind::Project,
      Descriptor::Pipeline(_) => DescriptorKind::Pipeline,
    }
  }

  /// Logical names this descriptor references, each paired with the kind it
  /// must have (`None` when any kind will do).
  fn dependencies(&self) -> BTreeMap<String, Option<DescriptorKind>> {
    let mut deps = BTreeMap::new();
    match self {
      Descriptor::Registry(_) | Descriptor::RoleReference(_) => {}
      Descriptor::Role(role) => {
        for name in role.referenced_resources() {
          deps.insert(name.to_string(), None);
        }
      }
      Descriptor::Project(project) => {
        for name in project.dependencies() {
          deps.insert(name, None);
        }
        let expected = match project.role {
          RoleRef::Declared(_) => DescriptorKind::Role,
          RoleRef::Existing(_) => DescriptorKind::RoleReference,
        };
        deps.insert(project.role.name().to_string(), Some(expected));
      }
      Descriptor::Pipeline(pipeline) => {
        for name in pipeline.attribute_dependencies() {
          deps.insert(name, None);
        }
        for name in pipeline.projects() {
          deps.insert(name, Some(DescriptorKind::Project));
        }
      }
    }
    deps
  }
}

/// Accumulates descriptors in construction order.
#[derive(Debug)]
pub struct StackBuilder {
  name: String,
  descriptors: Vec<Descriptor>,
  kinds: HashMap<String, DescriptorKind>,
}

impl StackBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      descriptors: Vec::new(),
      kinds: HashMap::new(),
    }
  }

  /// Add a descriptor. Its name must be new and everything it references
  /// must already be present with the right kind.
  pub fn add(&mut self, descriptor: impl Into<Descriptor>) -> Result<&mut Self, ComposeError> {
    let descriptor = descriptor.into();
    let name = descriptor.name().to_string();

    if self.kinds.contains_key(&name) {
      return Err(ComposeError::DuplicateName(name));
    }

    for (dependency, expected) in descriptor.dependencies() {
      let Some(&found) = self.kinds.get(&dependency) else {
        return Err(ComposeError::UndeclaredDependency {
          descriptor: name,
          dependency,
        });
      };
      if let Some(expected) = expected
        && expected != found
      {
        return Err(ComposeError::KindMismatch {
          descriptor: name,
          dependency,
          expected,
          found,
        });
      }
    }

    if let Descriptor::Project(project) = &descriptor {
      project.validate().map_err(|source| ComposeError::Script {
        descriptor: name.clone(),
        source,
      })?;
    }

    debug!(name = %name, kind = %descriptor.kind(), "descriptor added");
    self.kinds.insert(name, descriptor.kind());
    self.descriptors.push(descriptor);
    Ok(self)
  }

  pub fn finish(self) -> Result<Stack, ComposeError> {
    let stack = Stack {
      name: self.name,
      descriptors: self.descriptors,
    };
    stack.dependency_graph()?;
    Ok(stack)
  }
}

impl From<RegistryDescriptor> for Descriptor {
  fn from(d: RegistryDescriptor) -> Self {
    Descriptor::Registry(d)
  }
}

impl From<RoleDescriptor> for Descriptor {
  fn from(d: RoleDescriptor) -> Self {
    Descriptor::Role(d)
  }
}

impl From<ExistingRole> for Descriptor {
  fn from(d: ExistingRole) -> Self {
    Descriptor::RoleReference(d)
  }
}

impl From<ProjectDescriptor> for Descriptor {
  fn from(d: ProjectDescriptor) -> Self {
    Descriptor::Project(d)
  }
}

impl From<Pipeline> for Descriptor {
  fn from(d: Pipeline) -> Self {
    Descriptor::Pipeline(d)
  }
}

/// The composed, immutable descriptor graph.
#[derive(Debug, Clone)]
pub struct Stack {
  name: String,
  descriptors: Vec<Descriptor>,
}

impl Stack {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Descriptors in construction order.
  pub fn descriptors(&self) -> &[Descriptor] {
    &self.descriptors
  }

  pub fn get(&self, name: &str) -> Option<&Descriptor> {
    self.descriptors.iter().find(|d| d.name() == name)
  }

  pub fn count(&self, kind: DescriptorKind) -> usize {
    self.descriptors.iter().filter(|d| d.kind() == kind).count()
  }

  pub fn project(&self, name: &str) -> Option<&ProjectDescriptor> {
    match self.get(name) {
      Some(Descriptor::Project(p)) => Some(p),
      _ => None,
    }
  }

  pub fn pipeline(&self) -> Option<&Pipeline> {
    self.descriptors.iter().find_map(|d| match d {
      Descriptor::Pipeline(p) => Some(p),
      _ => None,
    })
  }

  /// Dependency graph with an edge from each dependency to its dependent.
  pub fn dependency_graph(&self) -> Result<DiGraph<String, ()>, ComposeError> {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

    for descriptor in &self.descriptors {
      nodes.insert(descriptor.name(), graph.add_node(descriptor.name().to_string()));
    }

    for descriptor in &self.descriptors {
      let dependent = nodes[descriptor.name()];
      for dep in descriptor.dependencies().keys() {
        if let Some(&idx) = nodes.get(dep.as_str()) {
          graph.add_edge(idx, dependent, ());
        }
      }
    }

    toposort(&graph, None).map_err(|_| ComposeError::CycleDetected)?;
    Ok(graph)
  }

  /// Produce the manifest handed to the engine.
  pub fn synthesize(&self) -> Result<Manifest, SynthError> {
    let mut manifest = Manifest {
      stack: self.name.clone(),
      resources: BTreeMap::new(),
    };

    for descriptor in &self.descriptors {
      let name = descriptor.name().to_string();
      let properties = serde_json::to_value(descriptor).map_err(|source| SynthError::Serialize {
        name: name.clone(),
        source,
      })?;
      let depends_on: Vec<String> = descriptor.dependencies().into_keys().collect();

      let hash = serde_json::json!({
        "kind": descriptor.kind(),
        "depends_on": depends_on,
        "properties": properties,
      })
      .compute_hash()?;

      manifest.resources.insert(
        name,
        ManifestEntry {
          kind: descriptor.kind(),
          hash,
          depends_on,
          properties,
        },
      );
    }

    let hash = manifest.compute_hash()?;
    info!(stack = %self.name, resources = manifest.resources.len(), hash = %hash, "stack synthesized");
    Ok(manifest)
  }
}

/// Compose the application's infrastructure stack from `config`.
///
/// Yields one registry, one build role, one existing-role reference, two
/// projects and one three-stage pipeline.
pub fn compose(config: &Config) -> Result<Stack, ComposeError> {
  info!(
    application = config.application_name.as_str(),
    environment = config.deploy_environment.as_str(),
    "composing stack"
  );

  let mut builder = StackBuilder::new(STACK_NAME);

  let registry = RegistryDescriptor::declare(REGISTRY_NAME, TagMutability::Immutable, CleanupPolicy::Destroy)
    .grant_pull(Principal::service(BUILD_SERVICE_PRINCIPAL), &PULL_ACTIONS)?;

  let build_role = RoleDescriptor::for_build(BUILD_ROLE_NAME, Principal::service(BUILD_SERVICE_PRINCIPAL), &registry);
  let deploy_role = ExistingRole::from_role_name(DEPLOY_ROLE_NAME, config.deploy_role_name.as_str());

  let build_env: EnvironmentVariables = BTreeMap::from([
    ("CLUSTER_NAME".to_string(), EnvValue::literal(config.cluster_name.as_str())),
    ("ECR_REPO_URI".to_string(), registry.repository_uri().into()),
  ]);
  let build_project = ProjectDescriptor::declare(
    BUILD_PROJECT_NAME,
    ScriptSource::File(BUILD_SCRIPT_FILE.to_string()),
    ComputeProfile::default(),
    RoleRef::from(&build_role),
    build_env,
  );

  let deploy_env: EnvironmentVariables = BTreeMap::from([
    ("CLUSTER_NAME".to_string(), EnvValue::literal(config.cluster_name.as_str())),
    ("ECR_REPO_URI".to_string(), registry.repository_uri().into()),
    ("APP_NAME".to_string(), EnvValue::literal(config.application_name.as_str())),
    ("DEPLOY_ENV".to_string(), EnvValue::literal(config.deploy_environment.as_str())),
    ("DEPLOY_NS".to_string(), EnvValue::literal(config.deploy_namespace.as_str())),
  ]);
  let deploy_project = ProjectDescriptor::declare(
    DEPLOY_PROJECT_NAME,
    ScriptSource::Inline(deploy_script()),
    ComputeProfile::default(),
    RoleRef::from(&deploy_role),
    deploy_env,
  );

  let source_output = Artifact::new(SOURCE_ARTIFACT_NAME);
  let source = &config.source;
  let pipeline = Pipeline::builder(PIPELINE_NAME, format!("Build-Deploy-{}", source.repo.as_str()))
    .stage(
      StageKind::Source,
      vec![Action::source_control(
        "Source",
        source.owner.as_str(),
        source.repo.as_str(),
        source.branch.as_str(),
        SecretRef {
          secret_name: source.token_secret.value.clone(),
          json_field: source.token_field.value.clone(),
        },
        &source_output,
      )],
    )?
    .stage(
      StageKind::Build,
      vec![Action::run_project("Build", &build_project, &source_output).with_variables_namespace(BUILD_VARIABLES_NAMESPACE)],
    )?
    .stage(
      StageKind::Deploy,
      vec![
        Action::run_project("Deploy", &deploy_project, &source_output)
          .with_environment(BUILD_VERSION_VAR, VariableRef::new(BUILD_VARIABLES_NAMESPACE, BUILD_VERSION_VAR)),
      ],
    )?
    .build()?;

  builder
    .add(registry)?
    .add(build_role)?
    .add(deploy_role)?
    .add(build_project)?
    .add(deploy_project)?
    .add(pipeline)?;

  let stack = builder.finish()?;
  info!(descriptors = stack.descriptors().len(), "stack composed");
  Ok(stack)
}

/// Names in construction order. Useful for asserting the order invariant.
pub fn construction_order(stack: &Stack) -> Vec<&str> {
  stack.descriptors().iter().map(Descriptor::name).collect()
}

/// Names referenced by each descriptor, for display.
pub fn dependency_map(stack: &Stack) -> BTreeMap<String, BTreeSet<String>> {
  stack
    .descriptors()
    .iter()
    .map(|d| (d.name().to_string(), d.dependencies().into_keys().collect()))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::buildspec::BuildSpec;

  fn config() -> Config {
    Config::from_lookup(|_| None)
  }

  fn registry(name: &str) -> RegistryDescriptor {
    RegistryDescriptor::declare(name, TagMutability::Immutable, CleanupPolicy::Retain)
  }

  #[test]
  fn compose_yields_expected_descriptors() {
    let stack = compose(&config()).unwrap();

    assert_eq!(stack.count(DescriptorKind::Registry), 1);
    assert_eq!(stack.count(DescriptorKind::Role), 1);
    assert_eq!(stack.count(DescriptorKind::RoleReference), 1);
    assert_eq!(stack.count(DescriptorKind::Project), 2);
    assert_eq!(stack.count(DescriptorKind::Pipeline), 1);
    assert_eq!(stack.descriptors().len(), 6);
    assert_eq!(stack.pipeline().unwrap().stage_kinds(), StageKind::ORDER.to_vec());
  }

  #[test]
  fn construction_order_is_dependency_order() {
    let stack = compose(&config()).unwrap();
    assert_eq!(
      construction_order(&stack),
      vec![
        REGISTRY_NAME,
        BUILD_ROLE_NAME,
        DEPLOY_ROLE_NAME,
        BUILD_PROJECT_NAME,
        DEPLOY_PROJECT_NAME,
        PIPELINE_NAME
      ]
    );

    let position = |n: &str| construction_order(&stack).iter().position(|x| *x == n).unwrap();
    for (name, deps) in dependency_map(&stack) {
      for dep in deps {
        assert!(position(&dep) < position(&name), "{dep} must precede {name}");
      }
    }
  }

  #[test]
  fn duplicate_name_fails_composition() {
    let mut builder = StackBuilder::new("S");
    builder.add(registry("Repo")).unwrap();
    let err = builder.add(registry("Repo")).unwrap_err();
    assert!(matches!(err, ComposeError::DuplicateName(n) if n == "Repo"));
  }

  #[test]
  fn duplicate_name_across_kinds_fails() {
    let mut builder = StackBuilder::new("S");
    builder.add(registry("Shared")).unwrap();
    let err = builder
      .add(ExistingRole::from_role_name("Shared", "SomeRole"))
      .unwrap_err();
    assert!(matches!(err, ComposeError::DuplicateName(_)));
  }

  #[test]
  fn forward_reference_fails() {
    let repo = registry("Repo");
    let role = RoleDescriptor::for_build("Role", Principal::service(BUILD_SERVICE_PRINCIPAL), &repo);

    let mut builder = StackBuilder::new("S");
    let err = builder.add(role).unwrap_err();
    assert!(matches!(
      err,
      ComposeError::UndeclaredDependency { ref dependency, .. } if dependency == "Repo"
    ));
  }

  #[test]
  fn role_kind_must_match_reference() {
    let mut builder = StackBuilder::new("S");
    builder
      .add(ExistingRole::from_role_name("Deploy", "CodeBuild-Role"))
      .unwrap();

    let project = ProjectDescriptor::declare(
      "Project",
      ScriptSource::File("buildspec.yml".to_string()),
      ComputeProfile::default(),
      RoleRef::Declared("Deploy".to_string()),
      EnvironmentVariables::new(),
    );
    let err = builder.add(project).unwrap_err();
    assert!(matches!(
      err,
      ComposeError::KindMismatch {
        expected: DescriptorKind::Role,
        found: DescriptorKind::RoleReference,
        ..
      }
    ));
  }

  #[test]
  fn invalid_inline_script_fails() {
    let mut builder = StackBuilder::new("S");
    builder.add(ExistingRole::from_role_name("Deploy", "R")).unwrap();
    let project = ProjectDescriptor::declare(
      "Project",
      ScriptSource::Inline(BuildSpec::new()),
      ComputeProfile::default(),
      RoleRef::Existing("Deploy".to_string()),
      EnvironmentVariables::new(),
    );
    assert!(matches!(builder.add(project), Err(ComposeError::Script { .. })));
  }

  #[test]
  fn graph_is_acyclic_with_expected_edges() {
    let stack = compose(&config()).unwrap();
    let graph = stack.dependency_graph().unwrap();
    assert_eq!(graph.node_count(), 6);
    // registry -> role, registry -> 2 projects, build role -> build project,
    // deploy role -> deploy project, 2 projects -> pipeline
    assert_eq!(graph.edge_count(), 7);
  }

  #[test]
  fn synthesize_is_deterministic() {
    let a = compose(&config()).unwrap().synthesize().unwrap();
    let b = compose(&config()).unwrap().synthesize().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
    assert_eq!(a.resources.len(), 6);
    assert_eq!(a.resources[PIPELINE_NAME].depends_on, vec![BUILD_PROJECT_NAME, DEPLOY_PROJECT_NAME]);
  }

  #[test]
  fn config_change_updates_only_dependents() {
    let base = compose(&config()).unwrap().synthesize().unwrap();
    let changed = compose(&Config::from_lookup(|k| (k == "APPLICATION_NAME").then(|| "sample".to_string())))
      .unwrap()
      .synthesize()
      .unwrap();

    let diff = crate::manifest::compute_diff(&changed, Some(&base));
    assert_eq!(diff.to_update, vec![DEPLOY_PROJECT_NAME]);
    assert!(diff.to_create.is_empty());
    assert!(diff.to_delete.is_empty());
  }

  #[test]
  fn synthesized_references_are_tokens() {
    let manifest = compose(&config()).unwrap().synthesize().unwrap();
    let deploy = &manifest.resources[DEPLOY_PROJECT_NAME].properties;
    assert_eq!(deploy["environment"]["ECR_REPO_URI"]["attribute"], "$${AppRepository.repository_uri}");

    let pipeline = &manifest.resources[PIPELINE_NAME].properties;
    let deploy_action = &pipeline["stages"][2]["actions"][0];
    assert_eq!(
      deploy_action["kind"]["run_project"]["environment"]["BUILD_VERSION"]["variable"],
      "#{BuildVariables.BUILD_VERSION}"
    );
    let secret = &pipeline["stages"][0]["actions"][0]["kind"]["source_control"]["oauth_token"];
    assert_eq!(secret["secret_name"], "dev/github-access-token");
    assert_eq!(secret["json_field"], "oauthToken");
  }

  #[test]
  fn token_shaped_overrides_compose_as_literals() {
    let overrides = |k: &str| match k {
      "APPLICATION_NAME" => Some("app#{x".to_string()),
      "EKS_CLUSTER_NAME" => Some("c$${Ghost.arn}".to_string()),
      "DEPLOY_NAMESPACE" => Some("#{BuildVariables.BUILD_VERSION}".to_string()),
      _ => None,
    };
    let stack = compose(&Config::from_lookup(overrides)).unwrap();

    let manifest = stack.synthesize().unwrap();
    assert!(!manifest.resources[BUILD_PROJECT_NAME].depends_on.iter().any(|d| d == "Ghost"));
    assert!(!dependency_map(&stack)[BUILD_PROJECT_NAME].contains("Ghost"));

    let deploy = stack.project(DEPLOY_PROJECT_NAME).unwrap();
    let action = &stack.pipeline().unwrap().stage(StageKind::Deploy).unwrap().actions[0];
    let mut known = crate::placeholder::KnownValues::new();
    known.publish(BUILD_VARIABLES_NAMESPACE, BUILD_VERSION_VAR, "v9");

    let env = action.resolve_environment(&deploy.environment, &known);
    assert_eq!(env["DEPLOY_NS"], "#{BuildVariables.BUILD_VERSION}");
    assert_eq!(env["APP_NAME"], "app#{x");
    assert_eq!(env["CLUSTER_NAME"], "c$${Ghost.arn}");
    assert_eq!(env[BUILD_VERSION_VAR], "v9");
  }
}
