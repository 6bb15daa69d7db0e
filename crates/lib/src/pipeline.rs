//! Pipeline composition: ordered stages, shared artifacts, and the single
//! cross-stage variable binding.
//!
//! Stages run strictly one after another. A failed stage halts the run;
//! stages already applied are not rolled back. Chart upgrades roll back on
//! their own, nothing else does.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::placeholder::{Placeholder, Resolver};
use crate::project::{EnvValue, EnvironmentVariables, ProjectDescriptor};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
  #[error("stage {found} cannot follow {previous}")]
  StageOrder { previous: String, found: StageKind },

  #[error("pipeline is missing the {0} stage")]
  MissingStage(StageKind),

  #[error("{0} stage has no actions")]
  EmptyStage(StageKind),

  #[error("action '{action}' does not belong in the {stage} stage")]
  ActionMismatch { stage: StageKind, action: String },

  #[error("duplicate action name '{0}'")]
  DuplicateAction(String),

  #[error("action '{action}' reads artifact '{artifact}' that no earlier action produces")]
  UnproducedArtifact { action: String, artifact: String },

  #[error("variable namespace '{0}' is declared twice")]
  DuplicateNamespace(String),

  #[error("action '{action}' references namespace '{namespace}' that no earlier stage declares")]
  UnknownNamespace { action: String, namespace: String },
}

/// An opaque handle for data flowing between stages.
///
/// Clones share identity: the Source output and every stage input that reads
/// it are the same handle, compared with [`Artifact::same`].
#[derive(Debug, Clone)]
pub struct Artifact(Arc<str>);

impl Artifact {
  pub fn new(name: &str) -> Self {
    Self(Arc::from(name))
  }

  pub fn name(&self) -> &str {
    &self.0
  }

  /// Identity comparison. Two handles with equal names are not the same artifact.
  pub fn same(&self, other: &Artifact) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl Serialize for Artifact {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.name())
  }
}

/// The fixed stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StageKind {
  Source,
  Build,
  Deploy,
}

impl StageKind {
  pub const ORDER: [StageKind; 3] = [StageKind::Source, StageKind::Build, StageKind::Deploy];

  pub fn as_str(&self) -> &'static str {
    match self {
      StageKind::Source => "Source",
      StageKind::Build => "Build",
      StageKind::Deploy => "Deploy",
    }
  }
}

impl fmt::Display for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A stored secret, referenced by name and JSON field. Never a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretRef {
  pub secret_name: String,
  pub json_field: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
  SourceControl {
    owner: String,
    repo: String,
    branch: String,
    oauth_token: SecretRef,
  },
  RunProject {
    project: String,
    /// Namespace this action publishes its exported variables under.
    #[serde(skip_serializing_if = "Option::is_none")]
    variables_namespace: Option<String>,
    /// Overrides applied on top of the project's own environment.
    environment: EnvironmentVariables,
  },
}

#[derive(Debug, Clone, Serialize)]
pub struct Action {
  pub name: String,
  pub kind: ActionKind,
  pub inputs: Vec<Artifact>,
  pub outputs: Vec<Artifact>,
}

impl Action {
  pub fn source_control(
    name: impl Into<String>,
    owner: impl Into<String>,
    repo: impl Into<String>,
    branch: impl Into<String>,
    oauth_token: SecretRef,
    output: &Artifact,
  ) -> Self {
    Self {
      name: name.into(),
      kind: ActionKind::SourceControl {
        owner: owner.into(),
        repo: repo.into(),
        branch: branch.into(),
        oauth_token,
      },
      inputs: Vec::new(),
      outputs: vec![output.clone()],
    }
  }

  pub fn run_project(name: impl Into<String>, project: &ProjectDescriptor, input: &Artifact) -> Self {
    Self {
      name: name.into(),
      kind: ActionKind::RunProject {
        project: project.name.clone(),
        variables_namespace: None,
        environment: EnvironmentVariables::new(),
      },
      inputs: vec![input.clone()],
      outputs: Vec::new(),
    }
  }

  /// Publish this action's exported variables under `namespace`.
  pub fn with_variables_namespace(mut self, namespace: impl Into<String>) -> Self {
    if let ActionKind::RunProject {
      variables_namespace, ..
    } = &mut self.kind
    {
      *variables_namespace = Some(namespace.into());
    }
    self
  }

  pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
    if let ActionKind::RunProject { environment, .. } = &mut self.kind {
      environment.insert(key.into(), value.into());
    }
    self
  }

  pub fn project(&self) -> Option<&str> {
    match &self.kind {
      ActionKind::RunProject { project, .. } => Some(project),
      ActionKind::SourceControl { .. } => None,
    }
  }

  pub fn variables_namespace(&self) -> Option<&str> {
    match &self.kind {
      ActionKind::RunProject {
        variables_namespace, ..
      } => variables_namespace.as_deref(),
      ActionKind::SourceControl { .. } => None,
    }
  }

  pub fn environment(&self) -> Option<&EnvironmentVariables> {
    match &self.kind {
      ActionKind::RunProject { environment, .. } => Some(environment),
      ActionKind::SourceControl { .. } => None,
    }
  }

  /// The environment the executor hands to the project's script.
  ///
  /// Action values override project values. A variable the namespace owner
  /// never published resolves to an empty string. Literals pass through as-is.
  pub fn resolve_environment(&self, project_env: &EnvironmentVariables, resolver: &impl Resolver) -> BTreeMap<String, String> {
    let mut merged = project_env.clone();
    if let Some(env) = self.environment() {
      merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    merged
      .iter()
      .map(|(key, value)| (key.clone(), value.resolve(resolver)))
      .collect()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stage {
  pub kind: StageKind,
  pub actions: Vec<Action>,
}

impl Stage {
  pub fn name(&self) -> &'static str {
    self.kind.as_str()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
  /// Logical name within the stack.
  pub name: String,
  /// Physical pipeline name.
  pub pipeline_name: String,
  pub stages: Vec<Stage>,
}

impl Pipeline {
  pub fn builder(name: impl Into<String>, pipeline_name: impl Into<String>) -> PipelineBuilder {
    PipelineBuilder {
      name: name.into(),
      pipeline_name: pipeline_name.into(),
      stages: Vec::new(),
    }
  }

  pub fn stage_kinds(&self) -> Vec<StageKind> {
    self.stages.iter().map(|s| s.kind).collect()
  }

  pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
    self.stages.iter().find(|s| s.kind == kind)
  }

  /// Logical names of the projects run by this pipeline.
  pub fn projects(&self) -> BTreeSet<String> {
    self
      .stages
      .iter()
      .flat_map(|s| s.actions.iter())
      .filter_map(|a| a.project().map(str::to_string))
      .collect()
  }

  /// Descriptors referenced through attribute values in action environments.
  pub fn attribute_dependencies(&self) -> BTreeSet<String> {
    self
      .stages
      .iter()
      .flat_map(|s| s.actions.iter())
      .filter_map(Action::environment)
      .flat_map(crate::project::attribute_dependencies)
      .collect()
  }
}

/// Builds a [`Pipeline`], enforcing the Source → Build → Deploy order.
///
/// Additional stages (staging, approval) are not supported.
#[derive(Debug)]
pub struct PipelineBuilder {
  name: String,
  pipeline_name: String,
  stages: Vec<Stage>,
}

impl PipelineBuilder {
  pub fn stage(mut self, kind: StageKind, actions: Vec<Action>) -> Result<Self, PipelineError> {
    let expected = StageKind::ORDER[self.stages.len().min(StageKind::ORDER.len() - 1)];
    if self.stages.len() >= StageKind::ORDER.len() || kind != expected {
      let previous = self
        .stages
        .last()
        .map(|s| s.kind.to_string())
        .unwrap_or_else(|| "the start".to_string());
      return Err(PipelineError::StageOrder { previous, found: kind });
    }
    if actions.is_empty() {
      return Err(PipelineError::EmptyStage(kind));
    }
    for action in &actions {
      let fits = match kind {
        StageKind::Source => matches!(action.kind, ActionKind::SourceControl { .. }),
        StageKind::Build | StageKind::Deploy => matches!(action.kind, ActionKind::RunProject { .. }),
      };
      if !fits {
        return Err(PipelineError::ActionMismatch {
          stage: kind,
          action: action.name.clone(),
        });
      }
    }

    debug!(pipeline = %self.name, stage = %kind, actions = actions.len(), "stage added");
    self.stages.push(Stage { kind, actions });
    Ok(self)
  }

  pub fn build(self) -> Result<Pipeline, PipelineError> {
    if let Some(missing) = StageKind::ORDER.get(self.stages.len()) {
      return Err(PipelineError::MissingStage(*missing));
    }

    let mut action_names = BTreeSet::new();
    let mut produced: Vec<Artifact> = Vec::new();
    let mut namespaces: BTreeSet<String> = BTreeSet::new();

    for stage in &self.stages {
      // Namespaces declared in this stage become visible to the next one.
      let mut declared_here = Vec::new();

      for action in &stage.actions {
        if !action_names.insert(action.name.clone()) {
          return Err(PipelineError::DuplicateAction(action.name.clone()));
        }

        for input in &action.inputs {
          if !produced.iter().any(|p| p.same(input)) {
            return Err(PipelineError::UnproducedArtifact {
              action: action.name.clone(),
              artifact: input.name().to_string(),
            });
          }
        }

        for value in action.environment().into_iter().flat_map(|env| env.values()) {
          if let Some(Placeholder::Variable(v)) = value.reference()
            && !namespaces.contains(&v.namespace)
          {
            return Err(PipelineError::UnknownNamespace {
              action: action.name.clone(),
              namespace: v.namespace,
            });
          }
        }

        if let Some(ns) = action.variables_namespace() {
          if namespaces.contains(ns) || declared_here.iter().any(|d: &String| d == ns) {
            return Err(PipelineError::DuplicateNamespace(ns.to_string()));
          }
          declared_here.push(ns.to_string());
        }
      }

      for action in &stage.actions {
        produced.extend(action.outputs.iter().cloned());
      }
      namespaces.extend(declared_here);
    }

    Ok(Pipeline {
      name: self.name,
      pipeline_name: self.pipeline_name,
      stages: self.stages,
    })
  }
}
