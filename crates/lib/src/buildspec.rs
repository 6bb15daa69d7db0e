//! Phase-ordered shell scripts run by stage projects.
//!
//! A script is a set of optional phases (`install`, `pre_build`, `build`,
//! `post_build`), each an ordered list of commands. The executor runs phases in
//! that order and commands in list order, stopping at the first non-zero exit.
//!
//! Commands reference project environment variables with ordinary shell
//! syntax (`$APP_NAME`, `${APP_NAME}`). [`BuildSpec::render`] substitutes known
//! values to preview what the executor will run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{
  BUILDSPEC_VERSION, CHART_REPO_NAME, CHART_REPO_URL, CHART_UPGRADE_TIMEOUT_SECS, HELM_INSTALL_SCRIPT_URL,
  POST_DEPLOY_GRACE_SECS,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
  #[error("script has no phases")]
  Empty,

  #[error("phase '{0}' has no commands")]
  EmptyPhase(PhaseName),

  #[error("phase '{phase}' command {index} is blank")]
  BlankCommand { phase: PhaseName, index: usize },

  #[error("failed to serialize script: {0}")]
  Serialize(String),
}

/// Script phases in execution order. `Ord` follows execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
  Install,
  PreBuild,
  Build,
  PostBuild,
}

impl PhaseName {
  pub const ALL: [PhaseName; 4] = [
    PhaseName::Install,
    PhaseName::PreBuild,
    PhaseName::Build,
    PhaseName::PostBuild,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      PhaseName::Install => "install",
      PhaseName::PreBuild => "pre_build",
      PhaseName::Build => "build",
      PhaseName::PostBuild => "post_build",
    }
  }
}

impl std::fmt::Display for PhaseName {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
  pub commands: Vec<String>,
}

/// A structured script. Phases serialize in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
  pub version: String,
  pub phases: BTreeMap<PhaseName, Phase>,
}

impl Default for BuildSpec {
  fn default() -> Self {
    Self {
      version: BUILDSPEC_VERSION.to_string(),
      phases: BTreeMap::new(),
    }
  }
}

impl BuildSpec {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the commands of one phase, replacing any earlier ones.
  pub fn phase<I, S>(mut self, name: PhaseName, commands: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let commands = commands.into_iter().map(Into::into).collect();
    self.phases.insert(name, Phase { commands });
    self
  }

  pub fn commands(&self, name: PhaseName) -> &[String] {
    self.phases.get(&name).map(|p| p.commands.as_slice()).unwrap_or(&[])
  }

  /// Check the phase structure before the script is handed to the engine.
  pub fn validate(&self) -> Result<(), ScriptError> {
    if self.phases.is_empty() {
      return Err(ScriptError::Empty);
    }
    for (name, phase) in &self.phases {
      if phase.commands.is_empty() {
        return Err(ScriptError::EmptyPhase(*name));
      }
      if let Some(index) = phase.commands.iter().position(|c| c.trim().is_empty()) {
        return Err(ScriptError::BlankCommand { phase: *name, index });
      }
    }
    Ok(())
  }

  /// Substitute `vars` into every command. Unknown variables are left as-is
  /// for the executor's shell to expand.
  pub fn render(&self, vars: &BTreeMap<String, String>) -> Vec<(PhaseName, Vec<String>)> {
    self
      .phases
      .iter()
      .map(|(name, phase)| {
        let commands = phase.commands.iter().map(|c| expand_shell_vars(c, vars)).collect();
        (*name, commands)
      })
      .collect()
  }

  pub fn to_yaml(&self) -> Result<String, ScriptError> {
    serde_yaml::to_string(self).map_err(|e| ScriptError::Serialize(e.to_string()))
  }
}

/// Where a project's script comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSource {
  /// A file maintained in the source repository, read by the executor.
  File(String),
  /// A script embedded in the descriptor.
  Inline(BuildSpec),
}

impl ScriptSource {
  pub fn validate(&self) -> Result<(), ScriptError> {
    match self {
      ScriptSource::File(_) => Ok(()),
      ScriptSource::Inline(spec) => spec.validate(),
    }
  }
}

/// The deploy script.
///
/// Reads `CLUSTER_NAME`, `APP_NAME`, `DEPLOY_ENV`, `DEPLOY_NS`, `ECR_REPO_URI`
/// and `BUILD_VERSION` from the project environment.
///
/// The post-build phase waits a fixed grace period before asking for the load
/// balancer hostname. It does not poll for readiness; a slow load balancer
/// yields an empty hostname in the report.
pub fn deploy_script() -> BuildSpec {
  BuildSpec::new()
    .phase(
      PhaseName::Install,
      [
        format!("curl -sSL {HELM_INSTALL_SCRIPT_URL} | bash"),
        format!("helm repo add {CHART_REPO_NAME} {CHART_REPO_URL} && helm repo update"),
      ],
    )
    .phase(
      PhaseName::PreBuild,
      [
        "helm version".to_string(),
        "mkdir -p ~/.kube/".to_string(),
        "aws eks --region $AWS_DEFAULT_REGION update-kubeconfig --name $CLUSTER_NAME".to_string(),
        "chmod 0600 ~/.kube/config".to_string(),
        "aws sts get-caller-identity".to_string(),
      ],
    )
    .phase(
      PhaseName::Build,
      [format!(
        "helm upgrade --atomic --timeout {CHART_UPGRADE_TIMEOUT_SECS}s --wait -i $APP_NAME-$DEPLOY_ENV helm/$APP_NAME \
         -n $DEPLOY_NS -f helm/$APP_NAME/values.$DEPLOY_ENV.yaml \
         --set image.repository=$ECR_REPO_URI --set image.tag=$BUILD_VERSION"
      )],
    )
    .phase(
      PhaseName::PostBuild,
      [
        r#"bash -c 'if [ "$CODEBUILD_BUILD_SUCCEEDING" = "0" ]; then exit 1; fi'"#.to_string(),
        format!("sleep {POST_DEPLOY_GRACE_SECS}"),
        r#"APP_ENDPOINT=`kubectl get svc $APP_NAME-$DEPLOY_ENV -n $DEPLOY_NS -o jsonpath="{.status.loadBalancer.ingress[*].hostname}"`"#
          .to_string(),
        r#"echo -e "The application can be accessed now via http://$APP_ENDPOINT/""#.to_string(),
      ],
    )
}

/// Expand `$NAME` and `${NAME}` for names present in `vars`.
fn expand_shell_vars(command: &str, vars: &BTreeMap<String, String>) -> String {
  let mut out = String::with_capacity(command.len());
  let mut rest = command;

  while let Some(idx) = rest.find('$') {
    out.push_str(&rest[..idx]);
    let after = &rest[idx + 1..];

    let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
      match braced.find('}') {
        Some(end) => (&braced[..end], end + 2),
        None => ("", 0),
      }
    } else {
      let end = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after.len());
      (&after[..end], end)
    };

    match vars.get(name) {
      Some(value) if !name.is_empty() => {
        out.push_str(value);
        rest = &after[consumed..];
      }
      _ => {
        out.push('$');
        rest = after;
      }
    }
  }

  out.push_str(rest);
  out
}
