//! Configuration consumed by every descriptor.
//!
//! Values come in two tiers:
//! - fixed values compiled into the crate (source coordinates, the shared deploy role)
//! - overridable values read from the environment, each with a non-empty default
//!
//! Resolution never fails. A malformed override is passed through untouched and
//! left for the provisioning engine to reject.

use serde::{Deserialize, Serialize};

pub const ENV_CLUSTER_NAME: &str = "EKS_CLUSTER_NAME";
pub const ENV_DEPLOY_ENVIRONMENT: &str = "DEPLOY_ENVIRONMENT";
pub const ENV_DEPLOY_NAMESPACE: &str = "DEPLOY_NAMESPACE";
pub const ENV_APPLICATION_NAME: &str = "APPLICATION_NAME";

pub const DEFAULT_CLUSTER_NAME: &str = "eks-blueprint";
pub const DEFAULT_DEPLOY_ENVIRONMENT: &str = "dev";
pub const DEFAULT_DEPLOY_NAMESPACE: &str = "dev";
pub const DEFAULT_APPLICATION_NAME: &str = "application";

/// Pre-existing role used by the deploy project. Must already hold cluster
/// permissions and be mapped into the cluster's identity configuration.
pub const DEPLOY_ROLE_NAME: &str = "CodeBuild-BuildDeployEKS-Role";
pub const SOURCE_REPO: &str = "coding-challenge";
pub const SOURCE_OWNER: &str = "markmcpherson";
pub const SOURCE_BRANCH: &str = "main";
pub const SOURCE_TOKEN_SECRET: &str = "dev/github-access-token";
pub const SOURCE_TOKEN_FIELD: &str = "oauthToken";

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  /// Compiled in, not overridable.
  Fixed,
  /// Overridable, but no override was present.
  Default,
  /// Taken from the named environment variable.
  Environment,
}

/// A resolved configuration value and its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
  pub value: String,
  pub provenance: Provenance,
  /// Environment variable that may override this value, if any.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub env_var: Option<String>,
}

impl Param {
  fn fixed(value: &str) -> Self {
    Self {
      value: value.to_string(),
      provenance: Provenance::Fixed,
      env_var: None,
    }
  }

  /// Resolve an overridable value. Unset and empty overrides both fall back
  /// to the default.
  fn overridable(env_var: &str, default: &str, lookup: &impl Fn(&str) -> Option<String>) -> Self {
    match lookup(env_var).filter(|v| !v.is_empty()) {
      Some(value) => Self {
        value,
        provenance: Provenance::Environment,
        env_var: Some(env_var.to_string()),
      },
      None => Self {
        value: default.to_string(),
        provenance: Provenance::Default,
        env_var: Some(env_var.to_string()),
      },
    }
  }

  pub fn as_str(&self) -> &str {
    &self.value
  }
}

/// Source control coordinates for the pipeline's Source stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
  pub owner: Param,
  pub repo: Param,
  pub branch: Param,
  pub token_secret: Param,
  pub token_field: Param,
}

/// The full set of named parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  pub cluster_name: Param,
  pub deploy_environment: Param,
  pub deploy_namespace: Param,
  pub application_name: Param,
  pub deploy_role_name: Param,
  pub source: SourceConfig,
}

impl Config {
  /// Resolve from the process environment.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Resolve using an arbitrary override source.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let config = Self {
      cluster_name: Param::overridable(ENV_CLUSTER_NAME, DEFAULT_CLUSTER_NAME, &lookup),
      deploy_environment: Param::overridable(ENV_DEPLOY_ENVIRONMENT, DEFAULT_DEPLOY_ENVIRONMENT, &lookup),
      deploy_namespace: Param::overridable(ENV_DEPLOY_NAMESPACE, DEFAULT_DEPLOY_NAMESPACE, &lookup),
      application_name: Param::overridable(ENV_APPLICATION_NAME, DEFAULT_APPLICATION_NAME, &lookup),
      deploy_role_name: Param::fixed(DEPLOY_ROLE_NAME),
      source: SourceConfig {
        owner: Param::fixed(SOURCE_OWNER),
        repo: Param::fixed(SOURCE_REPO),
        branch: Param::fixed(SOURCE_BRANCH),
        token_secret: Param::fixed(SOURCE_TOKEN_SECRET),
        token_field: Param::fixed(SOURCE_TOKEN_FIELD),
      },
    };

    tracing::debug!(
      cluster = config.cluster_name.as_str(),
      environment = config.deploy_environment.as_str(),
      namespace = config.deploy_namespace.as_str(),
      application = config.application_name.as_str(),
      "configuration resolved"
    );

    config
  }

  /// All parameters as `(key, param)` pairs in display order.
  pub fn entries(&self) -> Vec<(&'static str, &Param)> {
    vec![
      ("cluster_name", &self.cluster_name),
      ("deploy_environment", &self.deploy_environment),
      ("deploy_namespace", &self.deploy_namespace),
      ("application_name", &self.application_name),
      ("deploy_role_name", &self.deploy_role_name),
      ("source.owner", &self.source.owner),
      ("source.repo", &self.source.repo),
      ("source.branch", &self.source.branch),
      ("source.token_secret", &self.source.token_secret),
      ("source.token_field", &self.source.token_field),
    ]
  }
}
