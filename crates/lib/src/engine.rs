//! Hand-off to the provisioning engine.
//!
//! The stack is purely declarative: once synthesized, a [`Manifest`] is
//! submitted to an engine that owns ordering, retries and rollback. This
//! crate ships one engine, [`AssemblyDir`], which writes the manifest and
//! every inline script to a directory for an external deployer to pick up.
//!
//! # Assembly Layout
//!
//! ```text
//! {out_dir}/
//! ├── manifest.json                 # the synthesized Manifest
//! └── <Project>.buildspec.yml       # one per project with an inline script
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::buildspec::{BuildSpec, ScriptError};
use crate::manifest::{DescriptorKind, Manifest};
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// Manifest file name within an assembly directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Suffix of rendered inline scripts.
pub const SCRIPT_SUFFIX: &str = ".buildspec.yml";

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("failed to create assembly directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("manifest not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("inline script of '{project}' is unreadable: {source}")]
  Script {
    project: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to render inline script of '{project}': {source}")]
  Render {
    project: String,
    #[source]
    source: ScriptError,
  },

  #[error(transparent)]
  Hash(#[from] HashError),
}

/// What an engine accepted.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
  pub stack: String,
  pub hash: ObjectHash,
  pub resources: usize,
  /// Files written, manifest first.
  pub files: Vec<PathBuf>,
}

/// Accepts a synthesized manifest.
///
/// Engines own ordering, retries and rollback; a submission is the only
/// point at which the stack crosses into the outside world.
pub trait ProvisioningEngine {
  fn submit(&self, manifest: &Manifest) -> Result<Submission, EngineError>;
}

/// Writes manifests to a directory on disk.
#[derive(Debug, Clone)]
pub struct AssemblyDir {
  root: PathBuf,
}

impl AssemblyDir {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.root.join(MANIFEST_FILENAME)
  }

  fn script_path(&self, project: &str) -> PathBuf {
    self.root.join(format!("{project}{SCRIPT_SUFFIX}"))
  }

  fn ensure_dir(&self) -> Result<(), EngineError> {
    fs::create_dir_all(&self.root).map_err(|source| EngineError::CreateDir {
      path: self.root.clone(),
      source,
    })
  }

  /// Load the manifest previously written to this directory.
  ///
  /// Returns `Ok(None)` if nothing has been written yet.
  pub fn load_manifest(&self) -> Result<Option<Manifest>, EngineError> {
    match load_manifest(&self.manifest_path()) {
      Ok(manifest) => Ok(Some(manifest)),
      Err(EngineError::NotFound(_)) => Ok(None),
      Err(e) => Err(e),
    }
  }
}

impl ProvisioningEngine for AssemblyDir {
  fn submit(&self, manifest: &Manifest) -> Result<Submission, EngineError> {
    self.ensure_dir()?;

    let mut files = Vec::new();

    let path = self.manifest_path();
    let content = serde_json::to_string_pretty(manifest).map_err(EngineError::Serialize)?;
    write_atomic(&path, &content)?;
    files.push(path);

    for (name, entry) in &manifest.resources {
      if entry.kind != DescriptorKind::Project {
        continue;
      }
      let Some(inline) = entry.properties.get("script").and_then(|s| s.get("inline")) else {
        continue;
      };

      let spec: BuildSpec = serde_json::from_value(inline.clone()).map_err(|source| EngineError::Script {
        project: name.clone(),
        source,
      })?;
      let yaml = spec.to_yaml().map_err(|source| EngineError::Render {
        project: name.clone(),
        source,
      })?;

      let path = self.script_path(name);
      write_atomic(&path, &yaml)?;
      debug!(project = %name, path = %path.display(), "inline script written");
      files.push(path);
    }

    let hash = manifest.compute_hash()?;
    info!(
      stack = %manifest.stack,
      hash = %hash,
      dir = %self.root.display(),
      files = files.len(),
      "manifest submitted"
    );

    Ok(Submission {
      stack: manifest.stack.clone(),
      hash,
      resources: manifest.resources.len(),
      files,
    })
  }
}

/// Read a manifest from `path`.
pub fn load_manifest(path: &Path) -> Result<Manifest, EngineError> {
  let content = fs::read_to_string(path).map_err(|source| {
    if source.kind() == io::ErrorKind::NotFound {
      EngineError::NotFound(path.to_path_buf())
    } else {
      EngineError::Read {
        path: path.to_path_buf(),
        source,
      }
    }
  })?;

  serde_json::from_str(&content).map_err(|source| EngineError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, content: &str) -> Result<(), EngineError> {
  let mut temp = path.as_os_str().to_owned();
  temp.push(".tmp");
  let temp = PathBuf::from(temp);

  fs::write(&temp, content).map_err(|source| EngineError::Write {
    path: temp.clone(),
    source,
  })?;
  fs::rename(&temp, path).map_err(|source| EngineError::Write {
    path: path.to_path_buf(),
    source,
  })
}
