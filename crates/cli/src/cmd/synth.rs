//! Implementation of the `shiplane synth` command.
//!
//! Composes the stack from the environment, synthesizes its manifest and
//! submits it to an assembly directory. A manifest already present in that
//! directory is used as the baseline for the change summary.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use shiplane_lib::config::Config;
use shiplane_lib::engine::{AssemblyDir, ProvisioningEngine};
use shiplane_lib::manifest::compute_diff;
use shiplane_lib::stack::compose;

use crate::output::{print_info, print_json, print_stat, print_success};

pub fn cmd_synth(out: &Path, json: bool) -> Result<()> {
  let config = Config::from_env();
  let stack = compose(&config).context("Failed to compose stack")?;
  let manifest = stack.synthesize().context("Failed to synthesize manifest")?;

  let engine = AssemblyDir::new(out);
  let previous = engine
    .load_manifest()
    .with_context(|| format!("Failed to read previous manifest in {}", out.display()))?;
  debug!(dir = %out.display(), previous = previous.is_some(), "assembly directory loaded");
  let diff = compute_diff(&manifest, previous.as_ref());

  let submission = engine
    .submit(&manifest)
    .with_context(|| format!("Failed to write assembly directory: {}", out.display()))?;

  if json {
    let output = serde_json::json!({
      "submission": submission,
      "counts": manifest.counts(),
      "diff": diff,
    });
    print_json(&output)?;
    return Ok(());
  }

  print_success(&format!("Synthesized {}", submission.stack));
  print_stat("Hash", &submission.hash.0);
  for (kind, count) in manifest.counts() {
    print_stat(kind.as_str(), &count.to_string());
  }
  if previous.is_some() {
    print_stat(
      "Changes",
      &format!(
        "{} to create, {} to update, {} to delete",
        diff.to_create.len(),
        diff.to_update.len(),
        diff.to_delete.len()
      ),
    );
  }
  println!();
  for file in &submission.files {
    print_info(&file.display().to_string());
  }

  Ok(())
}
