//! Diff command implementation.
//!
//! Compares the currently composed stack against a manifest written by an
//! earlier `synth` and displays created, updated and deleted descriptors.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use shiplane_lib::config::Config;
use shiplane_lib::engine::load_manifest;
use shiplane_lib::manifest::{Manifest, StateDiff, compute_diff};
use shiplane_lib::stack::compose;
use shiplane_lib::util::hash::Hashable;

use crate::output::{print_json, symbols, truncate_hash};

pub fn cmd_diff(previous: &Path, verbose: bool, json: bool) -> Result<()> {
  let before = load_manifest(previous).with_context(|| format!("Failed to load manifest: {}", previous.display()))?;

  let stack = compose(&Config::from_env()).context("Failed to compose stack")?;
  let after = stack.synthesize().context("Failed to synthesize manifest")?;
  let diff = compute_diff(&after, Some(&before));

  if json {
    let output = serde_json::json!({
      "previous": before.compute_hash().context("Failed to hash previous manifest")?,
      "current": after.compute_hash().context("Failed to hash manifest")?,
      "diff": diff,
    });
    print_json(&output)?;
  } else {
    print_human_diff(&before, &after, &diff, verbose);
  }

  Ok(())
}

fn print_human_diff(before: &Manifest, after: &Manifest, diff: &StateDiff, verbose: bool) {
  if diff.is_empty() {
    println!("No changes.");
    return;
  }

  for name in &diff.to_create {
    let entry = &after.resources[name];
    println!(
      "  {} {} ({})",
      symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()),
      name,
      entry.kind
    );
  }

  for name in &diff.to_update {
    let old = &before.resources[name];
    let new = &after.resources[name];
    if verbose {
      println!(
        "  {} {} ({}) {} {} {}",
        symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
        name,
        new.kind,
        truncate_hash(&old.hash.0).if_supports_color(Stream::Stdout, |s| s.dimmed()),
        symbols::ARROW,
        truncate_hash(&new.hash.0)
      );
    } else {
      println!(
        "  {} {} ({})",
        symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
        name,
        new.kind
      );
    }
  }

  for name in &diff.to_delete {
    let entry = &before.resources[name];
    println!(
      "  {} {} ({})",
      symbols::REMOVE.if_supports_color(Stream::Stdout, |s| s.red()),
      name,
      entry.kind
    );
  }

  println!();
  println!(
    "{} to create, {} to update, {} to delete, {} unchanged",
    diff.to_create.len(),
    diff.to_update.len(),
    diff.to_delete.len(),
    diff.unchanged.len()
  );
}
