//! Diff between a desired manifest and a previously synthesized one.
//!
//! This mirrors what the provisioning engine computes before applying. The
//! stack owns no state of its own, so `current` is whatever manifest the
//! operator supplies (typically the output of an earlier synth).

use std::collections::BTreeSet;

use serde::Serialize;

use super::types::Manifest;

/// Changes needed to move `current` to `desired`, by logical name.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StateDiff {
  /// In desired, not in current.
  pub to_create: Vec<String>,

  /// In both, with a different hash.
  pub to_update: Vec<String>,

  /// In current, not in desired.
  pub to_delete: Vec<String>,

  /// In both, same hash.
  pub unchanged: Vec<String>,
}

impl StateDiff {
  /// Returns true if there are no changes to make.
  pub fn is_empty(&self) -> bool {
    self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
  }

  pub fn change_count(&self) -> usize {
    self.to_create.len() + self.to_update.len() + self.to_delete.len()
  }
}

/// Compute the diff between `desired` and `current`.
///
/// With no current manifest every desired entry is a create. Names come out
/// sorted, so the result is deterministic.
pub fn compute_diff(desired: &Manifest, current: Option<&Manifest>) -> StateDiff {
  let mut diff = StateDiff::default();

  let desired_names: BTreeSet<&String> = desired.resources.keys().collect();
  let current_names: BTreeSet<&String> = current.map(|m| m.resources.keys().collect()).unwrap_or_default();

  for name in desired_names.difference(&current_names) {
    diff.to_create.push((*name).clone());
  }

  for name in current_names.difference(&desired_names) {
    diff.to_delete.push((*name).clone());
  }

  if let Some(current) = current {
    for name in desired_names.intersection(&current_names) {
      let same = desired.resources[*name].hash == current.resources[*name].hash;
      if same {
        diff.unchanged.push((*name).clone());
      } else {
        diff.to_update.push((*name).clone());
      }
    }
  }

  diff
}
