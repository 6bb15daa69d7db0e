//! Config command implementation.
//!
//! Displays every resolved parameter and where its value came from.

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use shiplane_lib::config::{Config, Param, Provenance};

use crate::output::{print_json, print_stat};

pub fn cmd_config(json: bool) -> Result<()> {
  let config = Config::from_env();

  if json {
    return print_json(&config);
  }

  for (key, param) in config.entries() {
    print_stat(key, &format!("{} {}", param.value, origin(param).if_supports_color(Stream::Stdout, |s| s.dimmed())));
  }

  Ok(())
}

fn origin(param: &Param) -> String {
  match (param.provenance, param.env_var.as_deref()) {
    (Provenance::Fixed, _) => "(fixed)".to_string(),
    (Provenance::Default, Some(var)) => format!("(default, override with {var})"),
    (Provenance::Environment, Some(var)) => format!("(from {var})"),
    (_, None) => "(default)".to_string(),
  }
}
