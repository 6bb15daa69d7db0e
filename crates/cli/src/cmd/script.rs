//! Script command implementation.
//!
//! Prints the deploy project's inline script, either as written or with the
//! deploy action's environment substituted in.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use shiplane_lib::buildspec::PhaseName;
use shiplane_lib::config::Config;
use shiplane_lib::consts::{BUILD_VARIABLES_NAMESPACE, BUILD_VERSION_VAR};
use shiplane_lib::pipeline::StageKind;
use shiplane_lib::placeholder::{AttrRef, Attribute, KnownValues};
use shiplane_lib::stack::{DEPLOY_PROJECT_NAME, REGISTRY_NAME, compose};

use crate::output::{print_warning, symbols};

pub fn cmd_script(
  render: bool,
  build_version: Option<String>,
  repository_uri: Option<String>,
  yaml: bool,
) -> Result<()> {
  let stack = compose(&Config::from_env()).context("Failed to compose stack")?;
  let project = stack
    .project(DEPLOY_PROJECT_NAME)
    .context("Deploy project is missing from the stack")?;
  let script = project
    .inline_script()
    .context("Deploy project has no inline script")?;

  if yaml {
    print!("{}", script.to_yaml().context("Failed to render script as YAML")?);
    return Ok(());
  }

  if !render {
    let phases: Vec<(PhaseName, Vec<String>)> = script
      .phases
      .iter()
      .map(|(name, phase)| (*name, phase.commands.clone()))
      .collect();
    print_phases(&phases);
    return Ok(());
  }

  let action = stack
    .pipeline()
    .and_then(|p| p.stage(StageKind::Deploy))
    .and_then(|s| s.actions.iter().find(|a| a.project() == Some(DEPLOY_PROJECT_NAME)))
    .context("No pipeline action runs the deploy project")?;

  // Without a concrete URI, keep the reference visible in the preview.
  let repo_ref = AttrRef::new(REGISTRY_NAME, Attribute::RepositoryUri);
  let uri = repository_uri.unwrap_or_else(|| repo_ref.token());
  let mut known = KnownValues::new().with_attribute(repo_ref, uri);

  match build_version {
    Some(version) => known.publish(BUILD_VARIABLES_NAMESPACE, BUILD_VERSION_VAR, version),
    None => print_warning(&format!(
      "{BUILD_VERSION_VAR} not given; the deploy stage would receive an empty value"
    )),
  }

  let env = action.resolve_environment(&project.environment, &known);
  print_phases(&script.render(&env));

  Ok(())
}

fn print_phases(phases: &[(PhaseName, Vec<String>)]) {
  for (name, commands) in phases {
    println!("{}:", name.if_supports_color(Stream::Stdout, |s| s.bold()));
    for command in commands {
      println!(
        "  {} {}",
        symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        command
      );
    }
  }
}
