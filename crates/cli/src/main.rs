mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use shiplane_lib::consts::DEFAULT_ASSEMBLY_DIR;

/// shiplane - compose a build/deploy pipeline and its infrastructure
#[derive(Parser)]
#[command(name = "shiplane")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compose the stack and write its manifest to an assembly directory
  Synth {
    /// Assembly directory
    #[arg(short, long, default_value = DEFAULT_ASSEMBLY_DIR)]
    out: PathBuf,

    /// Output the submission as JSON
    #[arg(long)]
    json: bool,
  },

  /// Compare the composed stack against a previously synthesized manifest
  Diff {
    /// Path to a manifest.json written by `synth`
    previous: PathBuf,

    /// Output the diff as JSON
    #[arg(long)]
    json: bool,
  },

  /// Show resolved configuration and where each value came from
  Config {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the deploy project's script
  Script {
    /// Substitute the deploy project's environment into each command
    #[arg(long)]
    render: bool,

    /// Value for BUILD_VERSION when rendering
    #[arg(long, value_name = "V")]
    build_version: Option<String>,

    /// Value for the registry repository URI when rendering
    #[arg(long, value_name = "U")]
    repository_uri: Option<String>,

    /// Print the script as YAML
    #[arg(long, conflicts_with = "render")]
    yaml: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Synth { out, json } => cmd::cmd_synth(&out, json),
    Commands::Diff { previous, json } => cmd::cmd_diff(&previous, cli.verbose, json),
    Commands::Config { json } => cmd::cmd_config(json),
    Commands::Script {
      render,
      build_version,
      repository_uri,
      yaml,
    } => cmd::cmd_script(render, build_version, repository_uri, yaml),
  }
}
