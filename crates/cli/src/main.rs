mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fnship_lib::consts::DEFAULT_CONFIG_FILE;

use crate::output::OutputFormat;

/// fnship - reconcile declared serverless functions with the hosting platform
#[derive(Parser)]
#[command(name = "fnship")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Deploy document
  #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE, env = "FNSHIP_CONFIG")]
  config: PathBuf,

  #[command(flatten)]
  remote: RemoteArgs,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

/// Platform connection settings.
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
  /// Platform region
  #[arg(long, global = true, env = "AWS_REGION")]
  pub region: Option<String>,

  /// Access key id (falls back to AWS_ACCESS_KEY_ID)
  #[arg(long, global = true)]
  pub access_key_id: Option<String>,

  /// Secret access key (falls back to AWS_SECRET_ACCESS_KEY)
  #[arg(long, global = true)]
  pub secret_access_key: Option<String>,

  /// Override the platform endpoint URL
  #[arg(long, global = true, env = "FNSHIP_ENDPOINT")]
  pub endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Show what a deploy would do without changing anything
  Plan,

  /// Create or update every declared function, then prune if configured
  Deploy {
    /// Skip pruning even when a retention policy is configured
    #[arg(long)]
    no_prune: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Give up waiting on the platform after this long (e.g. "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,
  },

  /// Delete old unreferenced versions
  Prune {
    /// Unreferenced versions to keep per function (defaults to Prune.RetainCount)
    #[arg(long)]
    retain: Option<usize>,

    /// Also prune layer versions
    #[arg(long)]
    include_layers: bool,

    /// Show what would be deleted without deleting it
    #[arg(long)]
    dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,
  },

  /// Print the dependency fingerprint of the shared layer
  Fingerprint,
}

fn init_logging(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("warn,fnship=debug,fnship_lib=debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match cli.command {
    Commands::Plan => cmd::cmd_plan(&cli.config, &cli.remote, cli.output),
    Commands::Deploy {
      no_prune,
      report,
      timeout,
    } => cmd::cmd_deploy(&cli.config, &cli.remote, no_prune, report.as_deref(), timeout, cli.output),
    Commands::Prune {
      retain,
      include_layers,
      dry_run,
      yes,
    } => cmd::cmd_prune(&cli.config, &cli.remote, retain, include_layers, dry_run, yes, cli.output),
    Commands::Fingerprint => cmd::cmd_fingerprint(&cli.config, cli.output),
  }
}
