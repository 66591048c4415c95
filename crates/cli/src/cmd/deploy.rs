//! Implementation of the `fnship deploy` command.
//!
//! Plans, applies and, when a retention policy is configured, prunes. The run
//! report can be written to a file for inspection; later runs never read it.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::info;

use fnship_lib::apply::FunctionOutcome;
use fnship_lib::{DeployReport, ReconcileOptions, RunError};

use crate::RemoteArgs;
use crate::output::{
  OutputFormat, format_duration, print_error, print_json, print_stat, print_success, print_warning, symbols,
};

pub fn cmd_deploy(
  config_path: &Path,
  remote: &RemoteArgs,
  no_prune: bool,
  report_path: Option<&Path>,
  timeout: Option<Duration>,
  output: OutputFormat,
) -> Result<()> {
  let start = Instant::now();
  let config = super::load_config(config_path)?;

  let options = ReconcileOptions {
    timeout,
    skip_prune: no_prune,
    ..Default::default()
  };
  let reconciler = super::reconciler(remote)?.with_options(options);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let (report, failure) = match rt.block_on(reconciler.deploy(&config)) {
    Ok(report) => (report, None),
    Err(RunError::FunctionFailed {
      function,
      phase,
      error,
      report,
    }) => (*report, Some(format!("Deploy of '{}' failed during {}: {}", function, phase, error))),
    Err(e) => return Err(e).context("Deploy failed"),
  };

  if let Some(path) = report_path {
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
    info!(path = %path.display(), "report written");
  }

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, start.elapsed());
  }

  if let Some(message) = failure {
    bail!(message);
  }

  Ok(())
}

fn print_report(report: &DeployReport, elapsed: Duration) {
  println!();
  for function in &report.apply.functions {
    match &function.outcome {
      FunctionOutcome::Applied { version } => {
        println!("  {} {} ({}) {} version {}", symbols::SUCCESS, function.name, function.action, symbols::ARROW, version)
      }
      FunctionOutcome::Failed { phase, .. } => {
        println!("  {} {} ({}) failed during {}", symbols::ERROR, function.name, function.action, phase)
      }
      FunctionOutcome::NotAttempted => println!("  {} {} not attempted", symbols::MINUS, function.name),
    }
  }

  if report.is_success() {
    print_success("Deploy complete!");
  } else {
    print_error("Deploy stopped");
  }
  print_stat("Versions published", &report.apply.applied().count().to_string());

  let layer = &report.apply.layer;
  match &layer.arn {
    Some(arn) => print_stat("Layer", &format!("{} ({})", arn, layer.action)),
    None => print_stat("Layer", "none"),
  }

  match &report.prune {
    Some(prune) => {
      print_stat("Versions pruned", &prune.versions_deleted().to_string());
      if prune.layer.is_some() {
        print_stat("Layer versions pruned", &prune.layers_deleted().to_string());
      }
    }
    None if !report.is_success() => print_warning("Pruning skipped"),
    None => {}
  }

  print_stat("Duration", &format_duration(elapsed));
}
