//! Implementation of the `fnship prune` command.

use std::path::Path;

use anyhow::{Context, Result, bail};

use fnship_lib::prune::PruneOptions;

use crate::RemoteArgs;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};
use crate::prompts::confirm;

pub fn cmd_prune(
  config_path: &Path,
  remote: &RemoteArgs,
  retain: Option<usize>,
  include_layers: bool,
  dry_run: bool,
  yes: bool,
  output: OutputFormat,
) -> Result<()> {
  let config = super::load_config(config_path)?;
  let policy = config.prune.unwrap_or_default();

  let Some(retain) = retain.or(policy.retain_count) else {
    bail!("No retention count: pass --retain or set Prune.RetainCount");
  };
  let options = PruneOptions {
    retain,
    include_layers: include_layers || policy.include_layers,
    dry_run,
  };

  if !dry_run {
    let message = format!(
      "Delete unreferenced versions of {} function(s), keeping {} each?",
      config.functions.len(),
      retain
    );
    if !confirm(&message, yes)? {
      print_info("Prune cancelled");
      return Ok(());
    }
  }

  let reconciler = super::reconciler(remote)?;
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(reconciler.prune_with(&config, &options))
    .context("Prune failed")?;

  if output.is_json() {
    return print_json(&report);
  }

  println!();
  for function in &report.functions {
    if !function.deleted.is_empty() {
      print_stat(&function.name, &format!("removed {}", function.deleted.join(", ")));
    }
  }
  if let Some(layer) = report.layer.as_ref().filter(|l| !l.deleted.is_empty()) {
    let versions: Vec<String> = layer.deleted.iter().map(u64::to_string).collect();
    print_stat(&layer.name, &format!("removed layer versions {}", versions.join(", ")));
  }

  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Prune complete!");
  }
  print_stat("Versions removed", &report.versions_deleted().to_string());
  print_stat("Layer versions removed", &report.layers_deleted().to_string());

  Ok(())
}
