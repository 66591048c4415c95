//! Implementation of the `fnship plan` command.
//!
//! Observes the platform and prints what a deploy would do. Nothing is
//! changed.

use std::path::Path;

use anyhow::{Context, Result};

use fnship_lib::PlanOutcome;
use fnship_lib::plan::{FunctionAction, LayerAction};

use crate::RemoteArgs;
use crate::output::{OutputFormat, print_json, print_stat, symbols, truncate_hash};

pub fn cmd_plan(config_path: &Path, remote: &RemoteArgs, output: OutputFormat) -> Result<()> {
  let config = super::load_config(config_path)?;
  let reconciler = super::reconciler(remote)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(reconciler.plan(&config)).context("Plan failed")?;

  if output.is_json() {
    print_json(&outcome)?;
  } else {
    print_plan(&outcome);
  }

  Ok(())
}

pub(super) fn print_plan(outcome: &PlanOutcome) {
  let plan = &outcome.plan;

  println!("Plan for service {}", outcome.service);
  for function in &plan.functions {
    let symbol = match function.action {
      FunctionAction::Create => symbols::ADD,
      FunctionAction::Update => symbols::MODIFY,
    };
    println!("  {} {} ({})", symbol, function.name, function.action);
  }

  let layer = &plan.layer;
  match (layer.action, &layer.fingerprint) {
    (LayerAction::None, _) => print_stat("Layer", "none (no dependencies declared)"),
    (action, Some(fingerprint)) => print_stat(
      "Layer",
      &format!("{} {} [{}]", action, layer.name, truncate_hash(fingerprint.as_str())),
    ),
    (action, None) => print_stat("Layer", &format!("{} {}", action, layer.name)),
  }
  print_stat("To create", &plan.count(FunctionAction::Create).to_string());
  print_stat("To update", &plan.count(FunctionAction::Update).to_string());
}
