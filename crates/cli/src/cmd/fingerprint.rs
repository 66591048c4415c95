//! Implementation of the `fnship fingerprint` command.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use fnship_lib::util::hash::{LayerFingerprint, compute_layer_fingerprint};

use crate::output::{OutputFormat, print_info, print_json, print_stat};

#[derive(Serialize)]
struct FingerprintOutput {
  layer: String,
  dependencies: usize,
  fingerprint: Option<LayerFingerprint>,
}

/// Print the fingerprint the next deploy would compare against the newest layer.
pub fn cmd_fingerprint(config_path: &Path, output: OutputFormat) -> Result<()> {
  let config = super::load_config(config_path)?;
  let layer = config.layer_spec()?;

  let result = FingerprintOutput {
    layer: layer.name.clone(),
    dependencies: layer.manifest.as_ref().map(|m| m.len()).unwrap_or(0),
    fingerprint: layer.manifest.as_ref().map(compute_layer_fingerprint),
  };

  if output.is_json() {
    return print_json(&result);
  }

  match &result.fingerprint {
    Some(fingerprint) => {
      println!("{}", fingerprint);
      print_stat("Layer", &result.layer);
      print_stat("Dependencies", &result.dependencies.to_string());
    }
    None => print_info("No dependencies declared; no layer is managed"),
  }

  Ok(())
}
