//! Retention-based cleanup of published function and layer versions.
//!
//! For each declared function, versions are split into *used* (the mutable
//! head plus every alias target) and *unused*. While more than `retain`
//! unused versions remain, the oldest is deleted.
//!
//! The layer pass runs afterwards. Every layer ARN attached to a surviving
//! version of any declared function is protected; among the remaining layer
//! versions, the oldest are deleted while more than `retain` remain.
//!
//! A delete failure aborts the rest of the current pass. A failed function
//! pass also skips the layer pass, since its protection set would be
//! incomplete.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::FunctionSpec;
use crate::consts::HEAD_VERSION;
use crate::gateway::{AliasInfo, FunctionVersion, Gateway, GatewayError, LayerVersionInfo};

#[derive(Debug, Error)]
pub enum PruneError {
  #[error("failed to list versions of '{function}': {source}")]
  ListVersions {
    function: String,
    #[source]
    source: GatewayError,
  },

  #[error("failed to list aliases of '{function}': {source}")]
  ListAliases {
    function: String,
    #[source]
    source: GatewayError,
  },

  #[error("failed to delete version {version} of '{function}': {source}")]
  DeleteVersion {
    function: String,
    version: String,
    #[source]
    source: GatewayError,
  },

  #[error("failed to list versions of layer '{layer}': {source}")]
  ListLayerVersions {
    layer: String,
    #[source]
    source: GatewayError,
  },

  #[error("failed to delete version {version} of layer '{layer}': {source}")]
  DeleteLayerVersion {
    layer: String,
    version: u64,
    #[source]
    source: GatewayError,
  },
}

/// What to prune and how much to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOptions {
  /// Unused versions kept per function, and unprotected layer versions kept.
  pub retain: usize,
  pub include_layers: bool,
  /// Report what would be deleted without deleting it.
  pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionPruneReport {
  pub name: String,
  pub protected: Vec<String>,
  pub deleted: Vec<String>,
  pub retained: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerPruneReport {
  pub name: String,
  pub protected: Vec<u64>,
  pub deleted: Vec<u64>,
  pub retained: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
  pub dry_run: bool,
  pub functions: Vec<FunctionPruneReport>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub layer: Option<LayerPruneReport>,
}

impl PruneReport {
  pub fn versions_deleted(&self) -> usize {
    self.functions.iter().map(|f| f.deleted.len()).sum()
  }

  pub fn layers_deleted(&self) -> usize {
    self.layer.as_ref().map(|l| l.deleted.len()).unwrap_or(0)
  }
}

/// Versions split by whether anything still points at them. Both halves
/// keep platform (oldest first) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPartition {
  pub used: Vec<FunctionVersion>,
  pub unused: Vec<FunctionVersion>,
}

/// Split versions into those referenced by the head or an alias and the rest.
pub fn partition_versions(versions: Vec<FunctionVersion>, aliases: &[AliasInfo]) -> VersionPartition {
  let mut protected: HashSet<&str> = aliases.iter().map(|a| a.function_version.as_str()).collect();
  protected.insert(HEAD_VERSION);

  let (used, unused) = versions
    .into_iter()
    .partition(|v| protected.contains(v.version.as_str()));
  VersionPartition { used, unused }
}

/// Number of oldest unused versions to delete so that `retain` remain.
pub fn expired_count(unused: usize, retain: usize) -> usize {
  unused.saturating_sub(retain)
}

/// Layer versions to delete, oldest first.
///
/// Protected versions are never selected and do not count toward `retain`.
pub fn select_layer_deletions<'a>(
  versions: &'a [LayerVersionInfo],
  protected: &HashSet<String>,
  retain: usize,
) -> Vec<&'a LayerVersionInfo> {
  let candidates: Vec<&LayerVersionInfo> = versions.iter().filter(|v| !protected.contains(&v.arn)).collect();
  let excess = candidates.len().saturating_sub(retain);
  candidates.into_iter().take(excess).collect()
}

/// Prune old versions of every declared function and, optionally, the layer.
pub async fn prune(
  gateway: &dyn Gateway,
  specs: &[FunctionSpec],
  layer_name: &str,
  options: &PruneOptions,
) -> Result<PruneReport, PruneError> {
  let mut report = PruneReport {
    dry_run: options.dry_run,
    ..Default::default()
  };
  let mut attached = HashSet::new();

  for spec in specs {
    let (function_report, layers) = prune_function(gateway, &spec.function_name, options).await?;
    attached.extend(layers);
    report.functions.push(function_report);
  }

  if options.include_layers {
    report.layer = Some(prune_layer(gateway, layer_name, &attached, options).await?);
  }

  info!(
    versions_deleted = report.versions_deleted(),
    layers_deleted = report.layers_deleted(),
    dry_run = options.dry_run,
    "prune complete"
  );

  Ok(report)
}

/// Prune one function. Also returns the layer ARNs attached to its surviving versions.
async fn prune_function(
  gateway: &dyn Gateway,
  name: &str,
  options: &PruneOptions,
) -> Result<(FunctionPruneReport, Vec<String>), PruneError> {
  let versions = match gateway.list_versions(name).await {
    Ok(versions) => versions,
    Err(e) if e.is_not_found() => {
      debug!(function = %name, "function does not exist; nothing to prune");
      return Ok((
        FunctionPruneReport {
          name: name.to_string(),
          ..Default::default()
        },
        Vec::new(),
      ));
    }
    Err(source) => {
      return Err(PruneError::ListVersions {
        function: name.to_string(),
        source,
      });
    }
  };

  let aliases = gateway
    .list_aliases(name)
    .await
    .map_err(|source| PruneError::ListAliases {
      function: name.to_string(),
      source,
    })?;

  let VersionPartition { used, unused } = partition_versions(versions, &aliases);
  let expired = expired_count(unused.len(), options.retain);

  let mut report = FunctionPruneReport {
    name: name.to_string(),
    protected: used.iter().map(|v| v.version.clone()).collect(),
    ..Default::default()
  };

  for version in &unused[..expired] {
    if !options.dry_run {
      gateway
        .delete_version(name, &version.version)
        .await
        .map_err(|source| PruneError::DeleteVersion {
          function: name.to_string(),
          version: version.version.clone(),
          source,
        })?;
    }
    info!(function = %name, version = %version.version, dry_run = options.dry_run, "deleted function version");
    report.deleted.push(version.version.clone());
  }

  let survivors = used.iter().chain(&unused[expired..]);
  let layers = survivors.flat_map(|v| v.layers.iter().cloned()).collect();
  report.retained = unused[expired..].iter().map(|v| v.version.clone()).collect();

  Ok((report, layers))
}

async fn prune_layer(
  gateway: &dyn Gateway,
  layer: &str,
  protected: &HashSet<String>,
  options: &PruneOptions,
) -> Result<LayerPruneReport, PruneError> {
  let versions = gateway
    .list_layer_versions(layer)
    .await
    .map_err(|source| PruneError::ListLayerVersions {
      layer: layer.to_string(),
      source,
    })?;

  let doomed = select_layer_deletions(&versions, protected, options.retain);
  let doomed_versions: HashSet<u64> = doomed.iter().map(|v| v.version).collect();

  let mut report = LayerPruneReport {
    name: layer.to_string(),
    ..Default::default()
  };

  for info in doomed {
    if !options.dry_run {
      gateway
        .delete_layer_version(layer, info.version)
        .await
        .map_err(|source| PruneError::DeleteLayerVersion {
          layer: layer.to_string(),
          version: info.version,
          source,
        })?;
    }
    info!(layer = %layer, version = info.version, dry_run = options.dry_run, "deleted layer version");
    report.deleted.push(info.version);
  }

  for info in &versions {
    if protected.contains(&info.arn) {
      debug!(layer = %layer, version = info.version, "layer version still attached; keeping");
      report.protected.push(info.version);
    } else if !doomed_versions.contains(&info.version) {
      report.retained.push(info.version);
    }
  }

  Ok(report)
}
