//! Apply a deployment plan.
//!
//! Order of operations:
//! 1. Resolve the layer ARN: reuse the planned one, or build and publish a new
//!    layer version. The function code archive is built concurrently.
//! 2. For each function in plan order:
//!    - create: create (published on create) -> settle -> publish
//!    - update: update code -> settle -> update configuration -> settle -> publish
//!
//! The plan itself is never modified; the resolved layer ARN is threaded
//! through explicitly and recorded in the [`ApplyReport`]. The first function
//! failure stops the loop; functions after it are reported as not attempted.
//!
//! Every platform call and the layer install run under the shared deadline in
//! [`ApplyOptions`]; running past it fails the current phase.

pub mod install;
pub mod package;
pub mod settle;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{DeployConfig, FunctionSpec};
use crate::gateway::{CreateFunctionRequest, FunctionOverrides, Gateway, GatewayError};
use crate::plan::{DeploymentPlan, FunctionAction, LayerAction};

pub use install::{DependencyInstaller, InstallError, NpmInstaller, build_layer_archive};
pub use package::{Archive, IgnoreSet, PackageError, archive_directory, build_function_archive};
pub use settle::{SettleError, SettlePolicy, SettleState, wait_until_settled, within};

/// Step of a function's apply sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyPhase {
  Create,
  UpdateCode,
  UpdateConfig,
  Publish,
}

impl std::fmt::Display for ApplyPhase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ApplyPhase::Create => write!(f, "create"),
      ApplyPhase::UpdateCode => write!(f, "update-code"),
      ApplyPhase::UpdateConfig => write!(f, "update-config"),
      ApplyPhase::Publish => write!(f, "publish"),
    }
  }
}

/// Failure of one function's apply sequence.
#[derive(Debug, Error)]
pub enum FunctionApplyError {
  #[error("{phase} failed: {source}")]
  Gateway {
    phase: ApplyPhase,
    #[source]
    source: GatewayError,
  },

  #[error("{phase} did not settle: {source}")]
  Settle {
    phase: ApplyPhase,
    #[source]
    source: SettleError,
  },

  #[error("{phase} did not finish before the run deadline")]
  DeadlineExceeded { phase: ApplyPhase },
}

impl FunctionApplyError {
  pub fn phase(&self) -> ApplyPhase {
    match self {
      FunctionApplyError::Gateway { phase, .. }
      | FunctionApplyError::Settle { phase, .. }
      | FunctionApplyError::DeadlineExceeded { phase } => *phase,
    }
  }
}

/// Failures that stop apply before any function is touched.
#[derive(Debug, Error)]
pub enum ApplyError {
  #[error("failed to package function code from {path}: {source}")]
  Package {
    path: PathBuf,
    #[source]
    source: PackageError,
  },

  #[error("failed to build layer '{layer}': {source}")]
  Install {
    layer: String,
    #[source]
    source: InstallError,
  },

  #[error("failed to publish layer '{layer}': {source}")]
  PublishLayer {
    layer: String,
    #[source]
    source: GatewayError,
  },

  #[error("layer '{layer}' was not ready before the run deadline")]
  DeadlineExceeded { layer: String },

  #[error("packaging task failed: {0}")]
  Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum FunctionOutcome {
  Applied { version: String },
  Failed { phase: ApplyPhase, error: String },
  NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionReport {
  pub name: String,
  pub action: FunctionAction,
  #[serde(flatten)]
  pub outcome: FunctionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerReport {
  pub name: String,
  pub action: LayerAction,
  /// ARN attached to every function in this run.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub arn: Option<String>,
}

/// Per-function results of one apply, in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
  pub layer: LayerReport,
  pub functions: Vec<FunctionReport>,
}

impl ApplyReport {
  pub fn is_success(&self) -> bool {
    self
      .functions
      .iter()
      .all(|f| matches!(f.outcome, FunctionOutcome::Applied { .. }))
  }

  /// The function that stopped the run, if any.
  pub fn failure(&self) -> Option<&FunctionReport> {
    self
      .functions
      .iter()
      .find(|f| matches!(f.outcome, FunctionOutcome::Failed { .. }))
  }

  pub fn applied(&self) -> impl Iterator<Item = (&str, &str)> {
    self.functions.iter().filter_map(|f| match &f.outcome {
      FunctionOutcome::Applied { version } => Some((f.name.as_str(), version.as_str())),
      _ => None,
    })
  }
}

/// Runtime knobs for apply.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
  pub settle: SettlePolicy,
  /// Shared run deadline; platform calls, the layer install and settle waits
  /// give up once it passes.
  pub deadline: Option<Instant>,
}

/// Execute `plan` against the platform.
///
/// Returns `Err` only for failures before the function loop (packaging or the
/// layer). Function failures are recorded in the report.
pub async fn apply(
  gateway: &dyn Gateway,
  installer: &dyn DependencyInstaller,
  plan: &DeploymentPlan,
  config: &DeployConfig,
  options: &ApplyOptions,
) -> Result<ApplyReport, ApplyError> {
  let (layer_arn, code) = tokio::try_join!(
    resolve_layer(gateway, installer, plan, config, options.deadline),
    package_code(config)
  )?;

  let layer = LayerReport {
    name: plan.layer.name.clone(),
    action: plan.layer.action,
    arn: layer_arn.clone(),
  };

  let mut functions = Vec::with_capacity(plan.functions.len());
  let mut stopped = false;

  for planned in &plan.functions {
    if stopped {
      functions.push(FunctionReport {
        name: planned.name.clone(),
        action: planned.action,
        outcome: FunctionOutcome::NotAttempted,
      });
      continue;
    }

    let Some(spec) = config.functions.iter().find(|s| s.function_name == planned.name) else {
      warn!(function = %planned.name, "planned function has no declaration; skipping");
      continue;
    };

    let result = match planned.action {
      FunctionAction::Create => create_function(gateway, spec, &code, layer_arn.as_deref(), options).await,
      FunctionAction::Update => update_function(gateway, spec, &code, layer_arn.as_deref(), options).await,
    };

    let outcome = match result {
      Ok(version) => {
        info!(function = %planned.name, action = %planned.action, version = %version, "function deployed");
        FunctionOutcome::Applied { version }
      }
      Err(e) => {
        error!(function = %planned.name, phase = %e.phase(), error = %e, "function apply failed");
        stopped = true;
        FunctionOutcome::Failed {
          phase: e.phase(),
          error: e.to_string(),
        }
      }
    };

    functions.push(FunctionReport {
      name: planned.name.clone(),
      action: planned.action,
      outcome,
    });
  }

  Ok(ApplyReport { layer, functions })
}

async fn resolve_layer(
  gateway: &dyn Gateway,
  installer: &dyn DependencyInstaller,
  plan: &DeploymentPlan,
  config: &DeployConfig,
  deadline: Option<Instant>,
) -> Result<Option<String>, ApplyError> {
  let layer = &plan.layer;
  let expired = || ApplyError::DeadlineExceeded {
    layer: layer.name.clone(),
  };
  match (layer.action, &layer.fingerprint) {
    (LayerAction::None, _) => Ok(None),
    (LayerAction::Reuse, _) => {
      info!(layer = %layer.name, arn = ?layer.arn, "reusing layer");
      Ok(layer.arn.clone())
    }
    (LayerAction::Create, None) => Ok(None),
    (LayerAction::Create, Some(fingerprint)) => {
      let archive = within(deadline, build_layer_archive(installer, &config.project_dir))
        .await
        .ok_or_else(expired)?
        .map_err(|source| ApplyError::Install {
          layer: layer.name.clone(),
          source,
        })?;

      let published = within(deadline, gateway.publish_layer_version(&layer.name, fingerprint, &archive.bytes))
        .await
        .ok_or_else(expired)?
        .map_err(|source| ApplyError::PublishLayer {
          layer: layer.name.clone(),
          source,
        })?;

      info!(layer = %layer.name, version = published.version, fingerprint = %fingerprint, "published layer");
      Ok(Some(published.arn))
    }
  }
}

async fn package_code(config: &DeployConfig) -> Result<Archive, ApplyError> {
  let root = config.project_dir.clone();
  let ignore = config.ignore.clone();
  tokio::task::spawn_blocking(move || {
    build_function_archive(&root, &ignore).map_err(|source| ApplyError::Package { path: root.clone(), source })
  })
  .await
  .map_err(|e| ApplyError::Task(e.to_string()))?
}

async fn settle(
  gateway: &dyn Gateway,
  name: &str,
  phase: ApplyPhase,
  options: &ApplyOptions,
) -> Result<(), FunctionApplyError> {
  wait_until_settled(gateway, name, &options.settle, options.deadline)
    .await
    .map(|_| ())
    .map_err(|source| FunctionApplyError::Settle { phase, source })
}

/// One mutating call, bounded by the run deadline.
async fn call<T>(
  options: &ApplyOptions,
  phase: ApplyPhase,
  fut: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, FunctionApplyError> {
  match within(options.deadline, fut).await {
    Some(result) => result.map_err(|source| FunctionApplyError::Gateway { phase, source }),
    None => Err(FunctionApplyError::DeadlineExceeded { phase }),
  }
}

async fn create_function(
  gateway: &dyn Gateway,
  spec: &FunctionSpec,
  code: &Archive,
  layer_arn: Option<&str>,
  options: &ApplyOptions,
) -> Result<String, FunctionApplyError> {
  let name = spec.function_name.as_str();
  let request = CreateFunctionRequest::from_spec(spec, layer_arn);

  call(options, ApplyPhase::Create, gateway.create_function(&request, &code.bytes)).await?;
  settle(gateway, name, ApplyPhase::Create, options).await?;

  call(options, ApplyPhase::Publish, gateway.publish_version(name)).await
}

async fn update_function(
  gateway: &dyn Gateway,
  spec: &FunctionSpec,
  code: &Archive,
  layer_arn: Option<&str>,
  options: &ApplyOptions,
) -> Result<String, FunctionApplyError> {
  let name = spec.function_name.as_str();

  call(options, ApplyPhase::UpdateCode, gateway.update_function_code(name, &code.bytes)).await?;
  settle(gateway, name, ApplyPhase::UpdateCode, options).await?;

  let overrides = FunctionOverrides::from_spec(spec, layer_arn);
  call(options, ApplyPhase::UpdateConfig, gateway.update_function_config(name, &overrides)).await?;
  settle(gateway, name, ApplyPhase::UpdateConfig, options).await?;

  call(options, ApplyPhase::Publish, gateway.publish_version(name)).await
}
