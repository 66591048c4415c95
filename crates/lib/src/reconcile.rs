//! End-to-end reconciliation.
//!
//! A run moves through fixed phases:
//!
//! 1. configuration is already loaded and validated ([`DeployConfig`])
//! 2. the layer fingerprint is computed from the dependency manifest
//! 3. function state and the newest layer version are observed concurrently
//! 4. a [`DeploymentPlan`] is built
//! 5. the plan is applied
//! 6. old versions are pruned, when a retention policy is configured
//!
//! Any error stops the run at the phase where it occurred. A function that
//! fails to apply ends the run with [`RunError::FunctionFailed`], which still
//! carries the full [`DeployReport`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::apply::{
  ApplyError, ApplyOptions, ApplyPhase, ApplyReport, DependencyInstaller, FunctionOutcome, SettlePolicy, apply, within,
};
use crate::collect::{CollectError, collect_functions, collect_layer};
use crate::config::{ConfigError, DeployConfig, PrunePolicy};
use crate::gateway::Gateway;
use crate::plan::{DeploymentPlan, build_plan};
use crate::prune::{PruneError, PruneOptions, PruneReport, prune};
use crate::util::hash::{LayerFingerprint, compute_layer_fingerprint};

#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Collect(#[from] CollectError),

  #[error(transparent)]
  Apply(#[from] ApplyError),

  #[error(transparent)]
  Prune(#[from] PruneError),

  #[error("deploy of '{function}' failed during {phase}: {error}")]
  FunctionFailed {
    function: String,
    phase: ApplyPhase,
    error: String,
    report: Box<DeployReport>,
  },

  #[error("{stage} did not finish before the run deadline")]
  DeadlineExceeded { stage: &'static str },
}

impl RunError {
  /// The run report, when the run got as far as applying.
  pub fn report(&self) -> Option<&DeployReport> {
    match self {
      RunError::FunctionFailed { report, .. } => Some(report),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
  pub settle: SettlePolicy,
  /// Overall budget for the run. Planning, every platform call, the layer
  /// install, settle waits and pruning all stop once it is spent.
  pub timeout: Option<Duration>,
  /// Skip the prune phase even when a retention policy is configured.
  pub skip_prune: bool,
}

/// A plan plus the inputs it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
  pub service: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fingerprint: Option<LayerFingerprint>,
  pub plan: DeploymentPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
  pub service: String,
  pub plan: DeploymentPlan,
  pub apply: ApplyReport,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub prune: Option<PruneReport>,
}

impl DeployReport {
  pub fn is_success(&self) -> bool {
    self.apply.is_success()
  }
}

/// Drives plan, apply and prune against one gateway.
pub struct Reconciler {
  gateway: Arc<dyn Gateway>,
  installer: Arc<dyn DependencyInstaller>,
  options: ReconcileOptions,
}

impl Reconciler {
  pub fn new(gateway: Arc<dyn Gateway>, installer: Arc<dyn DependencyInstaller>) -> Self {
    Self {
      gateway,
      installer,
      options: ReconcileOptions::default(),
    }
  }

  pub fn with_options(mut self, options: ReconcileOptions) -> Self {
    self.options = options;
    self
  }

  /// Observe the platform and compute what a deploy would do. No mutations.
  pub async fn plan(&self, config: &DeployConfig) -> Result<PlanOutcome, RunError> {
    let layer = config.layer_spec()?;
    let fingerprint = layer.manifest.as_ref().map(compute_layer_fingerprint);
    debug!(layer = %layer.name, fingerprint = ?fingerprint, "computed layer fingerprint");

    let wants_layer = fingerprint.is_some();
    let functions = collect_functions(self.gateway.clone(), &config.functions);
    let observed_layer = async {
      if wants_layer {
        collect_layer(self.gateway.as_ref(), &layer.name).await
      } else {
        Ok(None)
      }
    };
    let (observed, observed_layer) = tokio::try_join!(functions, observed_layer)?;

    let plan = build_plan(
      &config.functions,
      &observed,
      observed_layer.as_ref(),
      &layer.name,
      fingerprint.as_ref(),
    );

    Ok(PlanOutcome {
      service: config.service.clone(),
      fingerprint,
      plan,
    })
  }

  /// Plan, apply and, if configured, prune.
  ///
  /// A function failure during apply skips pruning and returns
  /// [`RunError::FunctionFailed`] with the report attached.
  pub async fn deploy(&self, config: &DeployConfig) -> Result<DeployReport, RunError> {
    let deadline = self.options.timeout.map(|t| Instant::now() + t);
    let outcome = within(deadline, self.plan(config))
      .await
      .ok_or(RunError::DeadlineExceeded { stage: "plan" })??;

    info!(
      service = %config.service,
      functions = outcome.plan.functions.len(),
      layer = %outcome.plan.layer.action,
      "applying plan"
    );

    let apply_options = ApplyOptions {
      settle: self.options.settle,
      deadline,
    };
    let report = apply(
      self.gateway.as_ref(),
      self.installer.as_ref(),
      &outcome.plan,
      config,
      &apply_options,
    )
    .await?;

    let failed = report.functions.iter().find_map(|f| match &f.outcome {
      FunctionOutcome::Failed { phase, error } => Some((f.name.clone(), *phase, error.clone())),
      _ => None,
    });
    if let Some((function, phase, error)) = failed {
      warn!(function = %function, phase = %phase, "apply failed; skipping prune");
      return Err(RunError::FunctionFailed {
        function,
        phase,
        error,
        report: Box::new(DeployReport {
          service: config.service.clone(),
          plan: outcome.plan,
          apply: report,
          prune: None,
        }),
      });
    }

    let prune_report = match config.prune.and_then(prune_options) {
      Some(options) if !self.options.skip_prune => Some(
        within(deadline, self.prune_with(config, &options))
          .await
          .ok_or(RunError::DeadlineExceeded { stage: "prune" })??,
      ),
      _ => None,
    };

    Ok(DeployReport {
      service: config.service.clone(),
      plan: outcome.plan,
      apply: report,
      prune: prune_report,
    })
  }

  /// Prune with explicit options, independent of the configured policy.
  pub async fn prune_with(&self, config: &DeployConfig, options: &PruneOptions) -> Result<PruneReport, RunError> {
    Ok(prune(self.gateway.as_ref(), &config.functions, &config.layer_name, options).await?)
  }
}

/// Options from a configured policy; `None` when no retention count is set.
pub fn prune_options(policy: PrunePolicy) -> Option<PruneOptions> {
  policy.retain_count.map(|retain| PruneOptions {
    retain,
    include_layers: policy.include_layers,
    dry_run: false,
  })
}
