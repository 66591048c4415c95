//! Deployment planning.
//!
//! [`build_plan`] is a pure function of the declared functions, the observed
//! platform state and the freshly computed layer fingerprint. It performs no
//! I/O, so the same inputs always produce the same plan.

use serde::Serialize;

use crate::collect::{ObservedFunctions, ObservedLayer};
use crate::config::FunctionSpec;
use crate::util::hash::LayerFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionAction {
  Create,
  Update,
}

impl std::fmt::Display for FunctionAction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FunctionAction::Create => write!(f, "create"),
      FunctionAction::Update => write!(f, "update"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerAction {
  /// No dependency manifest; no layer is managed.
  None,
  /// The newest published layer already matches the fingerprint.
  Reuse,
  /// A new layer version must be built and published.
  Create,
}

impl std::fmt::Display for LayerAction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LayerAction::None => write!(f, "none"),
      LayerAction::Reuse => write!(f, "reuse"),
      LayerAction::Create => write!(f, "create"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFunction {
  pub name: String,
  pub action: FunctionAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerPlan {
  pub name: String,
  pub action: LayerAction,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fingerprint: Option<LayerFingerprint>,
  /// Set only for [`LayerAction::Reuse`].
  #[serde(skip_serializing_if = "Option::is_none")]
  pub arn: Option<String>,
}

/// Actions for one run. Functions keep declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
  pub functions: Vec<PlannedFunction>,
  pub layer: LayerPlan,
}

impl DeploymentPlan {
  pub fn action_for(&self, name: &str) -> Option<FunctionAction> {
    self.functions.iter().find(|f| f.name == name).map(|f| f.action)
  }

  pub fn count(&self, action: FunctionAction) -> usize {
    self.functions.iter().filter(|f| f.action == action).count()
  }

  pub fn manages_layer(&self) -> bool {
    self.layer.action != LayerAction::None
  }
}

/// Decide what to do for each declared function and for the shared layer.
///
/// A function is updated when it exists and created otherwise. The layer is
/// reused only when the newest published version carries exactly the fresh
/// fingerprint; a missing manifest means no layer is managed at all.
pub fn build_plan(
  specs: &[FunctionSpec],
  observed: &ObservedFunctions,
  observed_layer: Option<&ObservedLayer>,
  layer_name: &str,
  fingerprint: Option<&LayerFingerprint>,
) -> DeploymentPlan {
  let functions = specs
    .iter()
    .map(|spec| {
      let exists = observed
        .get(&spec.function_name)
        .map(|o| o.exists())
        .unwrap_or(false);
      PlannedFunction {
        name: spec.function_name.clone(),
        action: if exists {
          FunctionAction::Update
        } else {
          FunctionAction::Create
        },
      }
    })
    .collect();

  let layer = match fingerprint {
    None => LayerPlan {
      name: layer_name.to_string(),
      action: LayerAction::None,
      fingerprint: None,
      arn: None,
    },
    Some(fresh) => match observed_layer {
      Some(current) if current.fingerprint.as_deref() == Some(fresh.as_str()) => LayerPlan {
        name: layer_name.to_string(),
        action: LayerAction::Reuse,
        fingerprint: Some(fresh.clone()),
        arn: Some(current.arn.clone()),
      },
      _ => LayerPlan {
        name: layer_name.to_string(),
        action: LayerAction::Create,
        fingerprint: Some(fresh.clone()),
        arn: None,
      },
    },
  };

  DeploymentPlan { functions, layer }
}
