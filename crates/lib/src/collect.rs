//! Observe the platform's current state for declared functions and the layer.
//!
//! Function lookups are independent, so they run concurrently on a
//! [`JoinSet`] and are joined in full before any result is used. A missing
//! function is an observation, not an error; every other lookup failure
//! aborts collection.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::config::FunctionSpec;
use crate::gateway::{FunctionConfig, Gateway, GatewayError, Lookup};

#[derive(Debug, Error)]
pub enum CollectError {
  #[error("failed to read function '{name}': {source}")]
  Function {
    name: String,
    #[source]
    source: GatewayError,
  },

  #[error("failed to read layer '{layer}': {source}")]
  Layer {
    layer: String,
    #[source]
    source: GatewayError,
  },

  #[error("lookup task for '{name}' did not complete: {message}")]
  Task { name: String, message: String },
}

/// What the platform reports for one declared function.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedFunction {
  pub name: String,
  /// `None` when the function does not exist yet.
  pub config: Option<FunctionConfig>,
}

impl ObservedFunction {
  pub fn exists(&self) -> bool {
    self.config.is_some()
  }
}

/// The most recently published version of the shared layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedLayer {
  pub version: u64,
  pub arn: String,
  /// Fingerprint recorded when the version was published.
  pub fingerprint: Option<String>,
}

/// Observations keyed by function name.
pub type ObservedFunctions = HashMap<String, ObservedFunction>;

/// Look up every declared function concurrently.
///
/// Returns one observation per declared function. If any lookup fails, the
/// first failure in declaration order is returned after all lookups finish.
pub async fn collect_functions(
  gateway: Arc<dyn Gateway>,
  specs: &[FunctionSpec],
) -> Result<ObservedFunctions, CollectError> {
  let mut join_set = JoinSet::new();

  for (index, spec) in specs.iter().enumerate() {
    let gateway = gateway.clone();
    let name = spec.function_name.clone();

    join_set.spawn(async move {
      let result = gateway.get_function_config(&name).await;
      (index, name, result)
    });
  }

  let mut slots: Vec<Option<Result<ObservedFunction, CollectError>>> = (0..specs.len()).map(|_| None).collect();

  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((index, name, Ok(lookup))) => {
        let config = match lookup {
          Lookup::Found(config) => Some(config),
          Lookup::NotFound => None,
        };
        debug!(function = %name, exists = config.is_some(), "observed function");
        slots[index] = Some(Ok(ObservedFunction { name, config }));
      }
      Ok((index, name, Err(source))) => {
        slots[index] = Some(Err(CollectError::Function { name, source }));
      }
      Err(e) => {
        error!(error = %e, "function lookup task panicked");
      }
    }
  }

  let mut observed = HashMap::with_capacity(specs.len());
  for (spec, slot) in specs.iter().zip(slots) {
    let function = match slot {
      Some(result) => result?,
      None => {
        return Err(CollectError::Task {
          name: spec.function_name.clone(),
          message: "task panicked".to_string(),
        });
      }
    };
    observed.insert(function.name.clone(), function);
  }

  Ok(observed)
}

/// Look up the newest published version of `layer`.
pub async fn collect_layer(gateway: &dyn Gateway, layer: &str) -> Result<Option<ObservedLayer>, CollectError> {
  let lookup = gateway
    .latest_layer_version(layer)
    .await
    .map_err(|source| CollectError::Layer {
      layer: layer.to_string(),
      source,
    })?;

  let observed = lookup.found().map(|info| ObservedLayer {
    version: info.version,
    arn: info.arn,
    fingerprint: info.description,
  });

  debug!(layer = %layer, found = observed.is_some(), "observed layer");
  Ok(observed)
}
