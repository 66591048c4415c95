//! Waiting for a function update to settle.
//!
//! After a mutating call the platform applies the change asynchronously. The
//! next dependent call must wait until the function reports a terminal update
//! status. The wait is a small state machine driven by a bounded retry policy:
//!
//! ```text
//! Pending --poll--> Pending | Successful | Failed
//! Pending --attempts exhausted or deadline--> TimedOut
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::consts::{SETTLE_INTERVAL, SETTLE_MAX_ATTEMPTS};
use crate::gateway::{FunctionConfig, Gateway, GatewayError, Lookup};

/// Bounded polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
  pub max_attempts: u32,
  pub interval: Duration,
}

impl Default for SettlePolicy {
  fn default() -> Self {
    Self {
      max_attempts: SETTLE_MAX_ATTEMPTS,
      interval: SETTLE_INTERVAL,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleState {
  Pending,
  Successful,
  Failed(String),
  TimedOut,
}

impl SettleState {
  /// Classify a configuration snapshot.
  ///
  /// A function is settled once its lifecycle state is no longer `Pending`
  /// and its last update is no longer `InProgress`. Either field reporting
  /// `Failed` is terminal.
  pub fn observe(config: &FunctionConfig) -> Self {
    if config.state.as_deref() == Some("Failed") {
      return SettleState::Failed(reason(config.state_reason.as_deref()));
    }

    match config.last_update_status.as_deref() {
      Some("Failed") => SettleState::Failed(reason(config.last_update_status_reason.as_deref())),
      Some("InProgress") => SettleState::Pending,
      _ if config.state.as_deref() == Some("Pending") => SettleState::Pending,
      _ => SettleState::Successful,
    }
  }

  pub fn is_terminal(&self) -> bool {
    !matches!(self, SettleState::Pending)
  }
}

fn reason(r: Option<&str>) -> String {
  r.filter(|s| !s.is_empty()).unwrap_or("no reason given").to_string()
}

#[derive(Debug, Error)]
pub enum SettleError {
  #[error("platform reported failure: {reason}")]
  Failed { reason: String },

  #[error("not settled after {attempts} attempt(s)")]
  TimedOut { attempts: u32 },

  #[error("function disappeared while settling")]
  Vanished,

  #[error(transparent)]
  Gateway(#[from] GatewayError),
}

/// Run `fut` under an optional shared deadline.
///
/// Returns `None` when the deadline passes first. A deadline that has already
/// passed is reported without polling `fut`.
pub async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
  match deadline {
    Some(at) if Instant::now() >= at => None,
    Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
    None => Some(fut.await),
  }
}

/// Poll until the function settles.
///
/// Returns the number of polls it took. Hitting `deadline` ends the wait with
/// the same [`SettleError::TimedOut`] as running out of attempts.
pub async fn wait_until_settled(
  gateway: &dyn Gateway,
  name: &str,
  policy: &SettlePolicy,
  deadline: Option<Instant>,
) -> Result<u32, SettleError> {
  let mut attempts = 0;
  let mut state = SettleState::Pending;

  while !state.is_terminal() {
    if attempts >= policy.max_attempts {
      state = SettleState::TimedOut;
      break;
    }

    if attempts > 0 {
      let wake = Instant::now() + policy.interval;
      match deadline {
        Some(at) if at <= wake => {
          tokio::time::sleep_until(at).await;
          state = SettleState::TimedOut;
          break;
        }
        _ => tokio::time::sleep_until(wake).await,
      }
    }

    attempts += 1;
    let Some(lookup) = within(deadline, gateway.get_function_config(name)).await else {
      state = SettleState::TimedOut;
      break;
    };

    state = match lookup? {
      Lookup::Found(config) => SettleState::observe(&config),
      Lookup::NotFound => return Err(SettleError::Vanished),
    };

    debug!(function = %name, attempt = attempts, state = ?state, "settle poll");
  }

  match state {
    SettleState::Successful => Ok(attempts),
    SettleState::Failed(reason) => Err(SettleError::Failed { reason }),
    SettleState::Pending | SettleState::TimedOut => Err(SettleError::TimedOut { attempts }),
  }
}
