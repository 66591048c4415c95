//! Capability interface over the remote function-hosting platform.
//!
//! The reconciler never talks to the platform directly; it goes through the
//! narrow [`Gateway`] trait. Two implementations ship with the crate:
//! - [`LambdaGateway`]: signed REST client for the hosted platform
//! - `MemoryGateway`: in-process platform used by tests, behind the `testing`
//!   feature
//!
//! Lookups that may legitimately miss return [`Lookup`] instead of an error,
//! so "not found" is an ordinary branch for callers.

pub mod lambda;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod sigv4;
mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::util::hash::LayerFingerprint;

pub use lambda::{LambdaGateway, LambdaGatewayConfig};
#[cfg(any(test, feature = "testing"))]
pub use memory::{Call, MemoryGateway, Op};
pub use sigv4::Credentials;
pub use types::{
  AliasInfo, AttachedLayer, CreateFunctionRequest, FunctionConfig, FunctionOverrides, FunctionVersion,
  LayerVersionInfo, Lookup,
};

/// Errors reported by a gateway call.
#[derive(Debug, Error)]
pub enum GatewayError {
  /// The target does not exist on a call where absence is not expected.
  #[error("{operation} {target}: not found")]
  NotFound { operation: &'static str, target: String },

  /// The platform rejected the request.
  #[error("{operation} {target}: {code} (HTTP {status}): {message}")]
  Api {
    operation: &'static str,
    target: String,
    status: u16,
    code: String,
    message: String,
  },

  /// The request never produced a response.
  #[error("{operation} {target}: request failed: {source}")]
  Transport {
    operation: &'static str,
    target: String,
    #[source]
    source: reqwest::Error,
  },

  /// The response body could not be understood.
  #[error("{operation} {target}: unexpected response: {message}")]
  Decode {
    operation: &'static str,
    target: String,
    message: String,
  },
}

impl GatewayError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, GatewayError::NotFound { .. })
  }
}

/// Operations the reconciler needs from the platform.
///
/// Listing contracts:
/// - `list_versions` returns versions in publish order (oldest first), including
///   the mutable head.
/// - `list_layer_versions` returns layer versions oldest first.
/// - `latest_layer_version` returns the most recently published layer version.
#[async_trait]
pub trait Gateway: Send + Sync {
  async fn get_function_config(&self, name: &str) -> Result<Lookup<FunctionConfig>, GatewayError>;

  async fn create_function(&self, request: &CreateFunctionRequest, code: &[u8]) -> Result<(), GatewayError>;

  async fn update_function_code(&self, name: &str, code: &[u8]) -> Result<(), GatewayError>;

  async fn update_function_config(&self, name: &str, overrides: &FunctionOverrides) -> Result<(), GatewayError>;

  /// Publish an immutable version of the function's head; returns the version id.
  async fn publish_version(&self, name: &str) -> Result<String, GatewayError>;

  async fn list_versions(&self, name: &str) -> Result<Vec<FunctionVersion>, GatewayError>;

  async fn list_aliases(&self, name: &str) -> Result<Vec<AliasInfo>, GatewayError>;

  async fn delete_version(&self, name: &str, version: &str) -> Result<(), GatewayError>;

  async fn latest_layer_version(&self, layer: &str) -> Result<Lookup<LayerVersionInfo>, GatewayError>;

  /// Publish a layer archive with the fingerprint recorded as its description.
  async fn publish_layer_version(
    &self,
    layer: &str,
    fingerprint: &LayerFingerprint,
    archive: &[u8],
  ) -> Result<LayerVersionInfo, GatewayError>;

  async fn list_layer_versions(&self, layer: &str) -> Result<Vec<LayerVersionInfo>, GatewayError>;

  async fn delete_layer_version(&self, layer: &str, version: u64) -> Result<(), GatewayError>;
}
