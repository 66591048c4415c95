//! Platform data shapes.
//!
//! Field names mirror the platform's JSON payloads (PascalCase) so the REST
//! gateway can decode responses and encode requests without an extra mapping
//! layer.

use serde::{Deserialize, Serialize};

use crate::config::{Environment, FunctionSpec, VpcConfig};

/// Result of a lookup that may miss.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
  Found(T),
  NotFound,
}

impl<T> Lookup<T> {
  pub fn is_found(&self) -> bool {
    matches!(self, Lookup::Found(_))
  }

  pub fn found(self) -> Option<T> {
    match self {
      Lookup::Found(value) => Some(value),
      Lookup::NotFound => None,
    }
  }
}

impl<T> From<Option<T>> for Lookup<T> {
  fn from(value: Option<T>) -> Self {
    match value {
      Some(v) => Lookup::Found(v),
      None => Lookup::NotFound,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedLayer {
  pub arn: String,
}

/// Snapshot of a function's current configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionConfig {
  pub function_name: String,
  #[serde(default)]
  pub function_arn: Option<String>,
  #[serde(default)]
  pub version: Option<String>,
  /// Lifecycle state: `Pending`, `Active`, `Inactive` or `Failed`.
  #[serde(default)]
  pub state: Option<String>,
  #[serde(default)]
  pub state_reason: Option<String>,
  /// Status of the most recent update: `InProgress`, `Successful` or `Failed`.
  #[serde(default)]
  pub last_update_status: Option<String>,
  #[serde(default)]
  pub last_update_status_reason: Option<String>,
  #[serde(default)]
  pub layers: Vec<AttachedLayer>,
}

/// A published, immutable revision of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionVersion {
  pub version: String,
  /// Layer version ARNs attached at publish time.
  pub layers: Vec<String>,
}

/// Named pointer to one function version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AliasInfo {
  pub name: String,
  pub function_version: String,
}

/// A published layer version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerVersionInfo {
  pub version: u64,
  pub arn: String,
  /// Holds the dependency fingerprint for layers this tool publishes.
  pub description: Option<String>,
}

/// Payload for creating a function.
///
/// Declared settings layered onto the required defaults: the function is
/// published on create and packaged as a zip archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFunctionRequest {
  pub function_name: String,
  pub role: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub runtime: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub handler: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memory_size: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub environment: Option<Environment>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub vpc_config: Option<VpcConfig>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub architectures: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub layers: Vec<String>,
  pub publish: bool,
  pub package_type: String,
}

impl CreateFunctionRequest {
  pub fn from_spec(spec: &FunctionSpec, layer_arn: Option<&str>) -> Self {
    Self {
      function_name: spec.function_name.clone(),
      role: spec.role.clone(),
      runtime: spec.runtime.clone(),
      handler: spec.handler.clone(),
      description: spec.description.clone(),
      memory_size: spec.memory_size,
      timeout: spec.timeout,
      environment: spec.environment.clone(),
      vpc_config: spec.vpc_config.clone(),
      architectures: spec.architectures.clone(),
      layers: layer_arn.map(|arn| vec![arn.to_string()]).unwrap_or_default(),
      publish: true,
      package_type: "Zip".to_string(),
    }
  }
}

/// Payload for updating an existing function's configuration.
///
/// `layers` is only sent when a layer is managed; otherwise the function's
/// current layers are left alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionOverrides {
  pub role: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub runtime: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub handler: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memory_size: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub environment: Option<Environment>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub vpc_config: Option<VpcConfig>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub layers: Option<Vec<String>>,
}

impl FunctionOverrides {
  pub fn from_spec(spec: &FunctionSpec, layer_arn: Option<&str>) -> Self {
    Self {
      role: spec.role.clone(),
      runtime: spec.runtime.clone(),
      handler: spec.handler.clone(),
      description: spec.description.clone(),
      memory_size: spec.memory_size,
      timeout: spec.timeout,
      environment: spec.environment.clone(),
      vpc_config: spec.vpc_config.clone(),
      layers: layer_arn.map(|arn| vec![arn.to_string()]),
    }
  }
}
