//! Deploy document loading and validation.
//!
//! The deploy document is a YAML file (default `deploy.yml`) describing one
//! service: its functions, an optional layer name, packaging ignore patterns
//! and an optional pruning policy. Keys follow the platform's PascalCase
//! naming so function declarations read like the API payloads they become.
//!
//! ```yaml
//! Service: orders
//! Ignore: ["tests/**", "*.md"]
//! Prune:
//!   RetainCount: 3
//!   IncludeLayers: true
//! Functions:
//!   api:
//!     FunctionName: orders-api
//!     Role: arn:aws:iam::123456789012:role/orders
//!     Runtime: nodejs20.x
//!     Handler: index.handler
//! ```
//!
//! Validation runs entirely before any remote call; a [`ConfigError`] is
//! always fatal.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::manifest::{DependencyManifest, ManifestError, read_dependency_manifest};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("Service is not defined")]
  MissingService,

  #[error("Functions is not defined")]
  MissingFunctions,

  #[error("function '{key}' has no FunctionName")]
  MissingFunctionName { key: String },

  #[error("function '{name}' has no Role")]
  MissingRole { name: String },

  #[error("function '{0}' is declared more than once")]
  DuplicateFunction(String),

  #[error("invalid declaration for function '{key}': {source}")]
  InvalidFunction {
    key: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid ignore pattern '{pattern}': {message}")]
  InvalidIgnore { pattern: String, message: String },

  #[error(transparent)]
  Manifest(#[from] ManifestError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcConfig {
  #[serde(default)]
  pub subnet_ids: Vec<String>,
  #[serde(default)]
  pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
  #[serde(default)]
  pub variables: BTreeMap<String, String>,
}

/// Desired state of one function, as declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionSpec {
  #[serde(default)]
  pub function_name: String,
  #[serde(default)]
  pub role: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub runtime: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub handler: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub memory_size: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<Environment>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub vpc_config: Option<VpcConfig>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub architectures: Option<Vec<String>>,
}

impl FunctionSpec {
  pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
    Self {
      function_name: name.into(),
      role: role.into(),
      ..Default::default()
    }
  }
}

/// Retention policy for published versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrunePolicy {
  /// Number of unreferenced versions to keep per function. Unset disables pruning.
  #[serde(default)]
  pub retain_count: Option<usize>,
  /// Apply the same retention to layer versions.
  #[serde(default)]
  pub include_layers: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LayerSection {
  name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
  service: Option<String>,
  functions: Option<serde_yaml::Mapping>,
  #[serde(default)]
  layer: Option<LayerSection>,
  #[serde(default)]
  ignore: Vec<String>,
  #[serde(default)]
  prune: Option<PrunePolicy>,
}

/// Shared layer identity plus the dependency manifest it is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
  pub name: String,
  /// `None` when the project declares no dependencies.
  pub manifest: Option<DependencyManifest>,
}

/// A validated deploy document.
#[derive(Debug, Clone)]
pub struct DeployConfig {
  pub service: String,
  /// Function declarations in document order.
  pub functions: Vec<FunctionSpec>,
  pub layer_name: String,
  pub ignore: Vec<String>,
  pub prune: Option<PrunePolicy>,
  /// Directory holding the deploy document; packaging and manifest lookup are relative to it.
  pub project_dir: PathBuf,
}

impl DeployConfig {
  /// Load and validate a deploy document from disk.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let project_dir = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    let project_dir = dunce::canonicalize(&project_dir).unwrap_or(project_dir);

    let config = Self::from_yaml(&content, project_dir).map_err(|e| match e {
      ConfigError::Parse { source, .. } => ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      },
      other => other,
    })?;

    debug!(
      service = %config.service,
      functions = config.functions.len(),
      project = %config.project_dir.display(),
      "loaded deploy config"
    );

    Ok(config)
  }

  /// Parse and validate a deploy document held in memory.
  pub fn from_yaml(content: &str, project_dir: PathBuf) -> Result<Self, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
      path: PathBuf::new(),
      source,
    })?;

    let service = raw
      .service
      .filter(|s| !s.trim().is_empty())
      .ok_or(ConfigError::MissingService)?;

    let declared = raw
      .functions
      .filter(|m| !m.is_empty())
      .ok_or(ConfigError::MissingFunctions)?;

    let mut functions = Vec::with_capacity(declared.len());
    let mut seen = HashSet::new();

    // serde_yaml::Mapping keeps document order.
    for (key, value) in declared {
      let key = key_to_string(&key);
      let spec: FunctionSpec = serde_yaml::from_value(value).map_err(|source| ConfigError::InvalidFunction {
        key: key.clone(),
        source,
      })?;

      if spec.function_name.trim().is_empty() {
        return Err(ConfigError::MissingFunctionName { key });
      }
      if spec.role.trim().is_empty() {
        return Err(ConfigError::MissingRole {
          name: spec.function_name,
        });
      }
      if !seen.insert(spec.function_name.clone()) {
        return Err(ConfigError::DuplicateFunction(spec.function_name));
      }

      functions.push(spec);
    }

    for pattern in &raw.ignore {
      glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidIgnore {
        pattern: pattern.clone(),
        message: e.to_string(),
      })?;
    }

    let layer_name = raw
      .layer
      .and_then(|l| l.name)
      .filter(|n| !n.trim().is_empty())
      .unwrap_or_else(|| service.clone());

    Ok(Self {
      service,
      functions,
      layer_name,
      ignore: raw.ignore,
      prune: raw.prune,
      project_dir,
    })
  }

  /// Resolve the layer declaration by reading the project's package manifest.
  pub fn layer_spec(&self) -> Result<LayerSpec, ConfigError> {
    let manifest = read_dependency_manifest(&self.project_dir)?;
    Ok(LayerSpec {
      name: self.layer_name.clone(),
      manifest,
    })
  }

  pub fn function_names(&self) -> impl Iterator<Item = &str> {
    self.functions.iter().map(|f| f.function_name.as_str())
  }
}

fn key_to_string(key: &serde_yaml::Value) -> String {
  match key {
    serde_yaml::Value::String(s) => s.clone(),
    other => serde_yaml::to_string(other)
      .map(|s| s.trim().to_string())
      .unwrap_or_default(),
  }
}
