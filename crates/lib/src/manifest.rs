//! Dependency manifest loading.
//!
//! The shared layer is built from the `dependencies` object of the project's
//! `package.json`. Entries are kept in a sorted map so every consumer sees
//! them in the same order regardless of how the file declares them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::PACKAGE_MANIFEST;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read dependency manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed dependency manifest {path}: {message}")]
  Malformed { path: PathBuf, message: String },
}

/// Dependency name to version constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyManifest(pub BTreeMap<String, String>);

impl DependencyManifest {
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
    self.0.iter()
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DependencyManifest {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

#[derive(Deserialize)]
struct PackageJson {
  #[serde(default)]
  dependencies: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Read the dependency manifest of a project.
///
/// Returns `Ok(None)` when there is no `package.json` or it declares no
/// dependencies; that project gets no layer.
pub fn read_dependency_manifest(project_dir: &Path) -> Result<Option<DependencyManifest>, ManifestError> {
  let path = project_dir.join(PACKAGE_MANIFEST);
  if !path.exists() {
    debug!(path = %path.display(), "no dependency manifest");
    return Ok(None);
  }

  let content = fs::read_to_string(&path).map_err(|source| ManifestError::Read {
    path: path.clone(),
    source,
  })?;

  parse_dependency_manifest(&content).map_err(|message| ManifestError::Malformed { path, message })
}

fn parse_dependency_manifest(content: &str) -> Result<Option<DependencyManifest>, String> {
  let package: PackageJson = serde_json::from_str(content).map_err(|e| e.to_string())?;

  let Some(deps) = package.dependencies else {
    return Ok(None);
  };

  let mut manifest = BTreeMap::new();
  for (name, constraint) in deps {
    match constraint {
      serde_json::Value::String(c) => {
        manifest.insert(name, c);
      }
      other => return Err(format!("dependency '{}' has non-string constraint {}", name, other)),
    }
  }

  if manifest.is_empty() {
    return Ok(None);
  }

  Ok(Some(DependencyManifest(manifest)))
}
