//! Dependency installation for the shared layer.
//!
//! The installer materializes the project's declared dependencies into a
//! fresh staging directory, which is then archived under the layer root. The
//! staging directory is a [`TempDir`], removed when the build finishes
//! whether it succeeded or not.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::package::{Archive, PackageError, archive_directory};
use crate::consts::{APP_NAME, LAYER_ROOT, PACKAGE_LOCK, PACKAGE_MANIFEST};

#[derive(Debug, Error)]
pub enum InstallError {
  #[error("failed to create staging directory: {0}")]
  Staging(#[source] std::io::Error),

  #[error("failed to copy {path} into staging: {source}")]
  Copy {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{program} exited with code {code:?}")]
  Failed { program: String, code: Option<i32> },

  #[error(transparent)]
  Package(#[from] PackageError),

  #[error("layer packaging task failed: {0}")]
  Task(String),
}

/// Materializes production dependencies into a directory.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
  /// Install the dependencies declared in `project_dir` into `staging`.
  async fn install(&self, project_dir: &Path, staging: &Path) -> Result<(), InstallError>;
}

/// Runs `npm install` for the deployment target platform.
#[derive(Debug, Clone)]
pub struct NpmInstaller {
  pub program: String,
  pub args: Vec<String>,
}

impl Default for NpmInstaller {
  fn default() -> Self {
    Self {
      program: "npm".to_string(),
      args: vec![
        "--omit=dev".to_string(),
        "--cpu=x86_64".to_string(),
        "--os=linux".to_string(),
      ],
    }
  }
}

#[async_trait]
impl DependencyInstaller for NpmInstaller {
  async fn install(&self, project_dir: &Path, staging: &Path) -> Result<(), InstallError> {
    for file in [PACKAGE_MANIFEST, PACKAGE_LOCK] {
      let source = project_dir.join(file);
      if !source.exists() {
        continue;
      }
      tokio::fs::copy(&source, staging.join(file))
        .await
        .map_err(|e| InstallError::Copy { path: source, source: e })?;
    }

    let mut command = Command::new(&self.program);
    command
      .arg("install")
      .arg(format!("--prefix={}", staging.display()))
      .args(&self.args)
      .current_dir(staging)
      .kill_on_drop(true);

    debug!(program = %self.program, staging = ?staging, "installing dependencies");

    let output = command.output().await.map_err(|source| InstallError::Spawn {
      program: self.program.clone(),
      source,
    })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      if !stderr.is_empty() {
        debug!(stderr = %stderr, "installer stderr");
      }
      return Err(InstallError::Failed {
        program: self.program.clone(),
        code: output.status.code(),
      });
    }

    Ok(())
  }
}

/// Install dependencies into a scratch directory and archive them under the layer root.
pub async fn build_layer_archive(
  installer: &dyn DependencyInstaller,
  project_dir: &Path,
) -> Result<Archive, InstallError> {
  let staging = tempfile::Builder::new()
    .prefix(&format!("{}-layer-", APP_NAME))
    .tempdir()
    .map_err(InstallError::Staging)?;

  installer.install(project_dir, staging.path()).await?;

  let archive = package_staging(&staging).await?;
  info!(entries = archive.entries, bytes = archive.bytes.len(), "built layer archive");
  Ok(archive)
}

async fn package_staging(staging: &TempDir) -> Result<Archive, InstallError> {
  let root = staging.path().to_path_buf();
  let archive = tokio::task::spawn_blocking(move || archive_directory(&root, Some(LAYER_ROOT)))
    .await
    .map_err(|e| InstallError::Task(e.to_string()))??;
  Ok(archive)
}
