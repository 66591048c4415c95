//! Zip packaging for function code and layer contents.
//!
//! Archives are deterministic: entries are sorted by path and carry a fixed
//! timestamp, so unchanged sources always produce byte-identical archives.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use glob::Pattern;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::consts::DEPENDENCY_DIR;
use crate::util::hash::{ContentHash, hash_bytes};

/// Top-level directories never shipped with function code.
const ALWAYS_EXCLUDED: &[&str] = &[DEPENDENCY_DIR, ".git"];

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("invalid ignore pattern '{pattern}': {message}")]
  Pattern { pattern: String, message: String },

  #[error("failed to walk {root}: {message}")]
  Walk { root: PathBuf, message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write archive: {0}")]
  Zip(#[from] zip::result::ZipError),

  #[error("failed to write archive: {0}")]
  Io(#[from] std::io::Error),
}

/// A finished zip archive.
#[derive(Debug, Clone)]
pub struct Archive {
  pub bytes: Vec<u8>,
  pub entries: usize,
  pub sha256: ContentHash,
}

/// Glob patterns matched against `/`-separated paths relative to the project root.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
  patterns: Vec<Pattern>,
}

impl IgnoreSet {
  pub fn new(patterns: &[String]) -> Result<Self, PackageError> {
    let patterns = patterns
      .iter()
      .map(|p| {
        Pattern::new(p).map_err(|e| PackageError::Pattern {
          pattern: p.clone(),
          message: e.to_string(),
        })
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { patterns })
  }

  pub fn is_ignored(&self, relative: &str) -> bool {
    self.patterns.iter().any(|p| p.matches(relative))
  }
}

/// Package the project directory as function code.
///
/// Dependency output and VCS metadata are always left out; `ignore` removes
/// further files.
pub fn build_function_archive(project_dir: &Path, ignore: &[String]) -> Result<Archive, PackageError> {
  let ignore = IgnoreSet::new(ignore)?;
  let files = collect_files(project_dir, |relative| {
    let top = relative.split('/').next().unwrap_or(relative);
    ALWAYS_EXCLUDED.contains(&top) || ignore.is_ignored(relative)
  })?;

  let archive = write_archive(&files, None)?;
  debug!(root = ?project_dir, entries = archive.entries, sha256 = %archive.sha256, "packaged function code");
  Ok(archive)
}

/// Package every file under `root`, optionally nested under `prefix/`.
pub fn archive_directory(root: &Path, prefix: Option<&str>) -> Result<Archive, PackageError> {
  let files = collect_files(root, |_| false)?;
  let archive = write_archive(&files, prefix)?;
  debug!(root = ?root, entries = archive.entries, "packaged directory");
  Ok(archive)
}

/// Regular files under `root` as `(relative, absolute)` pairs, sorted by relative path.
fn collect_files(root: &Path, skip: impl Fn(&str) -> bool) -> Result<Vec<(String, PathBuf)>, PackageError> {
  let mut files = Vec::new();

  let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
    match relative_path(root, entry.path()) {
      Some(relative) => !skip(&relative),
      None => true,
    }
  });

  for entry in walker {
    let entry = entry.map_err(|e| PackageError::Walk {
      root: root.to_path_buf(),
      message: e.to_string(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    if let Some(relative) = relative_path(root, entry.path()) {
      files.push((relative, entry.into_path()));
    }
  }

  files.sort_by(|a, b| a.0.cmp(&b.0));
  Ok(files)
}

/// `/`-separated path of `path` below `root`; `None` for the root itself.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
  let relative = path.strip_prefix(root).ok()?;
  if relative.as_os_str().is_empty() {
    return None;
  }
  Some(
    relative
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/"),
  )
}

fn write_archive(files: &[(String, PathBuf)], prefix: Option<&str>) -> Result<Archive, PackageError> {
  let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
  let base = SimpleFileOptions::default()
    .compression_method(CompressionMethod::Deflated)
    .last_modified_time(DateTime::default());

  for (relative, path) in files {
    let metadata = fs::metadata(path).map_err(|source| PackageError::Read {
      path: path.clone(),
      source,
    })?;
    let contents = fs::read(path).map_err(|source| PackageError::Read {
      path: path.clone(),
      source,
    })?;

    let name = match prefix {
      Some(prefix) => format!("{}/{}", prefix, relative),
      None => relative.clone(),
    };
    writer.start_file(name, base.unix_permissions(file_mode(&metadata)))?;
    writer.write_all(&contents)?;
  }

  let bytes = writer.finish()?.into_inner();
  let sha256 = hash_bytes(&bytes);
  Ok(Archive {
    bytes,
    entries: files.len(),
    sha256,
  })
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
  0o644
}
