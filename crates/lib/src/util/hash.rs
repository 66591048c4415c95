//! Hashing utilities.
//!
//! This module provides:
//! - `LayerFingerprint`: the content fingerprint stored on published layer versions
//! - `compute_layer_fingerprint()`: order-independent digest of a dependency manifest
//! - `hash_bytes()`: hex SHA-256 of arbitrary bytes (request signing, archive digests)

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::manifest::DependencyManifest;

/// Fingerprint of a dependency manifest.
///
/// Stored as the description of each published layer version, so a later run
/// can tell whether the newest layer already matches the declared dependencies.
///
/// # Format
///
/// Standard base64 of a SHA-256 digest (44 characters, `=` padded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerFingerprint(pub String);

impl std::fmt::Display for LayerFingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl LayerFingerprint {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// A full 64-character hex SHA-256 hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Compute the layer fingerprint for a dependency manifest.
///
/// Each entry contributes `name + constraint`; entries are taken in sorted key
/// order and joined with `,` before digesting, so two manifests with the same
/// content always share a fingerprint.
pub fn compute_layer_fingerprint(manifest: &DependencyManifest) -> LayerFingerprint {
  // DependencyManifest is a BTreeMap, iteration is already key-sorted.
  let joined = manifest
    .iter()
    .map(|(name, constraint)| format!("{}{}", name, constraint))
    .collect::<Vec<_>>()
    .join(",");

  let digest = Sha256::digest(joined.as_bytes());
  LayerFingerprint(STANDARD.encode(digest))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}
