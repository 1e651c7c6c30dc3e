//! SHA-256 manifest binding artifact files in a model directory.
//!
//! `manifest.json` lives next to the artifacts and maps file names to their
//! hex digests. Artifacts are read once and the same bytes are hashed and
//! parsed, so a file swapped between the two steps is never accepted.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ArtifactError;
use crate::domain::ENCODING_VERSION;

pub const MANIFEST_FILE: &str = "manifest.json";

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub version: u32,
    pub encoding_version: u32,
    #[serde(default)]
    pub created_at: Option<String>,
    /// File name (relative to the manifest) -> lowercase hex SHA-256.
    pub files: BTreeMap<String, String>,
}

impl ArtifactManifest {
    /// Hash the named files in `dir` into a fresh manifest.
    ///
    /// # Errors
    /// Returns error if any file cannot be read.
    pub fn build(dir: &Path, file_names: &[String]) -> Result<Self, ArtifactError> {
        let mut files = BTreeMap::new();
        for name in file_names {
            let path = dir.join(name);
            let bytes = fs::read(&path).map_err(|source| ArtifactError::Read {
                path: path.display().to_string(),
                source,
            })?;
            files.insert(name.clone(), sha256_hex(&bytes));
        }

        Ok(Self {
            version: MANIFEST_VERSION,
            encoding_version: ENCODING_VERSION,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            files,
        })
    }

    /// Write as pretty JSON to `dir/manifest.json`.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub fn write(&self, dir: &Path) -> Result<(), ArtifactError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&path, json).map_err(|source| ArtifactError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    fn load(path: &Path) -> Result<Self, ArtifactError> {
        let bytes = fs::read(path).map_err(|source| ArtifactError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let manifest: Self = serde_json::from_slice(&bytes).map_err(|e| {
            ArtifactError::Integrity(format!("Invalid {MANIFEST_FILE} format: {e}"))
        })?;

        if manifest.version != MANIFEST_VERSION {
            return Err(ArtifactError::Integrity(format!(
                "Unsupported manifest version: {}",
                manifest.version
            )));
        }
        if manifest.encoding_version != ENCODING_VERSION {
            return Err(ArtifactError::Incompatible(format!(
                "Manifest encoding version {} does not match {ENCODING_VERSION}",
                manifest.encoding_version
            )));
        }
        if manifest.files.is_empty() {
            return Err(ArtifactError::Integrity(format!(
                "{MANIFEST_FILE} contains no files"
            )));
        }
        Ok(manifest)
    }
}

/// Outcome of checking one artifact against its directory's manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// No manifest present and none required.
    Unverified,
}

/// Read an artifact and verify it against `manifest.json` when one exists.
///
/// # Errors
/// Returns error if the file is unreadable, the manifest is malformed or
/// does not bind this file, the digest differs, or a manifest is required
/// but missing.
pub fn read_verified(
    path: &Path,
    require_manifest: bool,
) -> Result<(Vec<u8>, Verification), ArtifactError> {
    let bytes = fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let manifest_path = dir.join(MANIFEST_FILE);

    if !manifest_path.exists() {
        if require_manifest {
            tracing::error!("Manifest not found at {:?}", manifest_path);
            return Err(ArtifactError::Integrity(format!(
                "{MANIFEST_FILE} required but not found in {}",
                dir.display()
            )));
        }
        tracing::warn!("Loading unverified artifact {:?} (no {MANIFEST_FILE})", path);
        return Ok((bytes, Verification::Unverified));
    }

    let manifest = ArtifactManifest::load(&manifest_path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArtifactError::Integrity(format!("Invalid artifact path {path:?}")))?;

    let expected = manifest.files.get(name).ok_or_else(|| {
        ArtifactError::Integrity(format!("{MANIFEST_FILE} does not bind {name}"))
    })?;

    if !constant_time_eq_str(&sha256_hex(&bytes), &expected.to_lowercase()) {
        return Err(ArtifactError::Integrity(format!("File hash mismatch for {name}")));
    }

    tracing::debug!("Verified {} against {MANIFEST_FILE}", name);
    Ok((bytes, Verification::Verified))
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
