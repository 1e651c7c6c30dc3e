//! Model artifacts: loading, verification and inference.
//!
//! Artifacts are produced offline and shipped as JSON in `models/`. Each
//! one declares the feature encoding it was trained on; a mismatch with the
//! compiled-in encoding refuses the artifact rather than scoring garbage.

mod anomaly;
pub mod manifest;
mod risk;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use anomaly::{AnomalyDetector, DensityArtifact, ANOMALY_KIND};
pub use manifest::{ArtifactManifest, Verification, MANIFEST_FILE};
pub use risk::{ForestArtifact, RiskClassifier, TreeNode, RISK_KIND};

use crate::config::EngineConfig;
use crate::domain::{features, ENCODING_VERSION, FEATURE_NAMES};
use crate::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Incompatible artifact: {0}")]
    Incompatible(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Invalid artifact: {0}")]
    Invalid(String),
}

/// Fields shared by every artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub kind: String,
    pub version: u32,
    pub encoding_version: u32,
    pub feature_names: Vec<String>,
}

const ARTIFACT_FORMAT_VERSION: u32 = 1;

fn check_header(header: &ArtifactHeader, expected_kind: &str) -> Result<(), ArtifactError> {
    if header.kind != expected_kind {
        return Err(ArtifactError::Incompatible(format!(
            "expected kind '{expected_kind}', found '{}'",
            header.kind
        )));
    }
    if header.version != ARTIFACT_FORMAT_VERSION {
        return Err(ArtifactError::Incompatible(format!(
            "unsupported artifact format version {}",
            header.version
        )));
    }
    if header.encoding_version != ENCODING_VERSION {
        return Err(ArtifactError::Incompatible(format!(
            "trained on encoding version {}, runtime uses {ENCODING_VERSION}",
            header.encoding_version
        )));
    }
    features::check_feature_names(&header.feature_names).map_err(ArtifactError::Incompatible)
}

/// Metadata reported by `ModelSet::model_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub encoding_version: u32,
    pub feature_names: Vec<String>,
    pub anomaly: Option<AnomalyInfo>,
    pub risk: Option<RiskInfo>,
    pub load_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyInfo {
    pub kind: &'static str,
    pub threshold: f64,
    pub contamination: f64,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskInfo {
    pub kind: &'static str,
    pub trees: usize,
    pub classes: Vec<String>,
    pub verified: bool,
}

/// The loaded detector and classifier, shared read-only across requests.
///
/// Either model may be missing; the set records why so start-up can fail
/// fast with a useful message.
#[derive(Debug, Clone, Default)]
pub struct ModelSet {
    anomaly: Option<Arc<AnomalyDetector>>,
    risk: Option<Arc<RiskClassifier>>,
    load_errors: Vec<String>,
}

impl ModelSet {
    /// Load both artifacts named by the configuration.
    ///
    /// Failures are logged and recorded, never returned.
    #[must_use]
    pub fn load(config: &EngineConfig) -> Self {
        Self::load_from(
            &config.anomaly_artifact_path,
            &config.risk_artifact_path,
            config.require_manifest,
        )
    }

    #[must_use]
    pub fn load_from(anomaly_path: &Path, risk_path: &Path, require_manifest: bool) -> Self {
        let mut load_errors = Vec::new();

        let anomaly = match AnomalyDetector::load(anomaly_path, require_manifest) {
            Ok(d) => {
                tracing::info!(
                    "Loaded anomaly detector ({:?}) from {:?}",
                    d.verification(),
                    anomaly_path
                );
                Some(Arc::new(d))
            }
            Err(e) => {
                tracing::error!("Failed to load anomaly detector from {:?}: {e}", anomaly_path);
                load_errors.push(format!("anomaly detector: {e}"));
                None
            }
        };

        let risk = match RiskClassifier::load(risk_path, require_manifest) {
            Ok(c) => {
                tracing::info!(
                    "Loaded risk classifier ({} trees, {:?}) from {:?}",
                    c.tree_count(),
                    c.verification(),
                    risk_path
                );
                Some(Arc::new(c))
            }
            Err(e) => {
                tracing::error!("Failed to load risk classifier from {:?}: {e}", risk_path);
                load_errors.push(format!("risk classifier: {e}"));
                None
            }
        };

        Self {
            anomaly,
            risk,
            load_errors,
        }
    }

    /// Assemble a set from already-built models.
    #[must_use]
    pub fn from_parts(anomaly: Option<AnomalyDetector>, risk: Option<RiskClassifier>) -> Self {
        let mut load_errors = Vec::new();
        if anomaly.is_none() {
            load_errors.push("anomaly detector: not provided".to_string());
        }
        if risk.is_none() {
            load_errors.push("risk classifier: not provided".to_string());
        }
        Self {
            anomaly: anomaly.map(Arc::new),
            risk: risk.map(Arc::new),
            load_errors,
        }
    }

    #[must_use]
    pub fn anomaly_available(&self) -> bool {
        self.anomaly.is_some()
    }

    #[must_use]
    pub fn risk_available(&self) -> bool {
        self.risk.is_some()
    }

    /// Both models, or `ModelUnavailable` naming what is missing.
    ///
    /// # Errors
    /// Returns error if either model failed to load.
    pub fn require_all(&self) -> crate::Result<(Arc<AnomalyDetector>, Arc<RiskClassifier>)> {
        match (&self.anomaly, &self.risk) {
            (Some(a), Some(r)) => Ok((Arc::clone(a), Arc::clone(r))),
            _ => Err(EngineError::ModelUnavailable(if self.load_errors.is_empty() {
                "models not loaded".to_string()
            } else {
                self.load_errors.join("; ")
            })),
        }
    }

    #[must_use]
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            encoding_version: ENCODING_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| (*s).to_string()).collect(),
            anomaly: self.anomaly.as_ref().map(|d| AnomalyInfo {
                kind: ANOMALY_KIND,
                threshold: d.threshold(),
                contamination: d.contamination(),
                verified: d.verification() == Verification::Verified,
            }),
            risk: self.risk.as_ref().map(|c| RiskInfo {
                kind: RISK_KIND,
                trees: c.tree_count(),
                classes: crate::domain::RiskLevel::ALL
                    .iter()
                    .map(|l| l.as_str().to_string())
                    .collect(),
                verified: c.verification() == Verification::Verified,
            }),
            load_errors: self.load_errors.clone(),
        }
    }
}
