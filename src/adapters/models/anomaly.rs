//! Unsupervised anomaly detector over encoded measurements.
//!
//! The artifact is a diagonal Gaussian density fitted offline on normal
//! readings. The score is the standardised distance of a feature vector from
//! the reference mean; the decision threshold is the distance quantile
//! matching the training contamination.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{check_header, manifest, ArtifactError, ArtifactHeader, Verification};
use crate::domain::{AnomalyResult, FeatureVector, FEATURE_COUNT};

pub const ANOMALY_KIND: &str = "gaussian_density";

/// On-disk form of `anomaly_detector.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityArtifact {
    #[serde(flatten)]
    pub header: ArtifactHeader,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub contamination: f64,
    pub threshold: f64,
    #[serde(default)]
    pub training_samples: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    mean: [f64; FEATURE_COUNT],
    inv_std: [f64; FEATURE_COUNT],
    threshold: f64,
    contamination: f64,
    verification: Verification,
}

impl AnomalyDetector {
    /// Load and verify an artifact from disk.
    ///
    /// # Errors
    /// Returns error if the file is unreadable, fails manifest verification,
    /// or does not describe a valid detector for this encoding.
    pub fn load(path: &Path, require_manifest: bool) -> Result<Self, ArtifactError> {
        let (bytes, verification) = manifest::read_verified(path, require_manifest)?;
        let artifact: DensityArtifact = serde_json::from_slice(&bytes)?;
        Ok(Self {
            verification,
            ..Self::from_artifact(artifact)?
        })
    }

    /// Build from an in-memory artifact; the result is `Unverified`.
    ///
    /// # Errors
    /// Returns error if the artifact is inconsistent with the feature encoding.
    pub fn from_artifact(artifact: DensityArtifact) -> Result<Self, ArtifactError> {
        check_header(&artifact.header, ANOMALY_KIND)?;

        let mean: [f64; FEATURE_COUNT] = artifact.mean.as_slice().try_into().map_err(|_| {
            ArtifactError::Invalid(format!(
                "mean has {} entries, expected {FEATURE_COUNT}",
                artifact.mean.len()
            ))
        })?;
        let std: [f64; FEATURE_COUNT] = artifact.std.as_slice().try_into().map_err(|_| {
            ArtifactError::Invalid(format!(
                "std has {} entries, expected {FEATURE_COUNT}",
                artifact.std.len()
            ))
        })?;

        if mean.iter().any(|m| !m.is_finite()) {
            return Err(ArtifactError::Invalid("mean contains non-finite values".into()));
        }
        if std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ArtifactError::Invalid(
                "std must be finite and strictly positive".into(),
            ));
        }
        if !artifact.threshold.is_finite() || artifact.threshold <= 0.0 {
            return Err(ArtifactError::Invalid(format!(
                "threshold must be positive, got {}",
                artifact.threshold
            )));
        }
        if !(artifact.contamination > 0.0 && artifact.contamination < 0.5) {
            return Err(ArtifactError::Invalid(format!(
                "contamination must be in (0, 0.5), got {}",
                artifact.contamination
            )));
        }

        Ok(Self {
            mean,
            inv_std: std.map(|s| 1.0 / s),
            threshold: artifact.threshold,
            contamination: artifact.contamination,
            verification: Verification::Unverified,
        })
    }

    /// Score one encoded measurement.
    #[must_use]
    pub fn score(&self, features: &FeatureVector) -> AnomalyResult {
        let squared: f64 = features
            .values
            .iter()
            .zip(self.mean.iter().zip(self.inv_std.iter()))
            .map(|(x, (m, inv))| {
                let z = (x - m) * inv;
                z * z
            })
            .sum();
        let score = squared.sqrt();

        AnomalyResult {
            is_anomaly: score > self.threshold,
            score,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[must_use]
    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    #[must_use]
    pub fn verification(&self) -> Verification {
        self.verification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Preprocessor;
    use crate::domain::{FEATURE_NAMES, ENCODING_VERSION, Measurement};

    fn artifact() -> DensityArtifact {
        DensityArtifact {
            header: ArtifactHeader {
                kind: ANOMALY_KIND.to_string(),
                version: 1,
                encoding_version: ENCODING_VERSION,
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            },
            mean: vec![80.0, 97.0, 36.5, 15.5, 1.0, 75.0, 1.5],
            std: vec![11.5, 1.4, 0.3, 2.3, 0.82, 43.0, 1.12],
            contamination: 0.05,
            threshold: 3.75,
            training_samples: None,
        }
    }

    #[test]
    fn test_shipped_artifact_loads() {
        let detector = AnomalyDetector::load(Path::new("models/anomaly_detector.json"), false)
            .expect("Should load shipped artifact");
        assert!((detector.threshold() - 3.75).abs() < 1e-9);
    }

    #[test]
    fn test_normal_reading_not_anomalous() {
        let detector = AnomalyDetector::from_artifact(artifact()).expect("Should build");
        let fv = Preprocessor::encode(&Measurement::new(75.0, 98.0, 36.6, 16.0))
            .expect("Should encode");
        let r = detector.score(&fv);
        assert!(!r.is_anomaly, "score {}", r.score);
    }

    #[test]
    fn test_tachycardic_fever_is_anomalous() {
        let detector = AnomalyDetector::from_artifact(artifact()).expect("Should build");
        let fv = Preprocessor::encode(&Measurement::new(145.0, 94.0, 37.8, 22.0))
            .expect("Should encode");
        let r = detector.score(&fv);
        assert!(r.is_anomaly, "score {}", r.score);
        assert!(r.score > 2.0 * detector.threshold());
    }

    #[test]
    fn test_score_grows_with_deviation() {
        let detector = AnomalyDetector::from_artifact(artifact()).expect("Should build");
        let near = detector.score(&FeatureVector::new([85.0, 97.0, 36.5, 15.5, 1.0, 75.0, 1.5]));
        let far = detector.score(&FeatureVector::new([120.0, 97.0, 36.5, 15.5, 1.0, 75.0, 1.5]));
        assert!(far.score > near.score);
    }

    #[test]
    fn test_invalid_artifacts_rejected() {
        let mut a = artifact();
        a.std[2] = 0.0;
        assert!(AnomalyDetector::from_artifact(a).is_err());

        let mut a = artifact();
        a.mean.pop();
        assert!(AnomalyDetector::from_artifact(a).is_err());

        let mut a = artifact();
        a.header.encoding_version = ENCODING_VERSION + 1;
        assert!(matches!(
            AnomalyDetector::from_artifact(a),
            Err(ArtifactError::Incompatible(_))
        ));

        let mut a = artifact();
        a.header.feature_names.swap(0, 1);
        assert!(matches!(
            AnomalyDetector::from_artifact(a),
            Err(ArtifactError::Incompatible(_))
        ));
    }
}
