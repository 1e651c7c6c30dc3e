//! Multi-class risk classifier: a forest of decision trees.
//!
//! Each tree routes a feature vector to a leaf holding a Low/Medium/High
//! distribution (`x[feature] <= threshold` goes left). The forest output is
//! the mean of the reached leaves.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{check_header, manifest, ArtifactError, ArtifactHeader, Verification};
use crate::domain::{
    FeatureVector, RiskLevel, RiskProbabilities, RiskResult, FEATURE_COUNT, PROBABILITY_TOLERANCE,
};

pub const RISK_KIND: &str = "decision_forest";

/// Deeper trees are rejected at load.
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        distribution: Vec<f64>,
    },
}

impl TreeNode {
    fn validate(&self, depth: usize) -> Result<(), ArtifactError> {
        if depth > MAX_TREE_DEPTH {
            return Err(ArtifactError::Invalid(format!(
                "tree deeper than {MAX_TREE_DEPTH}"
            )));
        }
        match self {
            Self::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if *feature >= FEATURE_COUNT {
                    return Err(ArtifactError::Invalid(format!(
                        "split on feature {feature}, only {FEATURE_COUNT} exist"
                    )));
                }
                if !threshold.is_finite() {
                    return Err(ArtifactError::Invalid("non-finite split threshold".into()));
                }
                left.validate(depth + 1)?;
                right.validate(depth + 1)
            }
            Self::Leaf { distribution } => {
                if distribution.len() != RiskLevel::ALL.len() {
                    return Err(ArtifactError::Invalid(format!(
                        "leaf has {} classes, expected {}",
                        distribution.len(),
                        RiskLevel::ALL.len()
                    )));
                }
                if distribution.iter().any(|p| !p.is_finite() || *p < 0.0) {
                    return Err(ArtifactError::Invalid(
                        "leaf probabilities must be finite and non-negative".into(),
                    ));
                }
                let sum: f64 = distribution.iter().sum();
                if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                    return Err(ArtifactError::Invalid(format!(
                        "leaf probabilities sum to {sum}"
                    )));
                }
                Ok(())
            }
        }
    }

    fn route(&self, values: &[f64; FEATURE_COUNT]) -> &[f64] {
        let mut node = self;
        loop {
            match node {
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if values[*feature] <= *threshold { &**left } else { &**right };
                }
                Self::Leaf { distribution } => return distribution,
            }
        }
    }
}

/// On-disk form of `risk_classifier.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestArtifact {
    #[serde(flatten)]
    pub header: ArtifactHeader,
    pub classes: Vec<String>,
    pub trees: Vec<TreeNode>,
}

#[derive(Debug, Clone)]
pub struct RiskClassifier {
    trees: Vec<TreeNode>,
    verification: Verification,
}

impl RiskClassifier {
    /// Load and verify an artifact from disk.
    ///
    /// # Errors
    /// Returns error if the file is unreadable, fails manifest verification,
    /// or does not describe a valid forest for this encoding.
    pub fn load(path: &Path, require_manifest: bool) -> Result<Self, ArtifactError> {
        let (bytes, verification) = manifest::read_verified(path, require_manifest)?;
        let artifact: ForestArtifact = serde_json::from_slice(&bytes)?;
        Ok(Self {
            verification,
            ..Self::from_artifact(artifact)?
        })
    }

    /// Build from an in-memory artifact; the result is `Unverified`.
    ///
    /// # Errors
    /// Returns error if the class list or any tree is invalid.
    pub fn from_artifact(artifact: ForestArtifact) -> Result<Self, ArtifactError> {
        check_header(&artifact.header, RISK_KIND)?;

        let classes_match = artifact.classes.len() == RiskLevel::ALL.len()
            && artifact
                .classes
                .iter()
                .zip(RiskLevel::ALL.iter())
                .all(|(name, level)| RiskLevel::parse(name) == Some(*level));
        if !classes_match {
            return Err(ArtifactError::Incompatible(format!(
                "classes must be [low, medium, high], got {:?}",
                artifact.classes
            )));
        }

        if artifact.trees.is_empty() {
            return Err(ArtifactError::Invalid("forest has no trees".into()));
        }
        for tree in &artifact.trees {
            tree.validate(0)?;
        }

        Ok(Self {
            trees: artifact.trees,
            verification: Verification::Unverified,
        })
    }

    /// Classify one encoded measurement.
    ///
    /// Leaves are validated at load, so the averaged distribution is always
    /// a valid probability vector.
    #[must_use]
    pub fn classify(&self, features: &FeatureVector) -> RiskResult {
        let mut totals = [0.0_f64; 3];
        for tree in &self.trees {
            for (acc, p) in totals.iter_mut().zip(tree.route(&features.values)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;

        RiskResult::from_scores(totals.map(|t| t / n)).unwrap_or_else(|e| {
            tracing::error!("Forest produced invalid distribution: {e}");
            RiskResult {
                level: RiskLevel::High,
                probabilities: RiskProbabilities {
                    low: 0.0,
                    medium: 0.0,
                    high: 1.0,
                },
            }
        })
    }

    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn verification(&self) -> Verification {
        self.verification
    }
}
