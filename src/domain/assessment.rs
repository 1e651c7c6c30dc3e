//! Model outputs and the composite health score.

use serde::{Deserialize, Serialize};

/// Probability sums within this distance of 1.0 are accepted as-is.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Ordinal risk classification of near-term health concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No significant indicators
    Low,
    /// Follow-up recommended
    Medium,
    /// Prompt consultation advised
    High,
}

impl RiskLevel {
    /// All levels, lowest first.
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    /// Position in `ALL`; also the class index used by model artifacts.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    /// Ordinal severity (0 = Low).
    #[must_use]
    pub fn severity(&self) -> f64 {
        self.index() as f64
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low Risk"),
            Self::Medium => write!(f, "Medium Risk"),
            Self::High => write!(f, "High Risk"),
        }
    }
}

/// Output of the unsupervised anomaly detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    /// Unbounded; higher means more anomalous.
    pub score: f64,
}

impl AnomalyResult {
    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.is_anomaly {
            "Anomaly"
        } else {
            "Normal"
        }
    }
}

/// Per-class probabilities of a `RiskResult`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskProbabilities {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl RiskProbabilities {
    #[must_use]
    pub fn get(&self, level: RiskLevel) -> f64 {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
        }
    }

    #[must_use]
    pub fn to_array(&self) -> [f64; 3] {
        [self.low, self.medium, self.high]
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.low + self.medium + self.high
    }
}

/// Output of the risk classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub level: RiskLevel,
    pub probabilities: RiskProbabilities,
}

impl RiskResult {
    /// Build a result from raw class scores ordered Low, Medium, High.
    ///
    /// Scores are normalised to sum to 1. The level is the strict arg-max
    /// class; only exactly equal probabilities tie, and a tie goes to the
    /// higher-risk class.
    ///
    /// # Errors
    /// Returns error if any score is negative or non-finite, or all are zero.
    pub fn from_scores(scores: [f64; 3]) -> Result<Self, String> {
        if scores.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(format!("Invalid class scores: {scores:?}"));
        }
        let total: f64 = scores.iter().sum();
        if total <= 0.0 {
            return Err("Class scores sum to zero".to_string());
        }

        let p = scores.map(|s| (s / total).clamp(0.0, 1.0));

        let mut level = RiskLevel::Low;
        let mut best = p[0];
        for candidate in [RiskLevel::Medium, RiskLevel::High] {
            let value = p[candidate.index()];
            if value >= best {
                level = candidate;
                best = value;
            }
        }

        Ok(Self {
            level,
            probabilities: RiskProbabilities {
                low: p[0],
                medium: p[1],
                high: p[2],
            },
        })
    }
}

/// Composite 0-100 health summary; higher is healthier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthScore(u8);

impl HealthScore {
    pub const MAX: u8 = 100;

    /// Create a score, saturating at 100.
    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX))
    }

    #[must_use]
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Coarse label for narrative context.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self.0 {
            85..=100 => "good",
            70..=84 => "fair",
            50..=69 => "concerning",
            _ => "poor",
        }
    }
}

impl std::fmt::Display for HealthScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/100", self.0)
    }
}

/// The structured (non-narrative) outcome of scoring one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub health_score: HealthScore,
    pub anomaly: AnomalyResult,
    pub risk: RiskResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilities_normalised() {
        let r = RiskResult::from_scores([2.0, 1.0, 1.0]).expect("Should build");
        assert!((r.probabilities.sum() - 1.0).abs() < PROBABILITY_TOLERANCE);
        assert!((r.probabilities.low - 0.5).abs() < 1e-12);
        assert_eq!(r.level, RiskLevel::Low);
    }

    #[test]
    fn test_tie_goes_to_higher_risk() {
        let r = RiskResult::from_scores([0.4, 0.4, 0.2]).expect("Should build");
        assert_eq!(r.level, RiskLevel::Medium);

        let r = RiskResult::from_scores([0.2, 0.4, 0.4]).expect("Should build");
        assert_eq!(r.level, RiskLevel::High);

        let r = RiskResult::from_scores([1.0, 1.0, 1.0]).expect("Should build");
        assert_eq!(r.level, RiskLevel::High);
    }

    #[test]
    fn test_near_tie_follows_strict_argmax() {
        let r = RiskResult::from_scores([0.5 + 4e-10, 0.5 - 4e-10, 0.0]).expect("Should build");
        assert_eq!(r.level, RiskLevel::Low);

        let r = RiskResult::from_scores([0.0, 0.5 - 4e-10, 0.5 + 4e-10]).expect("Should build");
        assert_eq!(r.level, RiskLevel::High);

        let r = RiskResult::from_scores([0.2, 0.4 + 1e-12, 0.4]).expect("Should build");
        assert_eq!(r.level, RiskLevel::Medium);
    }

    #[test]
    fn test_invalid_scores_rejected() {
        assert!(RiskResult::from_scores([0.0, 0.0, 0.0]).is_err());
        assert!(RiskResult::from_scores([-0.1, 0.5, 0.6]).is_err());
        assert!(RiskResult::from_scores([f64::NAN, 0.5, 0.5]).is_err());
    }

    #[test]
    fn test_health_score_saturates() {
        assert_eq!(HealthScore::new(250).value(), 100);
        assert_eq!(HealthScore::new(90).label(), "good");
        assert_eq!(HealthScore::new(10).label(), "poor");
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(RiskLevel::parse("HIGH"), Some(RiskLevel::High));
        for level in RiskLevel::ALL {
            assert_eq!(RiskLevel::parse(level.as_str()), Some(level));
        }
    }
}
