//! Composite 0-100 health score.
//!
//! Start from 100 and subtract:
//! - per vital, its weight scaled by how far the value sits between the
//!   normal band and the critical bound,
//! - the anomaly weight times the anomaly score (capped),
//! - the risk weight times the risk severity.
//!
//! Every deduction is non-decreasing in its input, so a worse anomaly score
//! or a higher risk level never raises the score.

use crate::config::{ScoreWeights, VitalBands};
use crate::domain::{AnomalyResult, HealthScore, Measurement, RiskResult};

#[derive(Debug, Clone, Default)]
pub struct HealthScoreCalculator {
    weights: ScoreWeights,
    bands: VitalBands,
}

impl HealthScoreCalculator {
    #[must_use]
    pub fn new(weights: ScoreWeights, bands: VitalBands) -> Self {
        Self { weights, bands }
    }

    #[must_use]
    pub fn compute(
        &self,
        measurement: &Measurement,
        anomaly: &AnomalyResult,
        risk: &RiskResult,
    ) -> HealthScore {
        let w = &self.weights;
        let b = &self.bands;

        let vitals = w.heart_rate * b.heart_rate.penalty_fraction(measurement.heart_rate)
            + w.blood_oxygen * b.blood_oxygen.penalty_fraction(measurement.blood_oxygen)
            + w.temperature * b.temperature.penalty_fraction(measurement.temperature)
            + w.respiration_rate
                * b.respiration_rate.penalty_fraction(measurement.respiration_rate);

        let anomaly_penalty = (w.anomaly * anomaly.score.max(0.0)).min(w.anomaly_cap);
        let risk_penalty = w.risk * risk.level.severity();

        let raw = 100.0 - vitals - anomaly_penalty - risk_penalty;
        let clamped = if raw.is_finite() { raw.round().clamp(0.0, 100.0) } else { 0.0 };

        tracing::debug!(
            "Health score {clamped} (vitals -{vitals:.1}, anomaly -{anomaly_penalty:.1}, risk -{risk_penalty:.1})"
        );

        HealthScore::new(clamped as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskLevel;

    fn risk(level: RiskLevel) -> RiskResult {
        let mut scores = [0.1, 0.1, 0.1];
        scores[level.index()] = 0.8;
        RiskResult::from_scores(scores).expect("Should build")
    }

    fn anomaly(score: f64) -> AnomalyResult {
        AnomalyResult {
            is_anomaly: score > 3.75,
            score,
        }
    }

    #[test]
    fn test_healthy_reading_scores_high() {
        let calc = HealthScoreCalculator::default();
        let m = Measurement::new(75.0, 98.0, 36.6, 16.0);
        let s = calc.compute(&m, &anomaly(2.0), &risk(RiskLevel::Low));
        assert!(s.value() >= 85, "score {s}");
    }

    #[test]
    fn test_abnormal_reading_scores_low() {
        let calc = HealthScoreCalculator::default();
        let m = Measurement::new(145.0, 94.0, 37.8, 22.0);
        let s = calc.compute(&m, &anomaly(8.0), &risk(RiskLevel::Medium));
        assert!(s.value() <= 75, "score {s}");
    }

    #[test]
    fn test_monotone_in_anomaly_score() {
        let calc = HealthScoreCalculator::default();
        let m = Measurement::new(88.0, 96.0, 37.0, 18.0);
        let r = risk(RiskLevel::Low);

        let mut last = u8::MAX;
        for score in [0.0, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 64.0] {
            let s = calc.compute(&m, &anomaly(score), &r).value();
            assert!(s <= last, "score rose at anomaly {score}");
            last = s;
        }
    }

    #[test]
    fn test_monotone_in_risk_level() {
        let calc = HealthScoreCalculator::default();
        let m = Measurement::new(88.0, 96.0, 37.0, 18.0);
        let a = anomaly(1.0);

        let scores: Vec<u8> = RiskLevel::ALL
            .iter()
            .map(|l| calc.compute(&m, &a, &risk(*l)).value())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");
    }

    #[test]
    fn test_clamped_to_zero() {
        let calc = HealthScoreCalculator::default();
        let m = Measurement::new(220.0, 60.0, 42.0, 55.0);
        let s = calc.compute(&m, &anomaly(1e9), &risk(RiskLevel::High));
        assert_eq!(s.value(), 0);
    }

    #[test]
    fn test_perfect_reading_is_100() {
        let calc = HealthScoreCalculator::default();
        let m = Measurement::new(70.0, 99.0, 36.6, 14.0);
        let s = calc.compute(&m, &anomaly(0.0), &risk(RiskLevel::Low));
        assert_eq!(s.value(), 100);
    }
}
