//! Per-subject history statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Summary of one vital over a subject's stored history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalStatistics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; 0 with fewer than two readings.
    pub std: f64,
}

impl VitalStatistics {
    /// Build from a count, mean, sum of squared deviations from the mean,
    /// and range.
    ///
    /// Returns `None` for an empty history.
    #[must_use]
    pub fn from_moments(
        count: usize,
        mean: f64,
        squared_deviations: f64,
        min: f64,
        max: f64,
    ) -> Option<Self> {
        if count == 0 {
            return None;
        }
        let std = if count < 2 {
            0.0
        } else {
            (squared_deviations.max(0.0) / (count - 1) as f64).sqrt()
        };
        Some(Self { mean, min, max, std })
    }
}

/// Aggregate view of everything stored for one subject.
///
/// Assessment fields only count measurements that were stored with their
/// assessment; `assessed_records` says how many that is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectStatistics {
    pub total_records: usize,
    pub heart_rate: VitalStatistics,
    pub blood_oxygen: VitalStatistics,
    pub temperature: VitalStatistics,
    pub respiration_rate: VitalStatistics,
    /// Records per activity level.
    pub activity_distribution: BTreeMap<String, usize>,
    pub total_steps: u64,
    pub avg_steps_per_record: f64,
    pub assessed_records: usize,
    pub anomaly_count: usize,
    pub avg_health_score: Option<f64>,
    /// Assessed records per risk level.
    pub risk_distribution: BTreeMap<String, usize>,
}
