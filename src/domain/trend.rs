//! Bounded recent history for a subject and its compact summary.
//!
//! The window only feeds narrative context; it never influences scoring.

use serde::{Deserialize, Serialize};

use super::Measurement;

/// Number of leading/trailing samples averaged to detect a trend.
const TREND_EDGE_SAMPLES: usize = 5;

/// Mean shifts smaller than this are reported as stable.
const STABLE_DELTA: f64 = 1.0;

/// Ordered sequence of the last N measurements, most recent last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendWindow {
    measurements: Vec<Measurement>,
}

impl TrendWindow {
    /// Build a window keeping at most `max_len` of the newest measurements.
    #[must_use]
    pub fn new(mut measurements: Vec<Measurement>, max_len: usize) -> Self {
        if measurements.len() > max_len {
            measurements.drain(..measurements.len() - max_len);
        }
        Self { measurements }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    #[must_use]
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Summarise heart rate, blood oxygen and temperature movement.
    #[must_use]
    pub fn summarize(&self) -> TrendSummary {
        let series = |f: fn(&Measurement) -> f64| -> Vec<f64> {
            self.measurements.iter().map(f).collect()
        };

        TrendSummary {
            samples: self.measurements.len(),
            heart_rate: VitalTrend::from_values(&series(|m: &Measurement| m.heart_rate)),
            blood_oxygen: VitalTrend::from_values(&series(|m: &Measurement| m.blood_oxygen)),
            temperature: VitalTrend::from_values(&series(|m: &Measurement| m.temperature)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Stable,
    Increasing,
    Decreasing,
}

/// Movement of one vital across the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalTrend {
    pub direction: TrendDirection,
    /// Mean of the trailing samples minus mean of the leading samples.
    pub change: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl VitalTrend {
    /// `None` when fewer than two values are available.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.len() < 2 {
            return None;
        }

        let edge = TREND_EDGE_SAMPLES.min(values.len());
        let head = &values[..edge];
        let tail = &values[values.len() - edge..];
        let change = mean(tail) - mean(head);

        let direction = if change.abs() < STABLE_DELTA {
            TrendDirection::Stable
        } else if change > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        Some(Self {
            direction,
            change,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: mean(values),
        })
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self.direction {
            TrendDirection::Stable => "stable".to_string(),
            TrendDirection::Increasing => format!("increasing (up by {:.1})", self.change),
            TrendDirection::Decreasing => format!("decreasing (down by {:.1})", self.change.abs()),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compact trend description handed to the narrative generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub samples: usize,
    pub heart_rate: Option<VitalTrend>,
    pub blood_oxygen: Option<VitalTrend>,
    pub temperature: Option<VitalTrend>,
}

impl TrendSummary {
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.samples >= 2
    }

    /// Human-readable form of one vital's trend.
    #[must_use]
    pub fn describe(trend: Option<&VitalTrend>) -> String {
        trend.map_or_else(|| "insufficient data".to_string(), VitalTrend::describe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_of(heart_rates: &[f64]) -> TrendWindow {
        let ms = heart_rates
            .iter()
            .map(|hr| Measurement::new(*hr, 97.0, 36.6, 15.0))
            .collect();
        TrendWindow::new(ms, 20)
    }

    #[test]
    fn test_window_keeps_newest() {
        let w = TrendWindow::new(
            (0..30)
                .map(|i| Measurement::new(60.0 + i as f64, 97.0, 36.6, 15.0))
                .collect(),
            20,
        );
        assert_eq!(w.len(), 20);
        assert!((w.measurements()[0].heart_rate - 70.0).abs() < f64::EPSILON);
        assert!((w.measurements()[19].heart_rate - 89.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_increasing_trend() {
        let s = window_of(&[70.0, 70.0, 71.0, 72.0, 75.0, 80.0, 84.0, 88.0, 90.0, 92.0]).summarize();
        let hr = s.heart_rate.expect("Should have trend");
        assert_eq!(hr.direction, TrendDirection::Increasing);
        assert!(hr.describe().starts_with("increasing"));
        assert!((hr.max - 92.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stable_trend() {
        let s = window_of(&[75.0, 75.5, 74.8, 75.2]).summarize();
        assert_eq!(
            s.heart_rate.expect("Should have trend").direction,
            TrendDirection::Stable
        );
        assert_eq!(
            s.blood_oxygen.expect("Should have trend").describe(),
            "stable"
        );
    }

    #[test]
    fn test_insufficient_data() {
        let s = window_of(&[75.0]).summarize();
        assert!(!s.has_data());
        assert!(s.heart_rate.is_none());
        assert_eq!(TrendSummary::describe(s.heart_rate.as_ref()), "insufficient data");
    }
}
