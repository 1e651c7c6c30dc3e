//! Domain layer: Core business types and logic.
//!
//! Pure types with no I/O. All types are serializable and validate their
//! own invariants.

mod assessment;
pub mod features;
mod insight;
mod measurement;
mod statistics;
mod trend;

pub use assessment::{
    AnomalyResult, Assessment, HealthScore, RiskLevel, RiskProbabilities, RiskResult,
    PROBABILITY_TOLERANCE,
};
pub use features::{FeatureVector, ENCODING_VERSION, FEATURE_COUNT, FEATURE_NAMES};
pub use insight::{InsightReport, ReportSource};
pub use measurement::{ActivityLevel, Measurement, SleepQuality};
pub use statistics::{SubjectStatistics, VitalStatistics};
pub use trend::{TrendDirection, TrendSummary, TrendWindow, VitalTrend};
