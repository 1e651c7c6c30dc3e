//! Narrative generator port: the external generative capability.
//!
//! A generator starts one generation per call and yields text fragments as
//! they arrive. The stream ending means completion; an `Err` item means
//! failure. Dropping the stream cancels the in-flight generation.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::domain::{AnomalyResult, HealthScore, Measurement, RiskResult, TrendSummary};

/// Errors that can occur during narrative generation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneratorError {
    #[error("Generation timed out")]
    Timeout,

    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed generator output: {0}")]
    Malformed(String),
}

/// Incremental text output of one generation.
pub type FragmentStream = BoxStream<'static, Result<String, GeneratorError>>;

/// Everything a generator may use for one request.
///
/// Carries the trend summary, never the raw window.
#[derive(Debug, Clone, Serialize)]
pub struct NarrativeContext {
    pub measurement: Measurement,
    pub health_score: HealthScore,
    pub anomaly: AnomalyResult,
    pub risk: RiskResult,
    pub trend: TrendSummary,
    /// Fully rendered instruction text.
    pub prompt: String,
}

/// Trait for narrative generation backends.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Cheap readiness probe. Unhealthy generators are not attempted.
    async fn is_healthy(&self) -> bool {
        true
    }

    /// Start a generation.
    ///
    /// # Errors
    /// Returns error if the generation cannot be started.
    async fn generate(&self, context: &NarrativeContext) -> Result<FragmentStream, GeneratorError>;
}
