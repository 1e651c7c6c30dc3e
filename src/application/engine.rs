//! Analytics engine: the per-request pipeline.
//!
//! validate → encode → (anomaly, risk) → health score → `metrics` event →
//! synthesis → narrative or fallback events → `complete`.
//!
//! Model artifacts are loaded once and shared read-only by every request.
//! Each request runs as its own task with its own event channel; nothing
//! mutable is shared between requests.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;

use super::advisor::RuleAdvisor;
use super::dispatcher::{AnalysisStream, DeliveryEvent, DispatchError, StreamDispatcher};
use super::health_score::HealthScoreCalculator;
use super::preprocessor::Preprocessor;
use super::synthesizer::{RecommendationSynthesizer, SynthesisEvent};
use crate::adapters::sanitize::subject_tag;
use crate::adapters::{AnomalyDetector, ModelSet, RiskClassifier};
use crate::config::EngineConfig;
use crate::domain::{
    AnomalyResult, Assessment, FeatureVector, HealthScore, InsightReport, Measurement,
    RiskResult, TrendWindow, PROBABILITY_TOLERANCE,
};
use crate::ports::{MeasurementStore, NarrativeGenerator};
use crate::{EngineError, Result};

/// Events buffered per request before the producer waits on the consumer.
const EVENT_BUFFER: usize = 64;

/// Fully resolved result of the non-streaming interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    pub health_score: HealthScore,
    pub anomaly: AnomalyResult,
    pub risk: RiskResult,
    pub report: InsightReport,
}

/// Entry point for analysing measurements.
pub struct AnalyticsEngine<S: MeasurementStore> {
    pipeline: Arc<Pipeline<S>>,
}

impl<S: MeasurementStore> Clone for AnalyticsEngine<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

struct Pipeline<S> {
    anomaly: Arc<AnomalyDetector>,
    risk: Arc<RiskClassifier>,
    scorer: HealthScoreCalculator,
    synthesizer: RecommendationSynthesizer,
    store: Arc<S>,
    trend_window_size: usize,
}

impl<S: MeasurementStore + 'static> AnalyticsEngine<S> {
    /// Build an engine from loaded models.
    ///
    /// # Errors
    /// `ModelUnavailable` if either model failed to load, `Config` if the
    /// configuration is invalid.
    pub fn new(
        config: &EngineConfig,
        models: &ModelSet,
        store: Arc<S>,
        generator: Option<Arc<dyn NarrativeGenerator>>,
    ) -> Result<Self> {
        config.validate()?;
        let (anomaly, risk) = models.require_all()?;

        if let Some(g) = &generator {
            tracing::info!("Narrative generator: {}", g.name());
        } else {
            tracing::info!("No narrative generator configured, reports will be rule-based");
        }

        let synthesizer = RecommendationSynthesizer::new(
            RuleAdvisor::new(config.vital_bands.clone()),
            generator,
            config.narrative_timeout(),
        );

        Ok(Self {
            pipeline: Arc::new(Pipeline {
                anomaly,
                risk,
                scorer: HealthScoreCalculator::new(
                    config.score_weights.clone(),
                    config.vital_bands.clone(),
                ),
                synthesizer,
                store,
                trend_window_size: config.trend_window_size,
            }),
        })
    }

    /// Score one measurement without storage or narrative.
    ///
    /// # Errors
    /// `Validation` for out-of-range fields, `Internal` if a model produces
    /// an invalid result.
    pub fn assess(&self, measurement: &Measurement) -> Result<Assessment> {
        let features = Preprocessor::encode(measurement)?;
        self.pipeline.assess(measurement, &features)
    }

    /// Start a streaming analysis.
    ///
    /// Validation happens before anything is spawned, so an invalid
    /// measurement yields an error and no events.
    ///
    /// # Errors
    /// Returns `Validation` if the measurement is out of range, `Internal`
    /// if called outside a Tokio runtime.
    pub fn analyze_stream(
        &self,
        subject_id: &str,
        measurement: Measurement,
    ) -> Result<AnalysisStream> {
        let features = Preprocessor::encode(&measurement).inspect_err(|e| {
            tracing::warn!(subject_tag = %subject_tag(subject_id), "Rejected measurement: {e}");
        })?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Internal(format!("No async runtime: {e}")))?;

        let (dispatcher, stream) = StreamDispatcher::channel(EVENT_BUFFER);
        let pipeline = Arc::clone(&self.pipeline);
        let subject_id = subject_id.to_string();

        runtime.spawn(async move {
            pipeline
                .run(subject_id, measurement, features, dispatcher)
                .await;
        });

        Ok(stream)
    }

    /// Analyse and wait for the final report.
    ///
    /// # Errors
    /// `Validation` for out-of-range input; `Internal` if the request ended
    /// with an `error` event or without a report.
    pub async fn analyze(&self, subject_id: &str, measurement: Measurement) -> Result<AnalysisOutcome> {
        let mut stream = self.analyze_stream(subject_id, measurement)?;

        let mut assessment = None;
        let mut report = None;

        while let Some(event) = stream.next_event().await {
            match event {
                DeliveryEvent::Metrics {
                    health_score,
                    anomaly,
                    risk,
                    ..
                } => {
                    assessment = Some(Assessment {
                        health_score,
                        anomaly,
                        risk,
                    });
                }
                DeliveryEvent::NarrativeComplete { report: r } | DeliveryEvent::Fallback { report: r } => {
                    report = Some(r);
                }
                DeliveryEvent::Error { message } => return Err(EngineError::Internal(message)),
                DeliveryEvent::Complete => break,
                DeliveryEvent::NarrativeStart | DeliveryEvent::NarrativeChunk { .. } => {}
            }
        }

        match (assessment, report) {
            (Some(a), Some(report)) => Ok(AnalysisOutcome {
                health_score: a.health_score,
                anomaly: a.anomaly,
                risk: a.risk,
                report,
            }),
            _ => Err(EngineError::Internal(
                "Analysis ended without a report".to_string(),
            )),
        }
    }
}

impl<S: MeasurementStore> Pipeline<S> {
    fn assess(&self, measurement: &Measurement, features: &FeatureVector) -> Result<Assessment> {
        let anomaly = self.anomaly.score(features);
        if !anomaly.score.is_finite() {
            return Err(EngineError::Internal(format!(
                "Anomaly score is not finite: {}",
                anomaly.score
            )));
        }

        let risk = self.risk.classify(features);
        if (risk.probabilities.sum() - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(EngineError::Internal(format!(
                "Risk probabilities sum to {}",
                risk.probabilities.sum()
            )));
        }

        let health_score = self.scorer.compute(measurement, &anomaly, &risk);

        Ok(Assessment {
            health_score,
            anomaly,
            risk,
        })
    }

    /// Trailing window, read before the new measurement is stored.
    fn load_window(&self, subject_id: &str, tag: &str) -> TrendWindow {
        match self.store.get_window(subject_id, self.trend_window_size) {
            Ok(ms) => TrendWindow::new(ms, self.trend_window_size),
            Err(e) => {
                tracing::warn!(subject_tag = %tag, "History unavailable, using empty window: {e}");
                TrendWindow::empty()
            }
        }
    }

    fn record(
        &self,
        subject_id: &str,
        tag: &str,
        measurement: &Measurement,
        assessment: &Assessment,
    ) {
        if let Err(e) = self.store.append_assessed(subject_id, measurement, assessment) {
            tracing::warn!(subject_tag = %tag, "Failed to store measurement: {e}");
        }
    }

    async fn run(
        self: Arc<Self>,
        subject_id: String,
        measurement: Measurement,
        features: FeatureVector,
        mut dispatcher: StreamDispatcher,
    ) {
        let tag = subject_tag(&subject_id);

        match self
            .deliver(&subject_id, &tag, measurement, &features, &mut dispatcher)
            .await
        {
            Ok(()) => tracing::debug!(subject_tag = %tag, "Analysis delivered"),
            Err(DispatchError::Disconnected) => {
                tracing::info!(subject_tag = %tag, "Consumer disconnected, analysis abandoned");
            }
            Err(e) => {
                tracing::error!(subject_tag = %tag, "Delivery protocol violated: {e}");
                let _ = dispatcher.fail(e.to_string()).await;
            }
        }
    }

    async fn deliver(
        &self,
        subject_id: &str,
        tag: &str,
        measurement: Measurement,
        features: &FeatureVector,
        dispatcher: &mut StreamDispatcher,
    ) -> std::result::Result<(), DispatchError> {
        let window = self.load_window(subject_id, tag);

        let assessment = match self.assess(&measurement, features) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(subject_tag = %tag, "Scoring failed: {e}");
                return dispatcher.fail(e.to_string()).await;
            }
        };
        // Only measurements that produced a valid assessment join the history.
        self.record(subject_id, tag, &measurement, &assessment);

        tracing::info!(
            subject_tag = %tag,
            "Assessed: score {}, {}, {} (history {})",
            assessment.health_score,
            assessment.anomaly.status(),
            assessment.risk.level,
            window.len()
        );

        let mut synthesis = self
            .synthesizer
            .synthesize(&measurement, &assessment, &window);

        dispatcher
            .send(DeliveryEvent::Metrics {
                measurement,
                health_score: assessment.health_score,
                anomaly: assessment.anomaly,
                risk: assessment.risk,
            })
            .await?;

        let cancel = dispatcher.cancellation().clone();
        loop {
            // Dropping `synthesis` releases any in-flight generation.
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DispatchError::Disconnected),
                next = synthesis.next() => next,
            };
            let Some(event) = next else { break };

            let event = match event {
                SynthesisEvent::Started => DeliveryEvent::NarrativeStart,
                SynthesisEvent::Chunk(text) => DeliveryEvent::NarrativeChunk { text },
                SynthesisEvent::Complete(report) => {
                    warn_if_urgent(tag, &report);
                    DeliveryEvent::NarrativeComplete { report }
                }
                SynthesisEvent::Fallback(report) => {
                    warn_if_urgent(tag, &report);
                    DeliveryEvent::Fallback { report }
                }
            };
            dispatcher.send(event).await?;
        }

        dispatcher.send(DeliveryEvent::Complete).await
    }
}

fn warn_if_urgent(tag: &str, report: &InsightReport) {
    if report.is_urgent() {
        tracing::warn!(
            subject_tag = %tag,
            "Report calls for {} immediate action(s)",
            report.immediate_actions.len()
        );
    }
}
