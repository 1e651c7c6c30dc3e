//! Advisory report synthesis with deterministic fallback.
//!
//! The rule-based report is always computed first. If a healthy narrative
//! generator is available it is attempted once under a single wall-clock
//! deadline; any failure before completion discards the partial text and
//! yields the rule-based report instead.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::time::{timeout_at, Instant};

use super::advisor::RuleAdvisor;
use super::prompt::{build_prompt, parse_report};
use crate::domain::{Assessment, InsightReport, Measurement, TrendWindow};
use crate::ports::{FragmentStream, GeneratorError, NarrativeContext, NarrativeGenerator};

/// One step of a synthesis.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// The generator accepted the request; chunks follow.
    Started,
    /// Incremental generator text, in receipt order.
    Chunk(String),
    /// Generated report, parsed after the generator signalled completion.
    Complete(InsightReport),
    /// Rule-based report.
    Fallback(InsightReport),
}

impl SynthesisEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Fallback(_))
    }
}

/// Lazy, non-restartable sequence of synthesis events.
pub type SynthesisStream = BoxStream<'static, SynthesisEvent>;

pub struct RecommendationSynthesizer {
    advisor: RuleAdvisor,
    generator: Option<Arc<dyn NarrativeGenerator>>,
    timeout: Duration,
}

enum Phase {
    Begin {
        generator: Option<Arc<dyn NarrativeGenerator>>,
        context: Box<NarrativeContext>,
        timeout: Duration,
        fallback: InsightReport,
    },
    Streaming {
        name: String,
        fragments: FragmentStream,
        buffer: String,
        deadline: Instant,
        fallback: InsightReport,
    },
    Done,
}

fn fall_back(
    fallback: InsightReport,
    generator: &str,
    reason: &GeneratorError,
) -> Option<(SynthesisEvent, Phase)> {
    tracing::warn!("Narrative generator '{generator}' failed, using rule-based report: {reason}");
    Some((SynthesisEvent::Fallback(fallback), Phase::Done))
}

async fn step(phase: Phase) -> Option<(SynthesisEvent, Phase)> {
    match phase {
        Phase::Begin {
            generator,
            context,
            timeout,
            fallback,
        } => {
            let Some(generator) = generator else {
                tracing::debug!("No narrative generator configured, using rule-based report");
                return Some((SynthesisEvent::Fallback(fallback), Phase::Done));
            };
            let name = generator.name().to_string();
            let deadline = Instant::now() + timeout;

            match timeout_at(deadline, generator.is_healthy()).await {
                Ok(true) => {}
                Ok(false) => {
                    return fall_back(
                        fallback,
                        &name,
                        &GeneratorError::Unavailable("health check failed".into()),
                    )
                }
                Err(_) => return fall_back(fallback, &name, &GeneratorError::Timeout),
            }

            match timeout_at(deadline, generator.generate(&context)).await {
                Ok(Ok(fragments)) => {
                    tracing::debug!("Narrative generation started on '{name}'");
                    Some((
                        SynthesisEvent::Started,
                        Phase::Streaming {
                            name,
                            fragments,
                            buffer: String::new(),
                            deadline,
                            fallback,
                        },
                    ))
                }
                Ok(Err(e)) => fall_back(fallback, &name, &e),
                Err(_) => fall_back(fallback, &name, &GeneratorError::Timeout),
            }
        }
        Phase::Streaming {
            name,
            mut fragments,
            mut buffer,
            deadline,
            fallback,
        } => loop {
            // Dropping `fragments` on any early return cancels the generation.
            let next = timeout_at(deadline, fragments.next()).await;
            match next {
                Ok(Some(Ok(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    buffer.push_str(&text);
                    return Some((
                        SynthesisEvent::Chunk(text),
                        Phase::Streaming {
                            name,
                            fragments,
                            buffer,
                            deadline,
                            fallback,
                        },
                    ));
                }
                Ok(Some(Err(e))) => return fall_back(fallback, &name, &e),
                Ok(None) => {
                    return match parse_report(&buffer) {
                        Ok(report) => {
                            tracing::debug!(
                                "Narrative report parsed ({} chars from '{name}')",
                                buffer.len()
                            );
                            Some((SynthesisEvent::Complete(report), Phase::Done))
                        }
                        Err(e) => fall_back(fallback, &name, &e),
                    };
                }
                Err(_) => return fall_back(fallback, &name, &GeneratorError::Timeout),
            }
        },
        Phase::Done => None,
    }
}

impl RecommendationSynthesizer {
    #[must_use]
    pub fn new(
        advisor: RuleAdvisor,
        generator: Option<Arc<dyn NarrativeGenerator>>,
        timeout: Duration,
    ) -> Self {
        Self {
            advisor,
            generator,
            timeout,
        }
    }

    /// Start a synthesis for one evaluated measurement.
    ///
    /// The stream ends right after its single terminal event (`Complete` or
    /// `Fallback`). Nothing runs until it is first polled.
    #[must_use]
    pub fn synthesize(
        &self,
        measurement: &Measurement,
        assessment: &Assessment,
        window: &TrendWindow,
    ) -> SynthesisStream {
        let fallback = self.advisor.report(measurement, assessment);
        let trend = window.summarize();
        let prompt = build_prompt(measurement, assessment, &trend);

        let context = NarrativeContext {
            measurement: measurement.clone(),
            health_score: assessment.health_score,
            anomaly: assessment.anomaly,
            risk: assessment.risk,
            trend,
            prompt,
        };

        let start = Phase::Begin {
            generator: self.generator.clone(),
            context: Box::new(context),
            timeout: self.timeout,
            fallback,
        };

        stream::unfold(start, step).boxed()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted generators shared by synthesizer and engine tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    pub const VALID_REPORT: &str = r#"{
        "summary": "Your vitals look steady.",
        "key_findings": ["Heart rate normal"],
        "recommendations": ["Keep moving"],
        "encouragement": "Nice work"
    }"#;

    pub enum Script {
        /// Emit these fragments, then complete.
        Fragments(Vec<String>),
        /// Fail to start.
        Refuse,
        /// Emit fragments, then fail mid-stream.
        FailAfter(Vec<String>),
        /// Emit fragments, then never complete.
        HangAfter(Vec<String>),
        /// Report unhealthy.
        Unhealthy,
    }

    pub struct ScriptedGenerator {
        script: Script,
        pub calls: AtomicUsize,
        pub released: Arc<AtomicBool>,
    }

    impl ScriptedGenerator {
        pub fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                released: Arc::new(AtomicBool::new(false)),
            })
        }

        /// Valid report split into uneven chunks.
        pub fn succeeding() -> Arc<Self> {
            let (a, b) = VALID_REPORT.split_at(17);
            let (b, c) = b.split_at(40);
            Self::new(Script::Fragments(vec![a.into(), b.into(), c.into()]))
        }
    }

    /// Marks the generation released once the stream is dropped.
    struct ReleaseOnDrop(Arc<AtomicBool>);

    impl Drop for ReleaseOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl NarrativeGenerator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn is_healthy(&self) -> bool {
            !matches!(self.script, Script::Unhealthy)
        }

        async fn generate(
            &self,
            _context: &NarrativeContext,
        ) -> Result<FragmentStream, GeneratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let guard = ReleaseOnDrop(Arc::clone(&self.released));

            let items: Vec<Result<String, GeneratorError>> = match &self.script {
                Script::Refuse | Script::Unhealthy => {
                    return Err(GeneratorError::Unavailable("scripted refusal".into()))
                }
                Script::Fragments(f) | Script::HangAfter(f) => f.iter().cloned().map(Ok).collect(),
                Script::FailAfter(f) => f
                    .iter()
                    .cloned()
                    .map(Ok)
                    .chain(std::iter::once(Err(GeneratorError::Transport(
                        "connection reset".into(),
                    ))))
                    .collect(),
            };
            let hang = matches!(self.script, Script::HangAfter(_));

            let head = stream::iter(items);
            let tail = stream::once(async move {
                let _guard = guard;
                if hang {
                    futures_util::future::pending::<()>().await;
                }
            })
            .filter_map(|()| async { None::<Result<String, GeneratorError>> });

            Ok(head.chain(tail).boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{Script, ScriptedGenerator};
    use super::*;
    use crate::domain::{AnomalyResult, HealthScore, ReportSource, RiskResult};

    fn assessment() -> Assessment {
        Assessment {
            health_score: HealthScore::new(95),
            anomaly: AnomalyResult {
                is_anomaly: false,
                score: 2.0,
            },
            risk: RiskResult::from_scores([0.87, 0.1, 0.03]).expect("Should build"),
        }
    }

    async fn run(
        generator: Option<Arc<dyn NarrativeGenerator>>,
        timeout: Duration,
    ) -> Vec<SynthesisEvent> {
        let synth = RecommendationSynthesizer::new(RuleAdvisor::default(), generator, timeout);
        let m = Measurement::new(75.0, 98.0, 36.6, 16.0);
        synth
            .synthesize(&m, &assessment(), &TrendWindow::empty())
            .collect()
            .await
    }

    fn terminal_report(events: &[SynthesisEvent]) -> &InsightReport {
        match events.last() {
            Some(SynthesisEvent::Complete(r) | SynthesisEvent::Fallback(r)) => r,
            other => panic!("Expected terminal event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_generator_falls_back_immediately() {
        let events = run(None, Duration::from_secs(1)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SynthesisEvent::Fallback(_)));
        assert_eq!(terminal_report(&events).source, ReportSource::RuleBased);
    }

    #[tokio::test]
    async fn test_generated_report_streams_chunks_in_order() {
        let generator = ScriptedGenerator::succeeding();
        let events = run(Some(generator.clone()), Duration::from_secs(5)).await;

        assert_eq!(events[0], SynthesisEvent::Started);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                SynthesisEvent::Chunk(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, testing::VALID_REPORT);

        let report = terminal_report(&events);
        assert_eq!(report.source, ReportSource::Generated);
        assert_eq!(report.summary, "Your vitals look steady.");
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refusal_falls_back_without_start() {
        let generator = ScriptedGenerator::new(Script::Refuse);
        let events = run(Some(generator), Duration::from_secs(5)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(terminal_report(&events).source, ReportSource::RuleBased);
    }

    #[tokio::test]
    async fn test_unhealthy_generator_is_not_attempted() {
        let generator = ScriptedGenerator::new(Script::Unhealthy);
        let events = run(Some(generator.clone()), Duration::from_secs(5)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_discards_partial_text() {
        let generator = ScriptedGenerator::new(Script::FailAfter(vec!["{\"summary\":".into()]));
        let events = run(Some(generator), Duration::from_secs(5)).await;

        assert_eq!(events[0], SynthesisEvent::Started);
        assert!(matches!(events[1], SynthesisEvent::Chunk(_)));
        assert_eq!(events.len(), 3);
        assert_eq!(terminal_report(&events).source, ReportSource::RuleBased);
    }

    #[tokio::test]
    async fn test_malformed_output_falls_back() {
        let generator =
            ScriptedGenerator::new(Script::Fragments(vec!["You seem fine overall.".into()]));
        let events = run(Some(generator), Duration::from_secs(5)).await;
        assert_eq!(terminal_report(&events).source, ReportSource::RuleBased);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_generation() {
        let generator = ScriptedGenerator::new(Script::HangAfter(vec!["{\"sum".into()]));
        let started = Instant::now();
        let events = run(Some(generator.clone()), Duration::from_millis(500)).await;

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(terminal_report(&events).source, ReportSource::RuleBased);
        assert!(!events
            .iter()
            .skip_while(|e| !e.is_terminal())
            .skip(1)
            .any(|e| matches!(e, SynthesisEvent::Chunk(_))));
        assert!(generator.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_nothing_runs_until_polled() {
        let generator = ScriptedGenerator::succeeding();
        let synth = RecommendationSynthesizer::new(
            RuleAdvisor::default(),
            Some(generator.clone()),
            Duration::from_secs(1),
        );
        let m = Measurement::new(75.0, 98.0, 36.6, 16.0);
        let stream = synth.synthesize(&m, &assessment(), &TrendWindow::empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
