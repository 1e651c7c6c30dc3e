//! Progressive delivery protocol.
//!
//! Every request produces `metrics` first, then either a narrative
//! (`narrative_start`, `narrative_chunk*`, `narrative_complete`) or a single
//! `fallback`, then `complete`. `error` may end a request from any
//! non-terminal state and nothing follows it.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::domain::{AnomalyResult, HealthScore, InsightReport, Measurement, RiskResult};

/// Consumer-facing event. Serialises as `{"type": "<name>", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Metrics {
        measurement: Measurement,
        health_score: HealthScore,
        anomaly: AnomalyResult,
        risk: RiskResult,
    },
    NarrativeStart,
    /// Incremental fragment only, never the accumulated text.
    NarrativeChunk {
        text: String,
    },
    NarrativeComplete {
        report: InsightReport,
    },
    Fallback {
        report: InsightReport,
    },
    Error {
        message: String,
    },
    Complete,
}

impl DeliveryEvent {
    /// Wire name, identical to the serialised `type` tag.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Metrics { .. } => "metrics",
            Self::NarrativeStart => "narrative_start",
            Self::NarrativeChunk { .. } => "narrative_chunk",
            Self::NarrativeComplete { .. } => "narrative_complete",
            Self::Fallback { .. } => "fallback",
            Self::Error { .. } => "error",
            Self::Complete => "complete",
        }
    }

    /// True for events after which no further event is delivered.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Complete)
    }

    /// Render as a server-push frame: `data: {json}\n\n`.
    ///
    /// # Errors
    /// Returns error if the event cannot be serialised.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Init,
    MetricsSent,
    NarrativeStreaming,
    NarrativeResolved,
    FallbackSent,
    Complete,
}

impl DispatchState {
    /// State after delivering `event`, or `None` if the protocol forbids it.
    #[must_use]
    pub fn advance(self, event: &DeliveryEvent) -> Option<Self> {
        use DeliveryEvent as E;

        match (self, event) {
            (Self::Complete, _) => None,
            (_, E::Error { .. }) => Some(Self::Complete),
            (Self::Init, E::Metrics { .. }) => Some(Self::MetricsSent),
            (Self::MetricsSent, E::NarrativeStart) => Some(Self::NarrativeStreaming),
            (Self::NarrativeStreaming, E::NarrativeChunk { .. }) => Some(Self::NarrativeStreaming),
            (Self::NarrativeStreaming, E::NarrativeComplete { .. }) => {
                Some(Self::NarrativeResolved)
            }
            (Self::MetricsSent | Self::NarrativeStreaming, E::Fallback { .. }) => {
                Some(Self::FallbackSent)
            }
            (Self::NarrativeResolved | Self::FallbackSent, E::Complete) => Some(Self::Complete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Consumer disconnected")]
    Disconnected,

    #[error("Event '{event}' not allowed in state {state:?}")]
    InvalidTransition {
        state: DispatchState,
        event: &'static str,
    },
}

/// Producer side of one request's event channel.
///
/// Enforces the delivery order and stops forwarding as soon as the
/// consumer goes away.
pub struct StreamDispatcher {
    tx: mpsc::Sender<DeliveryEvent>,
    cancel: CancellationToken,
    state: DispatchState,
}

impl StreamDispatcher {
    #[must_use]
    pub fn new(tx: mpsc::Sender<DeliveryEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            state: DispatchState::Init,
        }
    }

    /// Open a dispatcher and the matching consumer stream.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, AnalysisStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let stream = AnalysisStream::new(rx, cancel.clone());
        (Self::new(tx, cancel), stream)
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.state
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == DispatchState::Complete
    }

    /// Token cancelled once the consumer disconnects.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deliver one event.
    ///
    /// # Errors
    /// `InvalidTransition` if the event breaks the protocol (nothing is
    /// sent), `Disconnected` if the consumer is gone.
    pub async fn send(&mut self, event: DeliveryEvent) -> Result<(), DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Disconnected);
        }
        let next = self
            .state
            .advance(&event)
            .ok_or(DispatchError::InvalidTransition {
                state: self.state,
                event: event.name(),
            })?;

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(DispatchError::Disconnected),
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    self.cancel.cancel();
                    return Err(DispatchError::Disconnected);
                }
            }
        }

        self.state = next;
        Ok(())
    }

    /// Terminate with an `error` event unless already complete.
    ///
    /// # Errors
    /// Returns `Disconnected` if the consumer is gone.
    pub async fn fail(&mut self, message: impl Into<String>) -> Result<(), DispatchError> {
        if self.is_finished() {
            return Ok(());
        }
        self.send(DeliveryEvent::Error {
            message: message.into(),
        })
        .await
    }
}

/// Consumer side of one analysis request.
///
/// Dropping it (or calling [`AnalysisStream::cancel`]) stops the request:
/// no further events are produced and any in-flight narrative generation
/// is released.
pub struct AnalysisStream {
    rx: mpsc::Receiver<DeliveryEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl AnalysisStream {
    fn new(rx: mpsc::Receiver<DeliveryEvent>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Next event, or `None` once the request has finished.
    pub async fn next_event(&mut self) -> Option<DeliveryEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Disconnect from the request.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }
}

impl Stream for AnalysisStream {
    type Item = DeliveryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReportSource, RiskResult};
    use futures_util::StreamExt;

    fn metrics() -> DeliveryEvent {
        DeliveryEvent::Metrics {
            measurement: Measurement::new(75.0, 98.0, 36.6, 16.0),
            health_score: HealthScore::new(95),
            anomaly: AnomalyResult {
                is_anomaly: false,
                score: 2.0,
            },
            risk: RiskResult::from_scores([0.9, 0.05, 0.05]).expect("Should build"),
        }
    }

    fn report(source: ReportSource) -> InsightReport {
        InsightReport {
            summary: "ok".into(),
            key_findings: vec![],
            recommendations: vec![],
            immediate_actions: vec![],
            lifestyle_tips: vec![],
            monitoring_advice: String::new(),
            when_to_seek_help: String::new(),
            encouragement: String::new(),
            source,
        }
    }

    fn chunk(text: &str) -> DeliveryEvent {
        DeliveryEvent::NarrativeChunk { text: text.into() }
    }

    #[test]
    fn test_event_tags_are_bit_exact() {
        let cases = [
            (metrics(), "metrics"),
            (DeliveryEvent::NarrativeStart, "narrative_start"),
            (chunk("a"), "narrative_chunk"),
            (
                DeliveryEvent::NarrativeComplete {
                    report: report(ReportSource::Generated),
                },
                "narrative_complete",
            ),
            (
                DeliveryEvent::Fallback {
                    report: report(ReportSource::RuleBased),
                },
                "fallback",
            ),
            (
                DeliveryEvent::Error {
                    message: "x".into(),
                },
                "error",
            ),
            (DeliveryEvent::Complete, "complete"),
        ];

        for (event, tag) in cases {
            let json = serde_json::to_value(&event).expect("Should serialize");
            assert_eq!(json["type"], tag);
            assert_eq!(event.name(), tag);
        }

        let json = serde_json::to_value(chunk("Hel")).expect("Should serialize");
        assert_eq!(json, serde_json::json!({"type": "narrative_chunk", "text": "Hel"}));
    }

    #[test]
    fn test_sse_frame() {
        let frame = DeliveryEvent::Complete.to_sse().expect("Should serialize");
        assert_eq!(frame, "data: {\"type\":\"complete\"}\n\n");
    }

    #[test]
    fn test_valid_sequences() {
        let narrative = [
            metrics(),
            DeliveryEvent::NarrativeStart,
            chunk("a"),
            chunk("b"),
            DeliveryEvent::NarrativeComplete {
                report: report(ReportSource::Generated),
            },
            DeliveryEvent::Complete,
        ];
        let fallback_after_start = [
            metrics(),
            DeliveryEvent::NarrativeStart,
            chunk("a"),
            DeliveryEvent::Fallback {
                report: report(ReportSource::RuleBased),
            },
            DeliveryEvent::Complete,
        ];

        for seq in [&narrative[..], &fallback_after_start[..]] {
            let mut state = DispatchState::Init;
            for event in seq {
                state = state.advance(event).expect("Should be allowed");
            }
            assert_eq!(state, DispatchState::Complete);
        }
    }

    #[test]
    fn test_invalid_transitions() {
        let s = DispatchState::Init;
        assert!(s.advance(&DeliveryEvent::NarrativeStart).is_none());
        assert!(s.advance(&DeliveryEvent::Complete).is_none());

        let s = DispatchState::MetricsSent;
        assert!(s.advance(&metrics()).is_none());
        assert!(s.advance(&chunk("x")).is_none());
        assert!(s.advance(&DeliveryEvent::Complete).is_none());

        let s = DispatchState::FallbackSent;
        assert!(s.advance(&chunk("late")).is_none());

        let s = DispatchState::Complete;
        assert!(s
            .advance(&DeliveryEvent::Error {
                message: "again".into()
            })
            .is_none());
    }

    #[test]
    fn test_error_is_terminal_from_any_open_state() {
        let err = DeliveryEvent::Error {
            message: "boom".into(),
        };
        for s in [
            DispatchState::Init,
            DispatchState::MetricsSent,
            DispatchState::NarrativeStreaming,
            DispatchState::FallbackSent,
        ] {
            assert_eq!(s.advance(&err), Some(DispatchState::Complete));
        }
    }

    #[tokio::test]
    async fn test_dispatcher_rejects_out_of_order_without_sending() {
        let (mut d, mut stream) = StreamDispatcher::channel(8);
        let err = d
            .send(DeliveryEvent::NarrativeStart)
            .await
            .expect_err("Should reject");
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
        assert_eq!(d.state(), DispatchState::Init);

        d.fail("internal").await.expect("Should send error");
        assert!(d.is_finished());
        drop(d);

        let events: Vec<_> = (&mut stream).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let (mut d, stream) = StreamDispatcher::channel(8);
        d.send(metrics()).await.expect("Should send");
        drop(stream);

        assert!(d.cancellation().is_cancelled());
        assert_eq!(
            d.send(DeliveryEvent::Fallback {
                report: report(ReportSource::RuleBased)
            })
            .await,
            Err(DispatchError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_cancel_ends_consumer_stream() {
        let (mut d, mut stream) = StreamDispatcher::channel(8);
        d.send(metrics()).await.expect("Should send");
        stream.cancel();
        assert!(stream.next_event().await.is_none());
        assert!(d.send(DeliveryEvent::NarrativeStart).await.is_err());
    }
}
