//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement the
//! analysis pipeline and its progressive delivery.

mod advisor;
mod dispatcher;
mod engine;
mod health_score;
mod preprocessor;
mod prompt;
mod synthesizer;

pub use advisor::RuleAdvisor;
pub use dispatcher::{AnalysisStream, DeliveryEvent, DispatchError, DispatchState, StreamDispatcher};
pub use engine::{AnalysisOutcome, AnalyticsEngine};
pub use health_score::HealthScoreCalculator;
pub use preprocessor::Preprocessor;
pub use prompt::{build_prompt, parse_report};
pub use synthesizer::{RecommendationSynthesizer, SynthesisEvent, SynthesisStream};
