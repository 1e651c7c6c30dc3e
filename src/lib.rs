//! # vitalstream
//!
//! Health analytics and progressive insight delivery.
//!
//! This crate provides:
//! - Validation and versioned feature encoding of vital-sign measurements
//! - Anomaly detection and multi-class risk classification from offline-trained artifacts
//! - A composite 0-100 health score with configurable weights
//! - Advisory reports from a narrative generator, with a deterministic rule-based fallback
//! - Incremental delivery of results as a typed event sequence
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (Measurement, RiskLevel, InsightReport, ...)
//! - `ports`: Trait definitions for external collaborators (storage, narrative generation)
//! - `adapters`: Concrete implementations (model artifacts, SQLite, Ollama, log sanitizing)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Engine configuration surface

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{AnalysisOutcome, AnalysisStream, AnalyticsEngine, DeliveryEvent};
pub use config::EngineConfig;
pub use domain::{
    AnomalyResult, HealthScore, InsightReport, Measurement, ReportSource, RiskLevel, RiskResult,
    SubjectStatistics,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the analytics engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid measurement: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Narrative generation timed out")]
    GeneratorTimeout,

    #[error("Narrative generation failed: {0}")]
    GeneratorFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ports::GeneratorError> for EngineError {
    fn from(e: ports::GeneratorError) -> Self {
        match e {
            ports::GeneratorError::Timeout => Self::GeneratorTimeout,
            other => Self::GeneratorFailure(other.to_string()),
        }
    }
}
