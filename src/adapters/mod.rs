//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `models`: offline-trained artifacts (serde_json, sha2 manifest)
//! - `sqlite`: SQLite for measurement history
//! - `ollama`: reqwest streaming client for narrative generation
//! - `sanitize`: identifier/credential filtering for logs

pub mod models;
pub mod ollama;
pub mod sanitize;
pub mod sqlite;

pub use models::{AnomalyDetector, ArtifactError, ModelInfo, ModelSet, RiskClassifier};
pub use ollama::OllamaNarrator;
// Re-export storage error for lib.rs
pub use sqlite::{SqliteStore, StorageError};
