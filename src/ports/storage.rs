//! Storage port: Trait for the measurement history collaborator.
//!
//! The engine reads a bounded trailing window and appends accepted
//! measurements; durability guarantees belong to the implementation.

use crate::domain::{Assessment, Measurement, SubjectStatistics};

/// Trait for per-subject measurement history.
pub trait MeasurementStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load up to `max_count` of the subject's most recent measurements.
    ///
    /// # Returns
    /// Measurements ordered oldest first (most recent last).
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn get_window(&self, subject_id: &str, max_count: usize)
        -> Result<Vec<Measurement>, Self::Error>;

    /// Append a validated measurement to the subject's history.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn append(&self, subject_id: &str, measurement: &Measurement) -> Result<(), Self::Error>;

    /// Append a measurement together with the assessment it received.
    ///
    /// Stores that keep no assessment history may ignore it.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn append_assessed(
        &self,
        subject_id: &str,
        measurement: &Measurement,
        _assessment: &Assessment,
    ) -> Result<(), Self::Error> {
        self.append(subject_id, measurement)
    }

    /// Count stored measurements for a subject.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn count(&self, subject_id: &str) -> Result<usize, Self::Error>;

    /// Aggregate statistics over the subject's whole history.
    ///
    /// # Errors
    /// Returns error if the subject has no history or storage fails.
    fn statistics(&self, subject_id: &str) -> Result<SubjectStatistics, Self::Error>;
}
