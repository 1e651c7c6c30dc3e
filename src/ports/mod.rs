//! Ports layer: Trait definitions for external collaborators.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the engine and the outside world (history storage, generative
//! narrative capability).

mod narrative;
mod storage;

pub use narrative::{FragmentStream, GeneratorError, NarrativeContext, NarrativeGenerator};
pub use storage::MeasurementStore;
