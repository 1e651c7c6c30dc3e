//! Versioned numeric feature encoding shared with the offline-trained models.
//!
//! Order and categorical codes are part of the artifact contract: changing
//! either requires bumping `ENCODING_VERSION` and retraining.

use serde::{Deserialize, Serialize};

use super::{ActivityLevel, SleepQuality};

/// Current encoding version. Artifacts record the version they were trained on.
pub const ENCODING_VERSION: u32 = 1;

/// Number of features in a `FeatureVector`.
pub const FEATURE_COUNT: usize = 7;

/// Feature names in encoding order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "heart_rate",
    "blood_oxygen",
    "temperature",
    "respiration_rate",
    "activity_level_encoded",
    "steps",
    "sleep_quality_encoded",
];

/// Index of each feature inside `FeatureVector::values`.
pub mod index {
    pub const HEART_RATE: usize = 0;
    pub const BLOOD_OXYGEN: usize = 1;
    pub const TEMPERATURE: usize = 2;
    pub const RESPIRATION_RATE: usize = 3;
    pub const ACTIVITY_LEVEL: usize = 4;
    pub const STEPS: usize = 5;
    pub const SLEEP_QUALITY: usize = 6;
}

impl ActivityLevel {
    /// Integer code under encoding version 1.
    #[must_use]
    pub fn code(&self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Moderate => 1.0,
            Self::High => 2.0,
        }
    }
}

impl SleepQuality {
    /// Integer code under encoding version 1.
    #[must_use]
    pub fn code(&self) -> f64 {
        match self {
            Self::Poor => 0.0,
            Self::Fair => 1.0,
            Self::Good => 2.0,
            Self::Excellent => 3.0,
        }
    }
}

/// Fixed-length ordered numeric encoding of a `Measurement`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub encoding_version: u32,
    pub values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    #[must_use]
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self {
            encoding_version: ENCODING_VERSION,
            values,
        }
    }
}

/// Check that an artifact's declared feature names match this encoding.
///
/// # Errors
/// Returns a description of the first mismatch.
pub fn check_feature_names(names: &[String]) -> Result<(), String> {
    if names.len() != FEATURE_COUNT {
        return Err(format!(
            "Expected {FEATURE_COUNT} features, artifact declares {}",
            names.len()
        ));
    }
    for (i, (got, want)) in names.iter().zip(FEATURE_NAMES.iter()).enumerate() {
        if got != want {
            return Err(format!("Feature {i} is '{got}', encoding expects '{want}'"));
        }
    }
    Ok(())
}
