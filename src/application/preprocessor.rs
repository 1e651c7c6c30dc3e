//! Measurement validation and feature encoding.

use crate::domain::{features::index, FeatureVector, Measurement, FEATURE_COUNT};
use crate::{EngineError, Result};

/// Turns a raw measurement into the versioned feature vector the models
/// were trained on.
pub struct Preprocessor;

impl Preprocessor {
    /// Validate and encode.
    ///
    /// Encoding is deterministic: equal measurements give equal vectors.
    ///
    /// # Errors
    /// Returns `EngineError::Validation` listing every out-of-range field.
    pub fn encode(measurement: &Measurement) -> Result<FeatureVector> {
        measurement.validate().map_err(EngineError::Validation)?;

        let mut values = [0.0; FEATURE_COUNT];
        values[index::HEART_RATE] = measurement.heart_rate;
        values[index::BLOOD_OXYGEN] = measurement.blood_oxygen;
        values[index::TEMPERATURE] = measurement.temperature;
        values[index::RESPIRATION_RATE] = measurement.respiration_rate;
        values[index::ACTIVITY_LEVEL] = measurement.activity_level.code();
        values[index::STEPS] = f64::from(measurement.steps);
        values[index::SLEEP_QUALITY] = measurement.sleep_quality.code();

        Ok(FeatureVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityLevel, SleepQuality, ENCODING_VERSION};

    #[test]
    fn test_encode_order_and_codes() {
        let m = Measurement::new(72.0, 98.0, 36.7, 14.0)
            .with_activity(ActivityLevel::High)
            .with_steps(3400)
            .with_sleep(SleepQuality::Fair);

        let fv = Preprocessor::encode(&m).expect("Should encode");
        assert_eq!(fv.encoding_version, ENCODING_VERSION);
        assert_eq!(fv.values, [72.0, 98.0, 36.7, 14.0, 2.0, 3400.0, 1.0]);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let m = Measurement::new(80.0, 96.0, 36.9, 17.0);
        assert_eq!(
            Preprocessor::encode(&m).expect("Should encode"),
            Preprocessor::encode(&m.clone()).expect("Should encode")
        );
    }

    #[test]
    fn test_invalid_measurement_lists_all_fields() {
        let m = Measurement::new(300.0, 40.0, 36.6, 16.0);
        match Preprocessor::encode(&m) {
            Err(EngineError::Validation(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].starts_with("Heart rate"));
                assert!(errors[1].starts_with("Blood oxygen"));
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_rejected() {
        let m = Measurement::new(f64::NAN, 98.0, 36.6, 16.0);
        assert!(matches!(
            Preprocessor::encode(&m),
            Err(EngineError::Validation(_))
        ));
    }
}
