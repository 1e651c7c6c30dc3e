//! Vital-sign measurement types.
//!
//! A `Measurement` is one timestamped set of wearable readings for a subject.
//! Values outside physiologically plausible bounds are rejected, never clamped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plausible heart rate bounds in bpm.
pub const HEART_RATE_BOUNDS: (f64, f64) = (20.0, 250.0);
/// Plausible SpO2 bounds in percent.
pub const BLOOD_OXYGEN_BOUNDS: (f64, f64) = (50.0, 100.0);
/// Plausible body temperature bounds in °C.
pub const TEMPERATURE_BOUNDS: (f64, f64) = (30.0, 45.0);
/// Plausible respiration rate bounds in breaths/min.
pub const RESPIRATION_RATE_BOUNDS: (f64, f64) = (4.0, 60.0);
/// Upper bound on steps reported for a single sample window.
pub const MAX_STEPS: u32 = 100_000;

/// Self-reported or device-inferred activity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Low,
    #[default]
    Moderate,
    High,
}

impl ActivityLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }

    /// Parse the lowercase storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "moderate" => Some(Self::Moderate),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sleep quality reported for the preceding night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SleepQuality {
    Poor,
    Fair,
    #[default]
    Good,
    Excellent,
}

impl SleepQuality {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "poor" => Some(Self::Poor),
            "fair" => Some(Self::Fair),
            "good" => Some(Self::Good),
            "excellent" => Some(Self::Excellent),
            _ => None,
        }
    }
}

impl std::fmt::Display for SleepQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped set of vital-sign readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Time the sample was taken (defaults to ingestion time)
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Heart rate in bpm
    pub heart_rate: f64,

    /// Peripheral oxygen saturation (SpO2) in %
    pub blood_oxygen: f64,

    /// Body temperature in °C
    pub temperature: f64,

    /// Respiration rate in breaths/min
    pub respiration_rate: f64,

    #[serde(default)]
    pub activity_level: ActivityLevel,

    /// Step count since the previous sample
    #[serde(default)]
    pub steps: u32,

    #[serde(default)]
    pub sleep_quality: SleepQuality,
}

impl Measurement {
    /// Create a measurement stamped with the current time.
    #[must_use]
    pub fn new(heart_rate: f64, blood_oxygen: f64, temperature: f64, respiration_rate: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            heart_rate,
            blood_oxygen,
            temperature,
            respiration_rate,
            activity_level: ActivityLevel::default(),
            steps: 0,
            sleep_quality: SleepQuality::default(),
        }
    }

    #[must_use]
    pub fn with_activity(mut self, activity_level: ActivityLevel) -> Self {
        self.activity_level = activity_level;
        self
    }

    #[must_use]
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    #[must_use]
    pub fn with_sleep(mut self, sleep_quality: SleepQuality) -> Self {
        self.sleep_quality = sleep_quality;
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Validate that every numeric field lies within its plausible bound.
    ///
    /// Non-finite values fail the range checks as well.
    ///
    /// # Errors
    /// Returns all violations, one message per field.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        check_range(&mut errors, "Heart rate", self.heart_rate, HEART_RATE_BOUNDS);
        check_range(&mut errors, "Blood oxygen", self.blood_oxygen, BLOOD_OXYGEN_BOUNDS);
        check_range(&mut errors, "Temperature", self.temperature, TEMPERATURE_BOUNDS);
        check_range(
            &mut errors,
            "Respiration rate",
            self.respiration_rate,
            RESPIRATION_RATE_BOUNDS,
        );
        if self.steps > MAX_STEPS {
            errors.push(format!("Steps {} out of range [0, {MAX_STEPS}]", self.steps));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_range(errors: &mut Vec<String>, name: &str, value: f64, (lo, hi): (f64, f64)) {
    if !(lo..=hi).contains(&value) {
        errors.push(format!("{name} {value} out of range [{lo}, {hi}]"));
    }
}
