//! Engine configuration.
//!
//! Loaded from TOML, then overridden by `VITALSTREAM_*` environment
//! variables. Every field has a default so an empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Upper bound on `trend_window_size`.
pub const MAX_TREND_WINDOW: usize = 500;

const ENV_NARRATIVE_TIMEOUT_MS: &str = "VITALSTREAM_NARRATIVE_TIMEOUT_MS";
const ENV_TREND_WINDOW_SIZE: &str = "VITALSTREAM_TREND_WINDOW_SIZE";
const ENV_ANOMALY_ARTIFACT: &str = "VITALSTREAM_ANOMALY_ARTIFACT";
const ENV_RISK_ARTIFACT: &str = "VITALSTREAM_RISK_ARTIFACT";
const ENV_REQUIRE_MANIFEST: &str = "VITALSTREAM_REQUIRE_MANIFEST";
const ENV_DATABASE: &str = "VITALSTREAM_DATABASE";
const ENV_NARRATIVE_ENDPOINT: &str = "VITALSTREAM_NARRATIVE_ENDPOINT";
const ENV_NARRATIVE_MODEL: &str = "VITALSTREAM_NARRATIVE_MODEL";

/// Points deducted from the health score, per contributor.
///
/// Vital weights are the maximum deduction when that vital reaches its
/// critical bound. `anomaly` is points per unit of anomaly score (capped at
/// `anomaly_cap`); `risk` is points per severity step above Low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub heart_rate: f64,
    pub blood_oxygen: f64,
    pub temperature: f64,
    pub respiration_rate: f64,
    pub anomaly: f64,
    pub anomaly_cap: f64,
    pub risk: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            heart_rate: 25.0,
            blood_oxygen: 30.0,
            temperature: 20.0,
            respiration_rate: 15.0,
            anomaly: 2.5,
            anomaly_cap: 30.0,
            risk: 10.0,
        }
    }
}

impl ScoreWeights {
    fn entries(&self) -> [(&'static str, f64); 7] {
        [
            ("heart_rate", self.heart_rate),
            ("blood_oxygen", self.blood_oxygen),
            ("temperature", self.temperature),
            ("respiration_rate", self.respiration_rate),
            ("anomaly", self.anomaly),
            ("anomaly_cap", self.anomaly_cap),
            ("risk", self.risk),
        ]
    }
}

/// Where a value sits relative to a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandPosition {
    Below,
    Within,
    Above,
}

/// Nested `[low, high]` ranges for one vital: normal inside warning inside
/// critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalBand {
    pub normal: [f64; 2],
    pub warning: [f64; 2],
    pub critical: [f64; 2],
}

impl VitalBand {
    #[must_use]
    pub const fn new(normal: [f64; 2], warning: [f64; 2], critical: [f64; 2]) -> Self {
        Self {
            normal,
            warning,
            critical,
        }
    }

    #[must_use]
    pub fn position(&self, value: f64) -> BandPosition {
        position_in(self.normal, value)
    }

    #[must_use]
    pub fn warning_position(&self, value: f64) -> BandPosition {
        position_in(self.warning, value)
    }

    /// 0 inside the normal band, rising linearly to 1 at the critical bound.
    #[must_use]
    pub fn penalty_fraction(&self, value: f64) -> f64 {
        let [lo, hi] = self.normal;
        let (distance, span) = if value < lo {
            (lo - value, lo - self.critical[0])
        } else if value > hi {
            (value - hi, self.critical[1] - hi)
        } else {
            return 0.0;
        };
        if span <= 0.0 {
            return 1.0;
        }
        (distance / span).min(1.0)
    }

    fn is_nested(&self) -> bool {
        let ordered = |r: [f64; 2]| r[0].is_finite() && r[1].is_finite() && r[0] <= r[1];
        ordered(self.normal)
            && ordered(self.warning)
            && ordered(self.critical)
            && self.normal[0] < self.normal[1]
            && self.critical[0] <= self.warning[0]
            && self.warning[0] <= self.normal[0]
            && self.normal[1] <= self.warning[1]
            && self.warning[1] <= self.critical[1]
    }
}

fn position_in([lo, hi]: [f64; 2], value: f64) -> BandPosition {
    if value < lo {
        BandPosition::Below
    } else if value > hi {
        BandPosition::Above
    } else {
        BandPosition::Within
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalBands {
    pub heart_rate: VitalBand,
    pub blood_oxygen: VitalBand,
    pub temperature: VitalBand,
    pub respiration_rate: VitalBand,
}

impl Default for VitalBands {
    fn default() -> Self {
        Self {
            heart_rate: VitalBand::new([60.0, 100.0], [50.0, 120.0], [40.0, 140.0]),
            blood_oxygen: VitalBand::new([95.0, 100.0], [90.0, 100.0], [85.0, 100.0]),
            temperature: VitalBand::new([36.1, 37.2], [35.5, 38.0], [35.0, 39.5]),
            respiration_rate: VitalBand::new([12.0, 20.0], [10.0, 24.0], [8.0, 30.0]),
        }
    }
}

/// HTTP narrative backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Generation length limit passed to the backend.
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub score_weights: ScoreWeights,

    #[serde(default)]
    pub vital_bands: VitalBands,

    #[serde(default = "default_anomaly_artifact")]
    pub anomaly_artifact_path: PathBuf,

    #[serde(default = "default_risk_artifact")]
    pub risk_artifact_path: PathBuf,

    /// Refuse artifacts when their directory has no `manifest.json`.
    #[serde(default)]
    pub require_manifest: bool,

    #[serde(default = "default_narrative_timeout")]
    pub narrative_timeout_ms: u64,

    #[serde(default = "default_trend_window")]
    pub trend_window_size: usize,

    /// `None` keeps history in memory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// `None` disables the narrative backend; reports are rule-based.
    #[serde(default)]
    pub narrative: Option<NarrativeConfig>,
}

fn default_anomaly_artifact() -> PathBuf {
    PathBuf::from("models/anomaly_detector.json")
}

fn default_risk_artifact() -> PathBuf {
    PathBuf::from("models/risk_classifier.json")
}

fn default_narrative_timeout() -> u64 {
    15_000
}

fn default_trend_window() -> usize {
    20
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            score_weights: ScoreWeights::default(),
            vital_bands: VitalBands::default(),
            anomaly_artifact_path: default_anomaly_artifact(),
            risk_artifact_path: default_risk_artifact(),
            require_manifest: false,
            narrative_timeout_ms: default_narrative_timeout(),
            trend_window_size: default_trend_window(),
            database_path: None,
            narrative: None,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// Returns error if the TOML is malformed.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read a TOML file, apply environment overrides and validate.
    ///
    /// # Errors
    /// Returns error if the file is unreadable, malformed or invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Defaults plus environment overrides.
    ///
    /// # Errors
    /// Returns error if an override is unparsable or the result is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns error if an override value cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| EngineError::Config(format!("{key}: cannot parse '{value}'")))
        }

        if let Some(v) = lookup(ENV_NARRATIVE_TIMEOUT_MS) {
            self.narrative_timeout_ms = parse(ENV_NARRATIVE_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_TREND_WINDOW_SIZE) {
            self.trend_window_size = parse(ENV_TREND_WINDOW_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_ANOMALY_ARTIFACT) {
            self.anomaly_artifact_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_RISK_ARTIFACT) {
            self.risk_artifact_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_REQUIRE_MANIFEST) {
            self.require_manifest = matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "YES");
        }
        if let Some(v) = lookup(ENV_DATABASE) {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_NARRATIVE_ENDPOINT) {
            self.narrative.get_or_insert_with(NarrativeConfig::default).endpoint = v;
        }
        if let Some(v) = lookup(ENV_NARRATIVE_MODEL) {
            self.narrative.get_or_insert_with(NarrativeConfig::default).model = v;
        }
        Ok(())
    }

    /// # Errors
    /// Returns `EngineError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.narrative_timeout_ms == 0 {
            return Err(EngineError::Config(
                "narrative_timeout_ms must be positive".into(),
            ));
        }
        if self.trend_window_size == 0 || self.trend_window_size > MAX_TREND_WINDOW {
            return Err(EngineError::Config(format!(
                "trend_window_size must be in 1..={MAX_TREND_WINDOW}, got {}",
                self.trend_window_size
            )));
        }
        for (name, w) in self.score_weights.entries() {
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::Config(format!(
                    "score weight {name} must be a non-negative number, got {w}"
                )));
            }
        }
        let bands = [
            ("heart_rate", &self.vital_bands.heart_rate),
            ("blood_oxygen", &self.vital_bands.blood_oxygen),
            ("temperature", &self.vital_bands.temperature),
            ("respiration_rate", &self.vital_bands.respiration_rate),
        ];
        for (name, band) in bands {
            if !band.is_nested() {
                return Err(EngineError::Config(format!(
                    "vital band {name} must satisfy critical <= warning <= normal ranges"
                )));
            }
        }
        if let Some(n) = &self.narrative {
            if !(0.0..=2.0).contains(&n.temperature) {
                return Err(EngineError::Config(format!(
                    "narrative temperature must be in [0, 2], got {}",
                    n.temperature
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn narrative_timeout(&self) -> Duration {
        Duration::from_millis(self.narrative_timeout_ms)
    }
}
