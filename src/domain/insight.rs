//! Advisory report produced once per evaluated measurement.

use serde::{Deserialize, Serialize};

/// Where a report's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportSource {
    /// Narrative generator output, parsed into the report schema.
    Generated,
    /// Deterministic threshold tables.
    RuleBased,
}

impl std::fmt::Display for ReportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generated => write!(f, "Generated"),
            Self::RuleBased => write!(f, "RuleBased"),
        }
    }
}

/// Human-readable advisory report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub summary: String,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub immediate_actions: Vec<String>,
    pub lifestyle_tips: Vec<String>,
    pub monitoring_advice: String,
    pub when_to_seek_help: String,
    pub encouragement: String,
    pub source: ReportSource,
}

impl InsightReport {
    /// True when the report asks for urgent action.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        !self.immediate_actions.is_empty()
    }
}
