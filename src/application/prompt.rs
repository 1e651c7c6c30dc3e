//! Narrative prompt rendering and report parsing.

use serde::Deserialize;

use crate::domain::{Assessment, InsightReport, Measurement, ReportSource, TrendSummary};
use crate::ports::GeneratorError;

const SYSTEM_CONTEXT: &str = "\
You are a health and wellness advisor. Interpret vital signs, give clear and \
actionable recommendations, flag concerning trends, and always recommend \
professional medical care when safety requires it. Use simple language. \
Never diagnose specific diseases or conditions.";

const REPORT_SCHEMA: &str = r#"{
  "summary": "1-2 sentence overview of current health status",
  "key_findings": ["finding about the vitals", "..."],
  "recommendations": ["specific actionable recommendation", "..."],
  "immediate_actions": ["urgent action, or an empty array if none"],
  "lifestyle_tips": ["lifestyle tip", "..."],
  "monitoring_advice": "what to monitor or watch for",
  "when_to_seek_help": "when to contact a healthcare provider",
  "encouragement": "positive, encouraging message"
}"#;

/// Render the instruction text for one request.
#[must_use]
pub fn build_prompt(
    measurement: &Measurement,
    assessment: &Assessment,
    trend: &TrendSummary,
) -> String {
    let mut prompt = format!(
        "{SYSTEM_CONTEXT}

## Current Health Assessment

Vital signs:
- Heart Rate: {} bpm
- Blood Oxygen (SpO2): {}%
- Body Temperature: {}°C
- Respiration Rate: {} breaths/min
- Activity Level: {}
- Recent Steps: {}
- Sleep Quality: {}

Model results:
- Anomaly Detection: {}
- Risk Assessment: {}
- Health Score: {}

Timestamp: {}
",
        measurement.heart_rate,
        measurement.blood_oxygen,
        measurement.temperature,
        measurement.respiration_rate,
        measurement.activity_level,
        measurement.steps,
        measurement.sleep_quality,
        assessment.anomaly.status(),
        assessment.risk.level,
        assessment.health_score,
        measurement.timestamp.format("%Y-%m-%d %H:%M:%S"),
    );

    if trend.has_data() {
        prompt.push_str(&format!(
            "
Recent trends (last {} readings):
- Heart Rate: {}
- Blood Oxygen: {}
- Temperature: {}
",
            trend.samples,
            TrendSummary::describe(trend.heart_rate.as_ref()),
            TrendSummary::describe(trend.blood_oxygen.as_ref()),
            TrendSummary::describe(trend.temperature.as_ref()),
        ));
    }

    prompt.push_str(&format!(
        "
## Task

Provide a health analysis as JSON in exactly this shape:

{REPORT_SCHEMA}

Return ONLY valid JSON. No markdown, code fences or text outside the JSON.
"
    ));

    prompt
}

#[derive(Debug, Deserialize)]
struct RawReport {
    summary: String,
    key_findings: Vec<String>,
    recommendations: Vec<String>,
    #[serde(default)]
    immediate_actions: Vec<String>,
    #[serde(default)]
    lifestyle_tips: Vec<String>,
    #[serde(default)]
    monitoring_advice: String,
    #[serde(default)]
    when_to_seek_help: String,
    #[serde(default)]
    encouragement: String,
}

fn strip_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Parse accumulated generator output into a report.
///
/// # Errors
/// Returns `GeneratorError::Malformed` if the text is not JSON or lacks
/// `summary`, `key_findings` or `recommendations`.
pub fn parse_report(text: &str) -> Result<InsightReport, GeneratorError> {
    let cleaned = strip_fences(text);
    let raw: RawReport = serde_json::from_str(cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(200).collect();
        tracing::debug!("Unparsable narrative output: {preview}");
        GeneratorError::Malformed(e.to_string())
    })?;

    if raw.summary.trim().is_empty() {
        return Err(GeneratorError::Malformed("empty summary".into()));
    }

    Ok(InsightReport {
        summary: raw.summary,
        key_findings: raw.key_findings,
        recommendations: raw.recommendations,
        immediate_actions: raw.immediate_actions,
        lifestyle_tips: raw.lifestyle_tips,
        monitoring_advice: raw.monitoring_advice,
        when_to_seek_help: raw.when_to_seek_help,
        encouragement: raw.encouragement,
        source: ReportSource::Generated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnomalyResult, HealthScore, RiskResult, TrendWindow};

    fn assessment() -> Assessment {
        Assessment {
            health_score: HealthScore::new(96),
            anomaly: AnomalyResult {
                is_anomaly: false,
                score: 1.2,
            },
            risk: RiskResult::from_scores([0.8, 0.15, 0.05]).expect("Should build"),
        }
    }

    const VALID: &str = r#"{
        "summary": "Vitals look healthy.",
        "key_findings": ["Heart rate normal"],
        "recommendations": ["Stay hydrated"]
    }"#;

    #[test]
    fn test_prompt_contains_context() {
        let m = Measurement::new(75.0, 98.0, 36.6, 16.0);
        let p = build_prompt(&m, &assessment(), &TrendWindow::empty().summarize());
        assert!(p.contains("Heart Rate: 75 bpm"));
        assert!(p.contains("Risk Assessment: Low Risk"));
        assert!(p.contains("Health Score: 96/100"));
        assert!(p.contains("\"key_findings\""));
        assert!(p.contains("Return ONLY valid JSON"));
        assert!(!p.contains("Recent trends"));
    }

    #[test]
    fn test_prompt_includes_trends_when_available() {
        let ms = (0..6_i32)
            .map(|i| Measurement::new(70.0 + 3.0 * f64::from(i), 97.0, 36.6, 15.0))
            .collect();
        let trend = TrendWindow::new(ms, 20).summarize();
        let m = Measurement::new(88.0, 97.0, 36.6, 15.0);
        let p = build_prompt(&m, &assessment(), &trend);
        assert!(p.contains("Recent trends (last 6 readings)"));
        assert!(p.contains("Heart Rate: increasing"));
    }

    #[test]
    fn test_parse_minimal_report() {
        let r = parse_report(VALID).expect("Should parse");
        assert_eq!(r.source, ReportSource::Generated);
        assert_eq!(r.key_findings, vec!["Heart rate normal"]);
        assert!(r.immediate_actions.is_empty());
        assert!(r.encouragement.is_empty());
    }

    #[test]
    fn test_parse_strips_fences() {
        let fenced = format!("```json\n{VALID}\n```");
        assert!(parse_report(&fenced).is_ok());
        let bare = format!("```\n{VALID}```");
        assert!(parse_report(&bare).is_ok());
    }

    #[test]
    fn test_parse_rejects_missing_required() {
        let err = parse_report(r#"{"summary": "x", "key_findings": []}"#)
            .expect_err("Should reject");
        assert!(matches!(err, GeneratorError::Malformed(_)));
        assert!(parse_report("I think you are fine").is_err());
        assert!(parse_report(r#"{"summary": " ", "key_findings": [], "recommendations": []}"#).is_err());
    }
}
