//! Deterministic rule-based advisory reports.
//!
//! Used whenever the narrative generator is absent, unhealthy, slow or
//! returns something unparsable. Content depends only on the measurement,
//! the assessment and the configured vital bands.

use crate::config::{BandPosition, VitalBand, VitalBands};
use crate::domain::{
    ActivityLevel, Assessment, InsightReport, Measurement, ReportSource, RiskLevel,
};

const MAX_FINDINGS: usize = 5;
const MAX_RECOMMENDATIONS: usize = 6;

const GENERAL_RECOMMENDATIONS: [&str; 4] = [
    "Maintain a balanced diet rich in fruits and vegetables",
    "Aim for 7-9 hours of quality sleep each night",
    "Stay physically active - aim for 30 minutes of exercise daily",
    "Stay hydrated throughout the day",
];

const LIFESTYLE_TIPS: [&str; 3] = [
    "Regular exercise improves cardiovascular health",
    "Manage stress through meditation, breathing exercises or yoga",
    "Keep a consistent sleep schedule",
];

const MONITORING_ADVICE: &str =
    "Continue monitoring your vitals regularly and note any sustained changes";

const WHEN_TO_SEEK_HELP: &str = "Contact a healthcare provider if symptoms worsen or if you \
     experience chest pain, severe shortness of breath, or persistent fever";

const ENCOURAGEMENT: &str =
    "Keep up the good work monitoring your health! Regular tracking helps catch issues early.";

#[derive(Debug, Clone, Default)]
pub struct RuleAdvisor {
    bands: VitalBands,
}

#[derive(Default)]
struct Draft {
    findings: Vec<String>,
    recommendations: Vec<String>,
    immediate: Vec<String>,
}

impl Draft {
    fn recommend(&mut self, text: &str) {
        if !self.recommendations.iter().any(|r| r == text) {
            self.recommendations.push(text.to_string());
        }
    }
}

fn range_text(band: &VitalBand) -> String {
    format!("{}-{}", band.normal[0], band.normal[1])
}

impl RuleAdvisor {
    #[must_use]
    pub fn new(bands: VitalBands) -> Self {
        Self { bands }
    }

    #[must_use]
    pub fn report(&self, measurement: &Measurement, assessment: &Assessment) -> InsightReport {
        let mut d = Draft::default();

        self.heart_rate(measurement.heart_rate, &mut d);
        self.blood_oxygen(measurement.blood_oxygen, &mut d);
        self.temperature(measurement.temperature, &mut d);
        self.respiration(measurement.respiration_rate, &mut d);

        if assessment.anomaly.is_anomaly {
            d.findings.push(format!(
                "This reading is unusual compared with typical patterns (anomaly score {:.2})",
                assessment.anomaly.score
            ));
            d.recommend("Re-measure in a few minutes to confirm the unusual reading");
        }

        match assessment.risk.level {
            RiskLevel::High => d
                .immediate
                .push("Schedule an immediate consultation with your healthcare provider".into()),
            RiskLevel::Medium => {
                d.recommend("Schedule a check-up with your healthcare provider within 24-48 hours");
            }
            RiskLevel::Low => d.recommend("Keep up your current healthy habits"),
        }

        match measurement.activity_level {
            ActivityLevel::Low => {
                d.recommend("Increase your activity gradually, starting with short walks");
            }
            ActivityLevel::High if assessment.risk.level >= RiskLevel::Medium => {
                d.recommend("Keep exercise at a moderate intensity until your vitals settle");
            }
            _ => {}
        }

        for rec in GENERAL_RECOMMENDATIONS {
            d.recommend(rec);
        }

        d.findings.truncate(MAX_FINDINGS);
        d.recommendations.truncate(MAX_RECOMMENDATIONS);

        let summary = format!(
            "Your vital signs show {} patterns with {}. Health score {} ({}).",
            assessment.anomaly.status().to_lowercase(),
            assessment.risk.level.to_string().to_lowercase(),
            assessment.health_score,
            assessment.health_score.label()
        );

        InsightReport {
            summary,
            key_findings: d.findings,
            recommendations: d.recommendations,
            immediate_actions: d.immediate,
            lifestyle_tips: LIFESTYLE_TIPS.iter().map(|s| (*s).to_string()).collect(),
            monitoring_advice: MONITORING_ADVICE.to_string(),
            when_to_seek_help: WHEN_TO_SEEK_HELP.to_string(),
            encouragement: ENCOURAGEMENT.to_string(),
            source: ReportSource::RuleBased,
        }
    }

    fn heart_rate(&self, hr: f64, d: &mut Draft) {
        let band = &self.bands.heart_rate;
        match band.position(hr) {
            BandPosition::Below => {
                d.findings.push(format!(
                    "Heart rate is low at {hr} bpm (normal: {})",
                    range_text(band)
                ));
                d.recommend("Consider consulting a healthcare provider about your low heart rate");
            }
            BandPosition::Above => {
                d.findings.push(format!(
                    "Heart rate is elevated at {hr} bpm (normal: {})",
                    range_text(band)
                ));
                d.recommend("Try relaxation techniques like deep breathing");
                d.recommend("Reduce caffeine intake and ensure adequate hydration");
            }
            BandPosition::Within => d.findings.push(format!("Heart rate is normal at {hr} bpm")),
        }
    }

    fn blood_oxygen(&self, spo2: f64, d: &mut Draft) {
        let band = &self.bands.blood_oxygen;
        if band.warning_position(spo2) == BandPosition::Below {
            d.findings.push(format!("Blood oxygen is critically low at {spo2}%"));
            d.immediate
                .push("URGENT: Seek immediate medical attention - oxygen levels critically low".into());
        } else if band.position(spo2) == BandPosition::Below {
            d.findings.push(format!(
                "Blood oxygen is below normal at {spo2}% (normal: {})",
                range_text(band)
            ));
            d.recommend("Ensure good ventilation and avoid strenuous activities");
        } else {
            d.findings.push(format!("Blood oxygen is good at {spo2}%"));
        }
    }

    fn temperature(&self, temp: f64, d: &mut Draft) {
        let band = &self.bands.temperature;
        match (band.warning_position(temp), band.position(temp)) {
            (BandPosition::Above, _) => {
                d.findings.push(format!("Fever detected at {temp}°C"));
                d.immediate
                    .push("Consider taking fever-reducing medication and consult a doctor".into());
            }
            (_, BandPosition::Above) => {
                d.findings.push(format!("Temperature slightly elevated at {temp}°C"));
                d.recommend("Stay hydrated and monitor your temperature");
            }
            (_, BandPosition::Below) => {
                d.findings.push(format!("Body temperature is low at {temp}°C"));
                d.recommend("Warm up and monitor for hypothermia symptoms");
            }
            _ => d.findings.push(format!("Temperature is normal at {temp}°C")),
        }
    }

    fn respiration(&self, rr: f64, d: &mut Draft) {
        let band = &self.bands.respiration_rate;
        match band.position(rr) {
            BandPosition::Within => {}
            BandPosition::Below => d.findings.push(format!(
                "Respiration rate is low at {rr} breaths/min (normal: {})",
                range_text(band)
            )),
            BandPosition::Above => {
                d.findings.push(format!(
                    "Respiration rate is elevated at {rr} breaths/min (normal: {})",
                    range_text(band)
                ));
                d.recommend("Rest and practise slow, controlled breathing");
            }
        }
    }
}
