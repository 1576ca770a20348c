use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub study_time: f64,
    pub absences: u32,
    pub past_scores: f64,
    pub online_courses_completed: u32,
    pub assignment_completion_rate: f64,
    pub social_media_hours: f64,
    pub self_reported_stress_level: String,
    pub gender: String,
    pub school_type: String,
}

impl FeatureRecord {
    /// Numeric features in schema order.
    pub fn numeric_values(&self) -> [f64; 6] {
        [
            self.study_time,
            f64::from(self.absences),
            self.past_scores,
            f64::from(self.online_courses_completed),
            self.assignment_completion_rate,
            self.social_media_hours,
        ]
    }

    /// Categorical features in schema order.
    pub fn categorical_values(&self) -> [&str; 3] {
        [
            self.gender.as_str(),
            self.school_type.as_str(),
            self.self_reported_stress_level.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub record: FeatureRecord,
    pub final_score: f64,
}

/// A field value as it arrives from a CSV cell or a JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl From<&serde_json::Value> for RawValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map_or_else(
                || RawValue::Text(n.to_string()),
                RawValue::Number,
            ),
            serde_json::Value::String(s) => RawValue::Text(s.clone()),
            other => RawValue::Text(other.to_string()),
        }
    }
}

/// Gauge bands used by the dashboard when rendering a predicted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    AtRisk,
    OnTrack,
    Strong,
}

impl ScoreBand {
    pub fn for_score(score: f64) -> Self {
        if score < 50.0 {
            ScoreBand::AtRisk
        } else if score < 75.0 {
            ScoreBand::OnTrack
        } else {
            ScoreBand::Strong
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScoreBand::AtRisk => "at risk",
            ScoreBand::OnTrack => "on track",
            ScoreBand::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_score: f64,
    pub band: ScoreBand,
}

impl PredictionResponse {
    pub fn new(predicted_score: f64) -> Self {
        Self {
            predicted_score,
            band: ScoreBand::for_score(predicted_score),
        }
    }
}
