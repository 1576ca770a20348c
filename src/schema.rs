//! The fixed student feature schema and the parsing/validation built on it.
//!
//! Field order here is the column order of the transformed feature matrix:
//! numeric features first, then the one-hot blocks of the categoricals.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::models::{FeatureRecord, RawValue, TrainingExample};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct NumericField {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub min: f64,
    pub max: Option<f64>,
    pub whole: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CategoricalField {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub vocabulary: &'static [&'static str],
}

pub static NUMERIC_FIELDS: [NumericField; 6] = [
    NumericField {
        name: "study_time",
        aliases: &[],
        min: 0.0,
        max: None,
        whole: false,
    },
    NumericField {
        name: "absences",
        aliases: &["num_absences"],
        min: 0.0,
        max: None,
        whole: true,
    },
    NumericField {
        name: "past_scores",
        aliases: &[],
        min: 0.0,
        max: Some(100.0),
        whole: false,
    },
    NumericField {
        name: "online_courses_completed",
        aliases: &["online_courses"],
        min: 0.0,
        max: None,
        whole: true,
    },
    NumericField {
        name: "assignment_completion_rate",
        aliases: &["assignment_completion"],
        min: 0.0,
        max: Some(100.0),
        whole: false,
    },
    NumericField {
        name: "social_media_hours",
        aliases: &["time_spent_on_social_media"],
        min: 0.0,
        max: None,
        whole: false,
    },
];

pub static CATEGORICAL_FIELDS: [CategoricalField; 3] = [
    CategoricalField {
        name: "gender",
        aliases: &[],
        vocabulary: &["Male", "Female"],
    },
    CategoricalField {
        name: "school_type",
        aliases: &[],
        vocabulary: &["Public", "Private"],
    },
    CategoricalField {
        name: "self_reported_stress_level",
        aliases: &["stress_level"],
        vocabulary: &["Low", "Medium", "High"],
    },
];

pub const TARGET_FIELD: NumericField = NumericField {
    name: "final_score",
    aliases: &[],
    min: 0.0,
    max: Some(100.0),
    whole: false,
};

/// Serializable snapshot of the schema, embedded in every trained pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub numeric: Vec<String>,
    pub categorical: Vec<CategoricalSpec>,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalSpec {
    pub name: String,
    pub vocabulary: Vec<String>,
}

impl FeatureSchema {
    pub fn student() -> Self {
        Self {
            version: SCHEMA_VERSION,
            numeric: NUMERIC_FIELDS.iter().map(|f| f.name.to_string()).collect(),
            categorical: CATEGORICAL_FIELDS
                .iter()
                .map(|f| CategoricalSpec {
                    name: f.name.to_string(),
                    vocabulary: f.vocabulary.iter().map(|v| v.to_string()).collect(),
                })
                .collect(),
            target: TARGET_FIELD.name.to_string(),
        }
    }
}

/// Key/value view over one input row, matched case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct Fields {
    values: HashMap<String, RawValue>,
}

impl Fields {
    pub fn insert(&mut self, key: &str, value: RawValue) {
        self.values.insert(key.trim().to_ascii_lowercase(), value);
    }

    /// Builds a view from a JSON object; nulls count as absent.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SchemaError> {
        let object = value.as_object().ok_or_else(|| SchemaError::Malformed {
            field: "record",
            reason: "expected a JSON object of field/value pairs".to_string(),
        })?;
        let mut fields = Fields::default();
        for (key, value) in object {
            if !value.is_null() {
                fields.insert(key, RawValue::from(value));
            }
        }
        Ok(fields)
    }

    pub fn from_csv(headers: &csv::StringRecord, row: &csv::StringRecord) -> Self {
        let mut fields = Fields::default();
        for (key, cell) in headers.iter().zip(row.iter()) {
            if !cell.trim().is_empty() {
                fields.insert(key, RawValue::Text(cell.trim().to_string()));
            }
        }
        fields
    }

    fn lookup(&self, name: &str, aliases: &[&str]) -> Option<&RawValue> {
        std::iter::once(name)
            .chain(aliases.iter().copied())
            .find_map(|key| self.values.get(key))
    }
}

fn parse_number(field: &NumericField, raw: &RawValue) -> Result<f64, SchemaError> {
    let value = match raw {
        RawValue::Number(n) => *n,
        RawValue::Text(text) => text.parse::<f64>().map_err(|_| SchemaError::Malformed {
            field: field.name,
            reason: format!("`{text}` is not a number"),
        })?,
    };
    check_number(field, value)?;
    Ok(value)
}

fn check_number(field: &NumericField, value: f64) -> Result<(), SchemaError> {
    if !value.is_finite() {
        return Err(SchemaError::Malformed {
            field: field.name,
            reason: "value must be finite".to_string(),
        });
    }
    if field.whole && value.fract() != 0.0 {
        return Err(SchemaError::Malformed {
            field: field.name,
            reason: format!("{value} is not a whole count"),
        });
    }
    let above_max = field.max.is_some_and(|max| value > max);
    if value < field.min || above_max {
        return Err(SchemaError::OutOfRange {
            field: field.name,
            value,
            min: field.min,
            max: field.max,
        });
    }
    Ok(())
}

fn parse_count(field: &NumericField, raw: &RawValue) -> Result<u32, SchemaError> {
    let value = parse_number(field, raw)?;
    if value > f64::from(u32::MAX) {
        return Err(SchemaError::OutOfRange {
            field: field.name,
            value,
            min: field.min,
            max: Some(f64::from(u32::MAX)),
        });
    }
    Ok(value as u32)
}

fn parse_category(field: &CategoricalField, raw: &RawValue) -> Result<String, SchemaError> {
    match raw {
        RawValue::Text(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        RawValue::Text(_) => Err(SchemaError::MissingField { field: field.name }),
        RawValue::Number(n) => Err(SchemaError::Malformed {
            field: field.name,
            reason: format!("expected a category label, got {n}"),
        }),
    }
}

fn numeric(fields: &Fields, index: usize) -> Result<&RawValue, SchemaError> {
    let field = &NUMERIC_FIELDS[index];
    fields
        .lookup(field.name, field.aliases)
        .ok_or(SchemaError::MissingField { field: field.name })
}

fn categorical(fields: &Fields, index: usize) -> Result<String, SchemaError> {
    let field = &CATEGORICAL_FIELDS[index];
    let raw = fields
        .lookup(field.name, field.aliases)
        .ok_or(SchemaError::MissingField { field: field.name })?;
    parse_category(field, raw)
}

/// Parses a record without enforcing categorical vocabularies, so unseen
/// labels can reach the prediction-time fallback.
pub fn parse_record(fields: &Fields) -> Result<FeatureRecord, SchemaError> {
    Ok(FeatureRecord {
        study_time: parse_number(&NUMERIC_FIELDS[0], numeric(fields, 0)?)?,
        absences: parse_count(&NUMERIC_FIELDS[1], numeric(fields, 1)?)?,
        past_scores: parse_number(&NUMERIC_FIELDS[2], numeric(fields, 2)?)?,
        online_courses_completed: parse_count(&NUMERIC_FIELDS[3], numeric(fields, 3)?)?,
        assignment_completion_rate: parse_number(&NUMERIC_FIELDS[4], numeric(fields, 4)?)?,
        social_media_hours: parse_number(&NUMERIC_FIELDS[5], numeric(fields, 5)?)?,
        gender: categorical(fields, 0)?,
        school_type: categorical(fields, 1)?,
        self_reported_stress_level: categorical(fields, 2)?,
    })
}

pub fn parse_example(fields: &Fields) -> Result<TrainingExample, SchemaError> {
    let record = parse_record(fields)?;
    let raw = fields
        .lookup(TARGET_FIELD.name, TARGET_FIELD.aliases)
        .ok_or(SchemaError::MissingField {
            field: TARGET_FIELD.name,
        })?;
    let final_score = parse_number(&TARGET_FIELD, raw)?;
    let example = TrainingExample {
        record,
        final_score,
    };
    validate_example(&example)?;
    Ok(example)
}

/// Range checks for a record built in code rather than parsed.
pub fn validate_record(record: &FeatureRecord) -> Result<(), SchemaError> {
    for (field, value) in NUMERIC_FIELDS.iter().zip(record.numeric_values()) {
        check_number(field, value)?;
    }
    for (field, value) in CATEGORICAL_FIELDS.iter().zip(record.categorical_values()) {
        if value.trim().is_empty() {
            return Err(SchemaError::MissingField { field: field.name });
        }
    }
    Ok(())
}

/// Training-time validation: ranges, target, and closed vocabularies.
pub fn validate_example(example: &TrainingExample) -> Result<(), SchemaError> {
    validate_record(&example.record)?;
    check_number(&TARGET_FIELD, example.final_score)?;
    for (field, value) in CATEGORICAL_FIELDS
        .iter()
        .zip(example.record.categorical_values())
    {
        if !field.vocabulary.iter().any(|allowed| *allowed == value) {
            return Err(SchemaError::UnknownCategory {
                field: field.name,
                value: value.to_string(),
                allowed: field.vocabulary.iter().map(|v| v.to_string()).collect(),
            });
        }
    }
    Ok(())
}
