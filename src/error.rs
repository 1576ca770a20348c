use std::fmt;
use std::path::PathBuf;

/// A record or dataset that does not fit the declared feature schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    EmptyDataset,
    MissingField {
        field: &'static str,
    },
    Malformed {
        field: &'static str,
        reason: String,
    },
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: Option<f64>,
    },
    UnknownCategory {
        field: &'static str,
        value: String,
        allowed: Vec<String>,
    },
    /// Row-level context added while loading a dataset.
    Row {
        row: usize,
        source: Box<SchemaError>,
    },
}

impl SchemaError {
    pub fn at_row(self, row: usize) -> Self {
        SchemaError::Row {
            row,
            source: Box::new(self),
        }
    }

    /// Name of the offending field, looking through row context.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            SchemaError::EmptyDataset => None,
            SchemaError::MissingField { field }
            | SchemaError::Malformed { field, .. }
            | SchemaError::OutOfRange { field, .. }
            | SchemaError::UnknownCategory { field, .. } => Some(field),
            SchemaError::Row { source, .. } => source.field(),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::EmptyDataset => write!(f, "dataset contains no examples"),
            SchemaError::MissingField { field } => write!(f, "missing required field `{field}`"),
            SchemaError::Malformed { field, reason } => {
                write!(f, "field `{field}` is malformed: {reason}")
            }
            SchemaError::OutOfRange {
                field,
                value,
                min,
                max: Some(max),
            } => write!(f, "field `{field}` = {value} is outside [{min}, {max}]"),
            SchemaError::OutOfRange {
                field,
                value,
                min,
                max: None,
            } => write!(f, "field `{field}` = {value} must be >= {min}"),
            SchemaError::UnknownCategory {
                field,
                value,
                allowed,
            } => write!(
                f,
                "field `{field}` has value `{value}`, expected one of {}",
                allowed.join(", ")
            ),
            SchemaError::Row { row, source } => write!(f, "row {row}: {source}"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Every failure the training and serving paths report to their caller.
#[derive(Debug)]
pub enum ModelError {
    Schema(SchemaError),
    InvalidConfig(String),
    Estimator(String),
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },
    ArtifactNotFound {
        path: PathBuf,
    },
    ArtifactCorrupt {
        path: PathBuf,
        reason: String,
    },
}

impl ModelError {
    /// Stable identifier used in serving responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelError::Schema(_) => "schema_error",
            ModelError::InvalidConfig(_) => "invalid_config",
            ModelError::Estimator(_) => "estimator_error",
            ModelError::Persistence { .. } => "persistence_error",
            ModelError::ArtifactNotFound { .. } => "artifact_not_found",
            ModelError::ArtifactCorrupt { .. } => "artifact_corrupt",
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelError::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ModelError::ArtifactCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Schema(e) => write!(f, "schema error: {e}"),
            ModelError::InvalidConfig(msg) => write!(f, "invalid training config: {msg}"),
            ModelError::Estimator(msg) => write!(f, "estimator failed: {msg}"),
            ModelError::Persistence { path, source } => {
                write!(f, "cannot persist model at {}: {source}", path.display())
            }
            ModelError::ArtifactNotFound { path } => {
                write!(f, "no model artifact at {}", path.display())
            }
            ModelError::ArtifactCorrupt { path, reason } => {
                write!(f, "model artifact at {} is unusable: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Schema(e) => Some(e),
            ModelError::Persistence { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<SchemaError> for ModelError {
    fn from(e: SchemaError) -> Self {
        ModelError::Schema(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_context_keeps_field_name() {
        let err = SchemaError::MissingField {
            field: "past_scores",
        }
        .at_row(3);
        assert_eq!(err.field(), Some("past_scores"));
        assert_eq!(err.to_string(), "row 3: missing required field `past_scores`");
    }

    #[test]
    fn kinds_are_stable() {
        let schema: ModelError = SchemaError::EmptyDataset.into();
        assert_eq!(schema.kind(), "schema_error");
        assert_eq!(
            ModelError::ArtifactNotFound {
                path: PathBuf::from("x")
            }
            .kind(),
            "artifact_not_found"
        );
        assert_eq!(ModelError::corrupt("x", "bad").kind(), "artifact_corrupt");
        assert_eq!(
            ModelError::Estimator("no rows".to_string()).kind(),
            "estimator_error"
        );
    }
}
