//! Error types for the record model

use thiserror::Error;

/// Which record shape failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    Node,
    Edge,
    Batch,
}

impl std::fmt::Display for RecordShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordShape::Node => write!(f, "node"),
            RecordShape::Edge => write!(f, "edge"),
            RecordShape::Batch => write!(f, "batch"),
        }
    }
}

/// A malformed record, naming the offending field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {shape} record: field `{field}` {reason}")]
pub struct ValidationError {
    pub shape: RecordShape,
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    /// A required field that is absent or blank
    pub fn missing(shape: RecordShape, field: impl Into<String>) -> Self {
        Self {
            shape,
            field: field.into(),
            reason: "is missing or blank".into(),
        }
    }

    /// A field that is present but has an unusable value
    pub fn invalid(shape: RecordShape, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            shape,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid record at line {line}: {source}")]
    InvalidRecord {
        line: usize,
        source: ValidationError,
    },

    #[error("Malformed batch input at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
