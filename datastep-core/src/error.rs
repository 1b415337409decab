//! Error types for the data-step core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering schema lookups, data set state, storage and serialization.

/// Top-level error type for the data-step core library.
#[derive(Debug, thiserror::Error)]
pub enum DataStepError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Data set already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Data set not found: {name}")]
    NotFound { name: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delimited text error: {0}")]
    Csv(#[from] csv::Error),
}

impl DataStepError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }
}

/// Errors raised when a field or by-group name does not resolve.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown field '{name}'")]
    UnknownField { name: String },

    #[error("Field index {index} is out of range for a row of width {width}")]
    IndexOutOfRange { index: usize, width: usize },

    #[error("Unknown by-group variable '{name}' in data set '{data_set}'")]
    UnknownByGroupVariable { name: String, data_set: String },

    #[error("Row has {actual} values but the schema declares {expected}")]
    WidthMismatch { expected: usize, actual: usize },
}

/// Errors raised when a data set or interface is used in the wrong state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("'{target}' is not open (attempted {operation})")]
    NotOpen {
        target: String,
        operation: &'static str,
    },

    #[error("'{target}' is already open for {mode}")]
    AlreadyOpen { target: String, mode: String },

    #[error("'{target}' is open for {actual}, but {operation} requires {expected}")]
    WrongMode {
        target: String,
        operation: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Variables of '{target}' cannot change while it is open")]
    SchemaFrozen { target: String },

    #[error("Row offset {offset} of '{target}' is outside the window (lag {lag_rows}, lead {lead_rows})")]
    OutsideWindow {
        target: String,
        offset: isize,
        lag_rows: usize,
        lead_rows: usize,
    },

    #[error("Metadata for '{target}' must be written before any row")]
    MetadataNotWritten { target: String },

    #[error("Metadata for '{target}' was already written")]
    MetadataAlreadyWritten { target: String },
}

/// A type alias for results using the top-level `DataStepError`.
pub type Result<T> = std::result::Result<T, DataStepError>;
