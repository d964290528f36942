//! Error types for RowSync core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the data model, batch model and serializers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error while reading or writing batch files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Batch index no longer fits in the four-digit file name slot.
    #[error("batch index {index} overflows the 4-digit file name slot")]
    BatchIndexOverflow {
        /// The offending index.
        index: usize,
    },

    /// A table is not part of the schema carried by the batch.
    #[error("table not found in schema: {name}")]
    TableNotFound {
        /// Qualified table name.
        name: String,
    },

    /// Row width does not match the table's column count.
    #[error("row for {table} has {actual} values, expected {expected}")]
    RowWidthMismatch {
        /// Table name.
        table: String,
        /// Column count of the table.
        expected: usize,
        /// Number of values in the row.
        actual: usize,
    },

    /// A table name could not be parsed.
    #[error("invalid table name: {0}")]
    InvalidName(String),

    /// No serializer is registered under the requested key.
    #[error("unknown serializer: {0}")]
    UnknownSerializer(String),

    /// A serializer was used out of order (e.g. write before open).
    #[error("invalid serializer state: {0}")]
    SerializerState(String),

    /// Batch part file content does not match the expected layout.
    #[error("invalid batch file {path}: {message}")]
    InvalidBatchFile {
        /// File path.
        path: String,
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an [`CoreError::InvalidBatchFile`] error.
    pub fn invalid_batch_file(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidBatchFile {
            path: path.into(),
            message: message.into(),
        }
    }
}
