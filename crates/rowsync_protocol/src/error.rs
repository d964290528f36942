//! Protocol-level errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while reading or writing protocol headers and bodies.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A step code outside the known range.
    #[error("unknown sync step code: {0}")]
    UnknownStep(u8),

    /// A header is present but malformed.
    #[error("invalid header {name}: {value}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// Raw value.
        value: String,
    },

    /// A required header is absent.
    #[error("missing header {0}")]
    MissingHeader(String),

    /// Body (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a [`ProtocolError::InvalidHeader`] error.
    pub fn invalid_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            value: value.into(),
        }
    }
}
