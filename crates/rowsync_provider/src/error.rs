//! Error types for providers and builders.

use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised while building or running provider commands.
///
/// None of these are retried: they indicate a schema or capability mismatch
/// that must surface to the orchestrator.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The connection is not open.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The provider has no implementation for a command.
    #[error("missing command: {command}")]
    MissingCommand {
        /// Name of the requested command type.
        command: String,
    },

    /// A numeric command code does not map to any command type.
    #[error("unknown command type code: {0}")]
    UnknownCommandType(u8),

    /// No provider is registered for a dialect.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// A parameter was set that the command does not declare.
    #[error("command {command} has no parameter {parameter}")]
    UnknownParameter {
        /// Command name.
        command: String,
        /// Parameter name.
        parameter: String,
    },

    /// A table does not exist or cannot be synchronized.
    #[error("invalid schema for {table}: {message}")]
    InvalidSchema {
        /// Table name.
        table: String,
        /// What is wrong.
        message: String,
    },

    /// A stored scope row could not be decoded.
    #[error("corrupted scope row {scope}: {message}")]
    CorruptedScope {
        /// Scope name.
        scope: String,
        /// What is wrong.
        message: String,
    },

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Core model error.
    #[error(transparent)]
    Core(#[from] rowsync_core::CoreError),

    /// JSON error while (de)serializing schema or setup blobs.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Creates a [`ProviderError::MissingCommand`] error.
    pub fn missing_command(command: impl std::fmt::Debug) -> Self {
        Self::MissingCommand {
            command: format!("{command:?}"),
        }
    }

    /// Creates a [`ProviderError::InvalidSchema`] error.
    pub fn invalid_schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            table: table.into(),
            message: message.into(),
        }
    }
}
