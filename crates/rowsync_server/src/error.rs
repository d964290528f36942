//! Error types for the sync server.

use rowsync_protocol::{ErrorEnvelope, HttpStep, ProtocolError, SyncStage};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The body does not match the hash header.
    #[error("content hash mismatch")]
    HashMismatch,

    /// A step this server does not serve.
    #[error("unsupported step {0}")]
    UnsupportedStep(HttpStep),

    /// The step needs state from an earlier step of the same session.
    #[error("session {session} has no {missing}")]
    SessionState {
        /// Session cookie value.
        session: String,
        /// What is missing.
        missing: &'static str,
    },

    /// The session table is full.
    #[error("too many sessions (max {0})")]
    TooManySessions(usize),

    /// No serializer for the requested format.
    #[error("unknown serialization format {0}")]
    UnknownSerializer(String),

    /// Header or body error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Orchestration error on the server database.
    #[error(transparent)]
    Sync(#[from] rowsync_engine::SyncError),
}

impl From<rowsync_core::CoreError> for ServerError {
    fn from(e: rowsync_core::CoreError) -> Self {
        Self::Sync(e.into())
    }
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::HashMismatch
                | ServerError::UnsupportedStep(_)
                | ServerError::SessionState { .. }
                | ServerError::UnknownSerializer(_)
                | ServerError::Protocol(_)
        )
    }

    /// HTTP status and reason phrase for the error.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            ServerError::TooManySessions(_) => (503, "Service Unavailable"),
            e if e.is_client_error() => (400, "Bad Request"),
            _ => (500, "Internal Server Error"),
        }
    }

    /// Error kind name sent in the error header and envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "InvalidRequest",
            ServerError::HashMismatch => "HashMismatch",
            ServerError::UnsupportedStep(_) => "UnsupportedStep",
            ServerError::SessionState { .. } => "SessionState",
            ServerError::TooManySessions(_) => "TooManySessions",
            ServerError::UnknownSerializer(_) => "UnknownSerializer",
            ServerError::Protocol(_) => "ProtocolError",
            ServerError::Sync(_) => "SyncError",
        }
    }

    /// Builds the envelope describing this error.
    pub fn to_envelope(&self, stage: SyncStage, source: Option<(String, String)>) -> ErrorEnvelope {
        let envelope = ErrorEnvelope::server(self.type_name(), self.to_string()).with_stage(stage);
        match source {
            Some((data_source, catalog)) => envelope.with_source(data_source, catalog),
            None => envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::SyncSide;

    #[test]
    fn error_classification() {
        assert!(ServerError::HashMismatch.is_client_error());
        assert_eq!(ServerError::HashMismatch.status().0, 400);
        assert_eq!(ServerError::TooManySessions(4).status().0, 503);
        let internal = ServerError::Sync(rowsync_engine::SyncError::Cancelled);
        assert!(!internal.is_client_error());
        assert_eq!(internal.status(), (500, "Internal Server Error"));
    }

    #[test]
    fn envelope_carries_stage_and_source() {
        let envelope = ServerError::HashMismatch.to_envelope(
            SyncStage::ChangesUploading,
            Some(("server.db".into(), "main".into())),
        );
        assert_eq!(envelope.type_name, "HashMismatch");
        assert_eq!(envelope.sync_stage, SyncStage::ChangesUploading);
        assert_eq!(envelope.data_source.as_deref(), Some("server.db"));
        assert_eq!(envelope.side, SyncSide::ServerSide);
    }
}
