//! Error types for the sync engine.

use rowsync_protocol::{ErrorEnvelope, SyncSide, SyncStage};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error, or a failed response without an error
    /// envelope.
    #[error("transport error: {message}")]
    Transport {
        /// Error message, the raw body or the reason phrase.
        message: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// HTTP reason phrase, when a response was received.
        reason: Option<String>,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A successful response carried no content.
    #[error("empty response (status {status})")]
    EmptyResponse {
        /// HTTP status.
        status: u16,
    },

    /// The remote side failed and described the failure in an envelope.
    #[error("{side:?} error {type_name} during {stage}: {message}")]
    Protocol {
        /// Error message.
        message: String,
        /// HTTP status.
        status: u16,
        /// HTTP reason phrase.
        reason: String,
        /// Remote error kind.
        type_name: String,
        /// Remote data source.
        data_source: Option<String>,
        /// Remote database.
        catalog: Option<String>,
        /// Stage the remote side was in.
        stage: SyncStage,
        /// Side that failed.
        side: SyncSide,
    },

    /// The service URI or a scope parameter cannot form a valid URL.
    #[error("invalid service uri {uri}: {message}")]
    InvalidUri {
        /// URI as configured.
        uri: String,
        /// Parse error.
        message: String,
    },

    /// The remote side answered out of order.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A scope the operation needs is not provisioned.
    #[error("scope {0} is not provisioned")]
    ScopeNotProvisioned(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Provider error.
    #[error(transparent)]
    Provider(#[from] rowsync_provider::ProviderError),

    /// Model, batch or serializer error.
    #[error(transparent)]
    Core(#[from] rowsync_core::CoreError),

    /// Header or body error.
    #[error(transparent)]
    Wire(#[from] rowsync_protocol::ProtocolError),
}

impl SyncError {
    /// Creates a retryable transport error with no response.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            reason: None,
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error with no response.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            reason: None,
            retryable: false,
        }
    }

    /// Creates a transport error for a failed response. Server-side
    /// failures, timeouts and throttling are retryable.
    pub fn from_status(status: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
            reason: Some(reason.into()),
            retryable: status >= 500 || status == 408 || status == 429,
        }
    }

    /// Creates a protocol error from a decoded envelope.
    pub fn from_envelope(status: u16, reason: impl Into<String>, envelope: ErrorEnvelope) -> Self {
        Self::Protocol {
            message: envelope.message,
            status,
            reason: reason.into(),
            type_name: envelope.type_name,
            data_source: envelope.data_source,
            catalog: envelope.initial_catalog,
            stage: envelope.sync_stage,
            side: envelope.side,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Transport { status, .. } => *status,
            SyncError::EmptyResponse { status } | SyncError::Protocol { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Short kind name, used as the `type_name` of outgoing envelopes.
    pub fn type_name(&self) -> &str {
        match self {
            SyncError::Transport { .. } => "TransportError",
            SyncError::EmptyResponse { .. } => "EmptyResponseError",
            SyncError::Protocol { type_name, .. } => type_name,
            SyncError::InvalidUri { .. } => "InvalidUriError",
            SyncError::UnexpectedResponse(_) => "UnexpectedResponseError",
            SyncError::ScopeNotProvisioned(_) => "ScopeNotProvisionedError",
            SyncError::Cancelled => "OperationCanceledError",
            SyncError::InvalidStateTransition { .. } => "InvalidStateTransitionError",
            SyncError::Provider(_) => "ProviderError",
            SyncError::Core(_) => "CoreError",
            SyncError::Wire(_) => "ProtocolError",
        }
    }
}
