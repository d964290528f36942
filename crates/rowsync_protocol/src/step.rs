//! Steps of the multi-request sync conversation.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a sync conversation, sent as a numeric header.
///
/// A session advances through the steps in code order; the "in progress"
/// variants repeat for every batch part but the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpStep {
    /// No step.
    None,
    /// Ask the server for its schema.
    EnsureSchema,
    /// Create or load the scope on the server.
    EnsureScopes,
    /// Last uploaded part; the response carries the first download part.
    SendChanges,
    /// A non-final uploaded part.
    SendChangesInProgress,
    /// Download-only: select server changes.
    GetChanges,
    /// Download-only: a non-final download part.
    GetChangesInProgress,
    /// Count server changes without selecting them.
    GetEstimatedChangesCount,
    /// Fetch the next download part.
    GetMoreChanges,
    /// Fetch a snapshot.
    GetSnapshot,
    /// Fetch a session summary.
    GetSummary,
    /// Acknowledge the end of a download; the server may drop the batch.
    SendEndDownloadChanges,
}

impl HttpStep {
    /// Every step, in code order.
    pub const ALL: [HttpStep; 12] = [
        HttpStep::None,
        HttpStep::EnsureSchema,
        HttpStep::EnsureScopes,
        HttpStep::SendChanges,
        HttpStep::SendChangesInProgress,
        HttpStep::GetChanges,
        HttpStep::GetChangesInProgress,
        HttpStep::GetEstimatedChangesCount,
        HttpStep::GetMoreChanges,
        HttpStep::GetSnapshot,
        HttpStep::GetSummary,
        HttpStep::SendEndDownloadChanges,
    ];

    /// Numeric code sent in the step header.
    pub fn to_code(self) -> u8 {
        match self {
            HttpStep::None => 0,
            HttpStep::EnsureSchema => 1,
            HttpStep::EnsureScopes => 2,
            HttpStep::SendChanges => 3,
            HttpStep::SendChangesInProgress => 4,
            HttpStep::GetChanges => 5,
            HttpStep::GetChangesInProgress => 6,
            HttpStep::GetEstimatedChangesCount => 7,
            HttpStep::GetMoreChanges => 8,
            HttpStep::GetSnapshot => 9,
            HttpStep::GetSummary => 10,
            HttpStep::SendEndDownloadChanges => 11,
        }
    }

    /// Converts from a numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownStep`] for unknown codes.
    pub fn from_code(code: u8) -> ProtocolResult<Self> {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .ok_or(ProtocolError::UnknownStep(code))
    }

    /// Parses the step header value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHeader`] if the value is not a number,
    /// or [`ProtocolError::UnknownStep`].
    pub fn from_header(value: &str) -> ProtocolResult<Self> {
        let code: u8 = value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::invalid_header(crate::headers::SYNC_STEP, value))?;
        Self::from_code(code)
    }
}

impl fmt::Display for HttpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
