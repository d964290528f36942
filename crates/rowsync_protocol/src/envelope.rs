//! Error envelope returned by the server on failed steps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncSide {
    /// The client.
    ClientSide,
    /// The server.
    ServerSide,
}

/// Stage of a sync session, reported in errors and progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncStage {
    /// Not started.
    #[default]
    None,
    /// Loading or creating the scope.
    ScopeLoading,
    /// Creating tracking tables and triggers.
    Provisioning,
    /// Removing tracking infrastructure.
    Deprovisioning,
    /// Selecting local changes.
    ChangesSelecting,
    /// Sending changes.
    ChangesUploading,
    /// Receiving changes.
    ChangesDownloading,
    /// Applying received changes.
    ChangesApplying,
    /// Writing scope timestamps.
    ScopeWriting,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Body of a failed response when the error header is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Error kind name.
    pub type_name: String,
    /// Human-readable message.
    pub message: String,
    /// Data source of the failing side, if known.
    #[serde(default)]
    pub data_source: Option<String>,
    /// Database (catalog) of the failing side, if known.
    #[serde(default)]
    pub initial_catalog: Option<String>,
    /// Stage the failure happened in.
    #[serde(default)]
    pub sync_stage: SyncStage,
    /// Side that failed.
    pub side: SyncSide,
}

impl ErrorEnvelope {
    /// Creates a server-side envelope.
    pub fn server(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            data_source: None,
            initial_catalog: None,
            sync_stage: SyncStage::None,
            side: SyncSide::ServerSide,
        }
    }

    /// Sets the data source and catalog.
    pub fn with_source(mut self, data_source: impl Into<String>, catalog: impl Into<String>) -> Self {
        self.data_source = Some(data_source.into());
        self.initial_catalog = Some(catalog.into());
        self
    }

    /// Sets the stage.
    pub fn with_stage(mut self, stage: SyncStage) -> Self {
        self.sync_stage = stage;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_with_missing_optional_fields() {
        let json = r#"{"type_name":"HashMismatch","message":"bad hash","side":"ServerSide"}"#;
        let envelope: ErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.sync_stage, SyncStage::None);
        assert!(envelope.data_source.is_none());
        assert_eq!(envelope.side, SyncSide::ServerSide);
    }
}
