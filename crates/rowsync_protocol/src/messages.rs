//! Request and response bodies, one pair per step.

use crate::envelope::SyncStage;
use rowsync_core::{SyncSet, SyncSetup, SyncTable};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A filter parameter of the scope, sent on the query string and echoed in
/// the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

impl ScopeParameter {
    /// Creates a parameter.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Identity of a session, carried by every request and response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncContext {
    /// Session id; stable for one sync cycle.
    pub session_id: Uuid,
    /// Scope name.
    pub scope_name: String,
    /// Scope id of the client; stamped on rows the server applies.
    pub client_scope_id: Uuid,
    /// Scope filter parameters.
    #[serde(default)]
    pub parameters: Vec<ScopeParameter>,
    /// Stage the sender is in.
    #[serde(default)]
    pub stage: SyncStage,
}

impl SyncContext {
    /// Creates a context for a new session.
    pub fn new(scope_name: impl Into<String>, client_scope_id: Uuid) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            scope_name: scope_name.into(),
            client_scope_id,
            parameters: Vec::new(),
            stage: SyncStage::None,
        }
    }

    /// Returns a copy at another stage.
    pub fn at_stage(&self, stage: SyncStage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }
}

/// One batch part inlined in a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesPart {
    /// Zero-based part index.
    pub index: usize,
    /// Whether this is the last part.
    pub is_last: bool,
    /// Tables with their rows.
    pub tables: Vec<SyncTable>,
}

impl ChangesPart {
    /// An empty last part.
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            is_last: true,
            tables: Vec::new(),
        }
    }

    /// Rows across tables.
    pub fn rows_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Size of a batch held by the server for download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of parts.
    pub parts_count: usize,
    /// Total rows.
    pub rows_count: usize,
}

/// `EnsureSchema` / `EnsureScopes` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopeRequest {
    /// Session.
    pub context: SyncContext,
    /// Tables the client wants to synchronize.
    #[serde(default)]
    pub setup: Option<SyncSetup>,
}

/// `EnsureSchema` / `EnsureScopes` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopeResponse {
    /// Session.
    pub context: SyncContext,
    /// Scope id of the server; the client stamps it on rows it applies.
    pub server_scope_id: Uuid,
    /// Server schema for the scope.
    pub schema: SyncSet,
    /// Setup the server agreed to.
    pub setup: SyncSetup,
}

/// `SendChanges` / `SendChangesInProgress` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChangesRequest {
    /// Session.
    pub context: SyncContext,
    /// Last server timestamp the client has seen; `None` on first sync.
    pub last_server_sync_timestamp: Option<i64>,
    /// The uploaded part.
    pub part: ChangesPart,
}

/// `GetChanges` / `GetEstimatedChangesCount` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetChangesRequest {
    /// Session.
    pub context: SyncContext,
    /// Last server timestamp the client has seen; `None` on first sync.
    pub last_server_sync_timestamp: Option<i64>,
}

/// Response to the upload and download-start steps.
///
/// In-progress uploads get an acknowledgement with no batch; the final
/// upload and `GetChanges` carry the server batch summary and its first part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Session.
    pub context: SyncContext,
    /// Server clock at selection time; 0 for acknowledgements.
    pub server_timestamp: i64,
    /// Rows applied on the server.
    pub applied: usize,
    /// Conflicts resolved on the server.
    pub conflicts: usize,
    /// Server batch, when a download starts.
    #[serde(default)]
    pub batch: Option<BatchSummary>,
    /// First download part.
    #[serde(default)]
    pub part: Option<ChangesPart>,
}

impl ChangesResponse {
    /// An acknowledgement of an in-progress upload.
    pub fn ack(context: SyncContext) -> Self {
        Self {
            context,
            server_timestamp: 0,
            applied: 0,
            conflicts: 0,
            batch: None,
            part: None,
        }
    }
}

/// `GetEstimatedChangesCount` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatedChangesResponse {
    /// Session.
    pub context: SyncContext,
    /// Server clock at count time.
    pub server_timestamp: i64,
    /// Rows the client would download.
    pub count: usize,
}

/// `GetMoreChanges` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMoreChangesRequest {
    /// Session.
    pub context: SyncContext,
    /// Part index to fetch.
    pub index: usize,
}

/// `GetMoreChanges` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMoreChangesResponse {
    /// Session.
    pub context: SyncContext,
    /// The requested part.
    pub part: ChangesPart,
}

/// `SendEndDownloadChanges` request and response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndDownloadMessage {
    /// Session.
    pub context: SyncContext,
}
