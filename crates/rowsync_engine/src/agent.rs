//! Sync agent: drives one full client cycle against a remote server.

use crate::error::{SyncError, SyncResult};
use crate::local::{ApplyStats, LocalOrchestrator};
use crate::remote::WebRemoteOrchestrator;
use parking_lot::{Mutex, RwLock};
use rowsync_core::{BatchInfo, ScopeInfo, SyncSetup};
use rowsync_protocol::SyncContext;
use rowsync_provider::ProvisionFlags;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The current state of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Agent is idle, not syncing.
    Idle,
    /// Agent is ensuring scopes and tracking infrastructure.
    Provisioning,
    /// Agent is uploading local changes.
    Uploading,
    /// Agent is downloading server changes.
    Downloading,
    /// Agent is applying server changes locally.
    Applying,
    /// Agent has completed a sync cycle.
    Synced,
    /// Agent encountered an error.
    Error,
}

impl SyncState {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Provisioning
                | SyncState::Uploading
                | SyncState::Downloading
                | SyncState::Applying
        )
    }

    /// Returns true if the agent can start a new cycle.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics accumulated over every cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of cycles completed.
    pub cycles_completed: u64,
    /// Rows uploaded.
    pub rows_uploaded: u64,
    /// Rows downloaded.
    pub rows_downloaded: u64,
    /// Downloaded rows written locally.
    pub rows_applied: u64,
    /// Conflicts seen on either side.
    pub conflicts: u64,
    /// Retried HTTP sends.
    pub retries: u64,
    /// End of the last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    /// Local rows sent to the server.
    pub uploaded: usize,
    /// Uploaded rows the server wrote.
    pub applied_on_server: usize,
    /// Conflicts the server resolved.
    pub server_conflicts: usize,
    /// Server rows received.
    pub downloaded: usize,
    /// Outcome of applying the received rows.
    pub applied: ApplyStats,
    /// Server clock at the end of the exchange.
    pub server_timestamp: i64,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// Runs sync cycles for one scope.
pub struct SyncAgent {
    local: LocalOrchestrator,
    remote: WebRemoteOrchestrator,
    scope_name: String,
    setup: SyncSetup,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    token: Mutex<CancellationToken>,
}

impl SyncAgent {
    /// Creates an agent syncing `setup` under `scope_name`.
    pub fn new(
        local: LocalOrchestrator,
        remote: WebRemoteOrchestrator,
        scope_name: impl Into<String>,
        setup: SyncSetup,
    ) -> Self {
        Self {
            local,
            remote,
            scope_name: scope_name.into(),
            setup,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Local orchestrator.
    pub fn local(&self) -> &LocalOrchestrator {
        &self.local
    }

    /// Remote orchestrator.
    pub fn remote(&self) -> &WebRemoteOrchestrator {
        &self.remote
    }

    /// Scope name.
    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// Cancels the running cycle, if any.
    pub fn cancel(&self) {
        self.token.lock().cancel();
    }

    fn set_state(&self, state: SyncState) {
        tracing::debug!(?state, scope = %self.scope_name, "sync state");
        *self.state.write() = state;
    }

    /// Starts a cycle: claims the state and installs a fresh token.
    fn begin(&self) -> SyncResult<CancellationToken> {
        let mut state = self.state.write();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: "sync".into(),
            });
        }
        *state = SyncState::Provisioning;
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();
        Ok(token)
    }

    /// Performs a full cycle: upload local changes, download and apply
    /// server changes, then advance the scope timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] if a cycle is already
    /// running, [`SyncError::Cancelled`] after [`SyncAgent::cancel`], or the
    /// first failing step's error. The agent is left in
    /// [`SyncState::Error`] on failure and the scope is not advanced.
    pub async fn sync(&self) -> SyncResult<SyncSummary> {
        let token = self.begin()?;
        let start = Instant::now();
        match self.run_cycle(&token, start).await {
            Ok(summary) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.rows_uploaded += summary.uploaded as u64;
                stats.rows_downloaded += summary.downloaded as u64;
                stats.rows_applied += summary.applied.applied as u64;
                stats.conflicts += (summary.server_conflicts + summary.applied.conflicts) as u64;
                stats.retries = self.remote.handler().retries();
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                tracing::info!(
                    scope = %self.scope_name,
                    uploaded = summary.uploaded,
                    downloaded = summary.downloaded,
                    duration_ms = summary.duration.as_millis() as u64,
                    "sync cycle completed"
                );
                Ok(summary)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    async fn run_cycle(
        &self,
        token: &CancellationToken,
        start: Instant,
    ) -> SyncResult<SyncSummary> {
        let mut scope = self.local.ensure_scope(&self.scope_name, &self.setup)?;
        let mut context = SyncContext::new(&self.scope_name, scope.id);
        context.parameters = self.remote.handler().options().scope_parameters.clone();

        let server = self
            .remote
            .ensure_scope(&context, Some(&self.setup), token)
            .await?;
        let schema = match scope.schema.clone() {
            Some(schema) => schema,
            None => {
                self.local.provision(&server.schema, ProvisionFlags::ALL)?;
                scope.schema = Some(server.schema.clone());
                self.local.save_scope(&scope)?;
                server.schema
            }
        };
        let server_id = server.server_scope_id;

        self.set_state(SyncState::Uploading);
        let upload = self
            .local
            .get_changes(&schema, scope.changes_since(), Some(server_id), token)
            .await?;
        let sent = self
            .remote
            .send_changes(&context, &upload, scope.last_server_sync_timestamp, token)
            .await;
        self.cleanup(&upload).await;
        let response = sent?;

        let mut summary = SyncSummary {
            uploaded: upload.rows_count(),
            applied_on_server: response.applied,
            server_conflicts: response.conflicts,
            server_timestamp: response.server_timestamp,
            ..SyncSummary::default()
        };

        self.set_state(SyncState::Downloading);
        let options = self.local.options();
        let download = self
            .remote
            .download_changes(
                &context,
                response,
                &schema,
                &options.batch_directory,
                &options.serializer_key,
                token,
            )
            .await?;
        summary.downloaded = download.rows_count();

        self.set_state(SyncState::Applying);
        let applied = self
            .local
            .apply_changes(&download, server_id, scope.changes_since(), token)
            .await;
        self.cleanup(&download).await;
        summary.applied = applied?;

        summary.duration = start.elapsed();
        self.complete(&mut scope, upload.timestamp, &summary)?;
        Ok(summary)
    }

    fn complete(&self, scope: &mut ScopeInfo, local_timestamp: i64, summary: &SyncSummary) -> SyncResult<()> {
        let duration_ms = i64::try_from(summary.duration.as_millis()).unwrap_or(i64::MAX);
        self.local.complete_scope(
            scope,
            local_timestamp,
            Some(summary.server_timestamp),
            duration_ms,
        )
    }

    async fn cleanup(&self, batch: &BatchInfo) {
        if self.local.options().cleanup_batches {
            batch.try_remove_directory().await;
        }
    }

    fn handle_error(&self, error: &SyncError) {
        tracing::warn!(scope = %self.scope_name, error = %error, "sync cycle failed");
        self.set_state(SyncState::Error);
        let mut stats = self.stats.write();
        stats.retries = self.remote.handler().retries();
        stats.last_error = Some(error.to_string());
    }
}
