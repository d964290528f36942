//! Server configuration.

use rowsync_engine::{ConflictResolution, SyncOptions, DEFAULT_BATCH_SIZE};
use rowsync_provider::DEFAULT_SCOPE_INFO_TABLE;
use std::path::PathBuf;
use std::time::Duration;

/// How long a session may sit idle before it is dropped.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root directory of server-side batches.
    pub batch_directory: PathBuf,
    /// Maximum rows per download part; 0 means unbounded. A client's
    /// requested size wins when it is smaller.
    pub batch_size: usize,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// Idle time after which a session and its batches are dropped.
    pub session_ttl: Duration,
    /// Name of the scope-info table.
    pub scope_info_table: String,
    /// How uploaded rows colliding with server changes are resolved.
    pub conflict_resolution: ConflictResolution,
}

impl ServerConfig {
    /// Creates a configuration writing batches under `batch_directory`.
    pub fn new(batch_directory: impl Into<PathBuf>) -> Self {
        Self {
            batch_directory: batch_directory.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_sessions: 1000,
            session_ttl: DEFAULT_SESSION_TTL,
            scope_info_table: DEFAULT_SCOPE_INFO_TABLE.to_string(),
            conflict_resolution: ConflictResolution::default(),
        }
    }

    /// Sets the maximum download part size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the maximum concurrent sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Sets the session idle timeout.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the scope-info table name.
    pub fn with_scope_info_table(mut self, table: impl Into<String>) -> Self {
        self.scope_info_table = table.into();
        self
    }

    /// Sets the conflict resolution.
    pub fn with_conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    /// Local orchestrator options for the server database. Batches are
    /// removed by the session, never by the orchestrator.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::new(&self.batch_directory)
            .with_batch_size(self.batch_size)
            .with_scope_info_table(&self.scope_info_table)
            .with_conflict_resolution(self.conflict_resolution)
            .with_cleanup_batches(false)
    }

    /// Part size for one request: the smaller non-zero of the configured and
    /// the requested size.
    pub fn effective_batch_size(&self, requested: usize) -> usize {
        match (self.batch_size, requested) {
            (0, r) => r,
            (c, 0) => c,
            (c, r) => c.min(r),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("rowsync-server"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_sessions, 1000);
        assert_eq!(config.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.conflict_resolution, ConflictResolution::LastWriterWins);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("/tmp/batches")
            .with_batch_size(50)
            .with_max_sessions(2)
            .with_session_ttl(Duration::from_secs(5))
            .with_scope_info_table("server_scopes")
            .with_conflict_resolution(ConflictResolution::LocalWins);

        let options = config.sync_options();
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.scope_info_table, "server_scopes");
        assert_eq!(options.conflict_resolution, ConflictResolution::LocalWins);
        assert!(!options.cleanup_batches);
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.session_ttl, Duration::from_secs(5));
    }

    #[test]
    fn smaller_batch_size_wins() {
        let config = ServerConfig::default().with_batch_size(100);
        assert_eq!(config.effective_batch_size(0), 100);
        assert_eq!(config.effective_batch_size(10), 10);
        assert_eq!(config.effective_batch_size(500), 100);
        assert_eq!(ServerConfig::default().with_batch_size(0).effective_batch_size(7), 7);
    }
}
