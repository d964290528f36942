//! CLI command implementations.

pub mod changes;
pub mod deprovision;
pub mod inspect;
pub mod provision;
pub mod sync;

use rowsync_engine::{LocalOrchestrator, SyncOptions};
use rowsync_provider::sqlite::{SqliteConnection, SqliteSyncProvider};
use std::path::Path;
use std::sync::Arc;

/// Scope selection shared by every command.
pub struct Target {
    /// Scope name.
    pub scope: String,
    /// Scope-info table name.
    pub scope_table: String,
}

/// Opens an orchestrator over a SQLite file.
pub fn open_local(
    db: &Path,
    target: &Target,
    options: SyncOptions,
) -> Result<LocalOrchestrator, Box<dyn std::error::Error>> {
    let connection = SqliteConnection::open(db)?;
    Ok(LocalOrchestrator::new(
        Arc::new(SqliteSyncProvider::new()),
        Box::new(connection),
        options.with_scope_info_table(&target.scope_table),
    ))
}

/// Builds a multi-threaded runtime for async commands.
pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}
