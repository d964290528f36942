//! Sync command implementation.

use super::{open_local, runtime, Target};
use rowsync_core::SyncSetup;
use rowsync_engine::{
    HttpOptions, HttpTransport, ReqwestTransport, SyncAgent, SyncOptions, WebRemoteOrchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs one sync cycle of the scope against the server at `url`.
pub fn run(
    db: &Path,
    target: &Target,
    url: &str,
    tables: &[String],
    batches: Option<PathBuf>,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = match batches {
        Some(dir) => SyncOptions::new(dir),
        None => SyncOptions::default(),
    }
    .with_batch_size(batch_size);
    let local = open_local(db, target, options)?;

    let http = HttpOptions::new(url);
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(http.timeout)?);
    let remote = WebRemoteOrchestrator::new(http, transport).with_batch_size(batch_size);

    let setup = SyncSetup::new(tables.iter().map(String::as_str));
    let agent = SyncAgent::new(local, remote, &target.scope, setup);
    let summary = runtime()?.block_on(agent.sync())?;

    println!("Sync of scope '{}' completed in {:?}", target.scope, summary.duration);
    println!(
        "  Uploaded:   {} rows ({} applied on server, {} conflicts)",
        summary.uploaded, summary.applied_on_server, summary.server_conflicts
    );
    println!(
        "  Downloaded: {} rows ({} applied, {} conflicts, {} kept local)",
        summary.downloaded,
        summary.applied.applied,
        summary.applied.conflicts,
        summary.applied.skipped
    );
    Ok(())
}
