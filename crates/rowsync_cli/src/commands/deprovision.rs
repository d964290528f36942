//! Deprovision command implementation.

use super::{open_local, Target};
use rowsync_engine::SyncOptions;
use rowsync_provider::ProvisionFlags;
use std::path::Path;

/// Runs the deprovision command. Base tables are kept.
pub fn run(db: &Path, target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    let local = open_local(db, target, SyncOptions::default())?;
    local.deprovision_scope(&target.scope, ProvisionFlags::TRACKING)?;
    println!("Deprovisioned scope '{}'", target.scope);
    Ok(())
}
