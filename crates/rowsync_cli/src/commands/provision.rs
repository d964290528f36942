//! Provision command implementation.

use super::{open_local, Target};
use rowsync_core::SyncSetup;
use rowsync_engine::SyncOptions;
use rowsync_provider::ProvisionFlags;
use std::path::Path;

/// Runs the provision command.
pub fn run(db: &Path, target: &Target, tables: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let local = open_local(db, target, SyncOptions::default())?;
    let setup = SyncSetup::new(tables.iter().map(String::as_str));

    let schema = local.get_schema(&setup)?;
    local.provision(&schema, ProvisionFlags::TRACKING)?;

    let mut scope = local.ensure_scope(&target.scope, &setup)?;
    scope.setup = Some(setup);
    scope.schema = Some(schema.clone());
    local.save_scope(&scope)?;

    println!("Provisioned scope '{}' ({})", target.scope, scope.id);
    for table in &schema.tables {
        println!(
            "  {} ({} columns, key: {})",
            table.table_name,
            table.columns.len(),
            table.primary_keys.join(", ")
        );
    }
    Ok(())
}
