//! Changes command implementation.

use super::{open_local, runtime, Target};
use rowsync_engine::{SyncError, SyncOptions};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Runs the changes command: writes the scope's changes since `since` (or
/// its last sync) into a batch under `out` and prints the manifest path.
pub fn run(
    db: &Path,
    target: &Target,
    out: &Path,
    since: Option<i64>,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = SyncOptions::new(out).with_batch_size(batch_size);
    let local = open_local(db, target, options)?;
    let scope = local
        .get_scope(&target.scope)?
        .ok_or_else(|| SyncError::ScopeNotProvisioned(target.scope.clone()))?;
    let schema = scope
        .schema
        .clone()
        .ok_or_else(|| SyncError::ScopeNotProvisioned(target.scope.clone()))?;
    let since = since.unwrap_or_else(|| scope.changes_since());

    let token = CancellationToken::new();
    let batch = runtime()?.block_on(local.get_changes(&schema, since, None, &token))?;

    if batch.parts().is_empty() {
        println!("No changes since {since}");
        return Ok(());
    }
    println!(
        "{} rows in {} parts: {}",
        batch.rows_count(),
        batch.parts().len(),
        batch.directory_path().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{deprovision, provision};
    use rowsync_core::{BatchInfo, MANIFEST_FILE_NAME};
    use rowsync_provider::sqlite::SqliteConnection;

    fn target() -> Target {
        Target {
            scope: "default".into(),
            scope_table: "scope_info".into(),
        }
    }

    #[test]
    fn provision_export_and_deprovision() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("app.db");
        SqliteConnection::open(&db)
            .unwrap()
            .execute_batch(
                "CREATE TABLE Tags (Name TEXT NOT NULL PRIMARY KEY); \
                 INSERT INTO Tags VALUES ('red'), ('blue'), ('green');",
            )
            .unwrap();

        provision::run(&db, &target(), &["Tags".to_string()]).unwrap();

        let out = dir.path().join("out");
        run(&db, &target(), &out, None, 2).unwrap();
        let batch_dir = std::fs::read_dir(&out).unwrap().next().unwrap().unwrap().path();
        assert!(batch_dir.join(MANIFEST_FILE_NAME).exists());
        let batch = runtime()
            .unwrap()
            .block_on(BatchInfo::load_manifest(&batch_dir))
            .unwrap();
        assert_eq!(batch.rows_count(), 3);
        assert_eq!(batch.parts().len(), 2);

        deprovision::run(&db, &target()).unwrap();
        let err = run(&db, &target(), &out, None, 2).unwrap_err();
        assert!(err.to_string().contains("not provisioned"));
    }
}
