//! Per-table command vocabulary and the dialect seam that renders it.

use crate::command::DbCommand;
use crate::error::ProviderResult;
use crate::trigger::TriggerKind;
use rowsync_core::{ParsedName, SyncTable};

/// Lower bound (exclusive) of a change selection.
pub const PARAM_MIN_TIMESTAMP: &str = "sync_min_timestamp";
/// Upper bound (inclusive) of a change selection.
pub const PARAM_MAX_TIMESTAMP: &str = "sync_max_timestamp";
/// Scope id excluded from a change selection, or stamped by an apply.
pub const PARAM_SYNC_SCOPE_ID: &str = "sync_scope_id";
/// Tombstone flag written by a metadata update.
pub const PARAM_TOMBSTONE: &str = "sync_row_is_tombstone";

/// Tracking column holding the scope id of the last remote writer.
pub const COLUMN_UPDATE_SCOPE_ID: &str = "update_scope_id";
/// Tracking column flagging deleted rows.
pub const COLUMN_TOMBSTONE: &str = "sync_row_is_tombstone";
/// Tracking column holding the logical clock of the last change.
pub const COLUMN_LAST_CHANGE: &str = "last_change_datetime";

/// Commands a table builder renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableCommand {
    /// Count of matching base tables (0 or 1).
    ExistsTable,
    /// Create the base table.
    CreateTable,
    /// Drop the base table.
    DropTable,
    /// Count of matching tracking tables (0 or 1).
    ExistsTrackingTable,
    /// Create the tracking table.
    CreateTrackingTable,
    /// Drop the tracking table.
    DropTrackingTable,
    /// Track base rows that have no tracking row yet.
    PopulateTrackingTable,
    /// Count of matching triggers (0 or 1).
    ExistsTrigger(TriggerKind),
    /// Create a trigger.
    CreateTrigger(TriggerKind),
    /// Drop a trigger.
    DropTrigger(TriggerKind),
    /// Changed rows within a timestamp window, oldest first. Columns are the
    /// table's columns in order, then tombstone and last change.
    SelectChanges,
    /// Number of changed rows within a timestamp window.
    CountChanges,
    /// Tracking metadata of one key: update scope id, tombstone, last change.
    SelectRowMetadata,
    /// Insert or update a base row from positional parameters.
    UpsertRow,
    /// Delete a base row by key.
    DeleteRow,
    /// Upsert the tracking row of one key with an explicit scope id and
    /// tombstone flag.
    UpdateMetadata,
}

/// Object names derived from a base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// Base table.
    pub table: ParsedName,
    /// Tracking table (`<table>_tracking`).
    pub tracking: ParsedName,
}

impl TableNames {
    /// Derives names for a table.
    pub fn new(table: &SyncTable) -> Self {
        let base = ParsedName::new(&table.schema_name, &table.table_name);
        let tracking = ParsedName::new(
            &table.schema_name,
            format!("{}_tracking", bare_normalized(&base)),
        );
        Self {
            table: base,
            tracking,
        }
    }

    /// Trigger name for a kind (`<table>_<kind>_trigger`).
    pub fn trigger(&self, kind: TriggerKind) -> ParsedName {
        ParsedName::new(
            self.table.schema(),
            format!("{}_{}_trigger", bare_normalized(&self.table), kind.suffix()),
        )
    }
}

/// Normalized table name without its schema; derived objects live in the
/// base table's schema.
fn bare_normalized(name: &ParsedName) -> String {
    ParsedName::new("", name.name()).normalized()
}

/// Renders table-level commands for one table in one dialect.
pub trait DbTableBuilder: Send + Sync {
    /// The table this builder renders for.
    fn table(&self) -> &SyncTable;

    /// Derived object names.
    fn names(&self) -> &TableNames;

    /// Renders a command.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProviderError::MissingCommand`] when the dialect
    /// does not support the command, or
    /// [`crate::ProviderError::InvalidSchema`] when the table cannot be
    /// tracked (no primary key).
    fn command(&self, command: TableCommand) -> ProviderResult<DbCommand>;
}
