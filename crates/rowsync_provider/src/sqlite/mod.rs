//! SQLite reference dialect.

mod builder;
mod clock;
mod connection;
mod scope;

pub use builder::{quote, SqliteTableBuilder};
pub use clock::{next_timestamp, TIMESTAMP_FUNCTION};
pub use connection::{SqliteConnection, MEMORY_DATA_SOURCE};

use crate::command::{DbCommand, DbConnection};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::SyncProvider;
use crate::scope::ScopeHandlers;
use crate::table::DbTableBuilder;
use rowsync_core::{SyncColumn, SyncDataType, SyncTable, SyncValue};
use std::sync::Arc;

/// Dialect id of the SQLite provider.
pub const SQLITE_DIALECT: &str = "sqlite";

/// SQLite provider.
#[derive(Clone)]
pub struct SqliteSyncProvider {
    handlers: Arc<ScopeHandlers>,
}

impl SqliteSyncProvider {
    /// Creates the provider and its scope handler table.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(scope::handlers()),
        }
    }
}

impl Default for SqliteSyncProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SqliteSyncProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSyncProvider")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl SyncProvider for SqliteSyncProvider {
    fn dialect(&self) -> &'static str {
        SQLITE_DIALECT
    }

    fn scope_handlers(&self) -> Arc<ScopeHandlers> {
        Arc::clone(&self.handlers)
    }

    fn table_builder(&self, table: &SyncTable) -> ProviderResult<Box<dyn DbTableBuilder>> {
        Ok(Box::new(SqliteTableBuilder::new(table)?))
    }

    fn describe_table(
        &self,
        connection: &dyn DbConnection,
        table_name: &str,
        schema_name: &str,
    ) -> ProviderResult<Option<SyncTable>> {
        let cmd = DbCommand::new(
            "DescribeTable",
            "SELECT name, type, \"notnull\", pk, hidden FROM pragma_table_xinfo(@table_name) ORDER BY cid",
        )
        .with_value("table_name", table_name);
        let rows = connection.query(&cmd)?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut table = SyncTable::new(table_name, schema_name);
        let mut keys: Vec<(i64, String)> = Vec::new();
        for row in rows {
            let name = row
                .first()
                .and_then(SyncValue::as_text)
                .ok_or_else(|| ProviderError::invalid_schema(table_name, "column without name"))?
                .to_string();
            let declared = row.get(1).and_then(SyncValue::as_text).unwrap_or("");
            let not_null = row.get(2).and_then(SyncValue::as_integer).unwrap_or(0) != 0;
            let pk = row.get(3).and_then(SyncValue::as_integer).unwrap_or(0);
            let hidden = row.get(4).and_then(SyncValue::as_integer).unwrap_or(0);

            // 1 marks hidden columns of virtual tables; 2 and 3 are generated.
            if hidden == 1 {
                continue;
            }
            let mut column = SyncColumn::new(&name, SyncDataType::from_declared(declared));
            if not_null {
                column = column.not_null();
            }
            if hidden >= 2 {
                column = column.computed();
            }
            if pk > 0 {
                keys.push((pk, name));
            }
            table = table.with_column(column);
        }

        if keys.is_empty() {
            return Err(ProviderError::invalid_schema(
                table_name,
                "table has no primary key",
            ));
        }
        keys.sort_by_key(|(position, _)| *position);
        Ok(Some(
            table.with_primary_key(keys.into_iter().map(|(_, name)| name)),
        ))
    }

    fn open(&self, data_source: &str) -> ProviderResult<Box<dyn DbConnection>> {
        let connection = if data_source == MEMORY_DATA_SOURCE {
            SqliteConnection::open_in_memory()?
        } else {
            SqliteConnection::open(data_source)?
        };
        Ok(Box::new(connection))
    }
}
