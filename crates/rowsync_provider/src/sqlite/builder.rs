//! SQLite rendering of table, tracking table, trigger and change commands.
//!
//! SQLite has no schemas in the sense of a namespace inside one database, so
//! the schema part of a name is ignored and every object is quoted `[name]`.

use super::clock::TIMESTAMP_FUNCTION;
use crate::command::{column_parameter, DbCommand};
use crate::error::{ProviderError, ProviderResult};
use crate::table::{
    DbTableBuilder, TableCommand, TableNames, COLUMN_LAST_CHANGE, COLUMN_TOMBSTONE,
    COLUMN_UPDATE_SCOPE_ID, PARAM_MAX_TIMESTAMP, PARAM_MIN_TIMESTAMP, PARAM_SYNC_SCOPE_ID,
    PARAM_TOMBSTONE,
};
use crate::trigger::{MirrorTemplate, TriggerKind};
use rowsync_core::{ParsedName, SyncColumn, SyncDataType, SyncTable};

/// Quotes an identifier.
pub fn quote(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn quote_name(name: &ParsedName) -> String {
    quote(name.name())
}

fn native_type(data_type: SyncDataType) -> &'static str {
    match data_type {
        SyncDataType::Integer => "INTEGER",
        SyncDataType::Real => "REAL",
        SyncDataType::Text => "TEXT",
        SyncDataType::Blob => "BLOB",
        SyncDataType::Boolean => "BOOLEAN",
        SyncDataType::Numeric => "NUMERIC",
    }
}

/// Table builder for the SQLite dialect.
#[derive(Debug, Clone)]
pub struct SqliteTableBuilder {
    table: SyncTable,
    names: TableNames,
    /// (column index, column) of each key column, in key order.
    keys: Vec<(usize, SyncColumn)>,
}

impl SqliteTableBuilder {
    /// Creates a builder.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidSchema`] when the table has no
    /// primary key or a key column is not among the columns.
    pub fn new(table: &SyncTable) -> ProviderResult<Self> {
        let table = table.clone_schema();
        if table.primary_keys.is_empty() {
            return Err(ProviderError::invalid_schema(
                &table.table_name,
                "table has no primary key",
            ));
        }
        let keys = table
            .primary_keys
            .iter()
            .map(|k| {
                table
                    .column_index(k)
                    .map(|i| (i, table.columns[i].clone()))
                    .ok_or_else(|| {
                        ProviderError::invalid_schema(
                            &table.table_name,
                            format!("primary key column {k} is not a column"),
                        )
                    })
            })
            .collect::<ProviderResult<Vec<_>>>()?;
        let names = TableNames::new(&table);
        Ok(Self { table, names, keys })
    }

    fn key_list(&self, prefix: &str) -> String {
        self.keys
            .iter()
            .map(|(_, c)| format!("{prefix}{}", quote(&c.name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `lhs.[k] = rhs.[k] AND ..` over the key columns.
    fn key_match(&self, lhs: &str, rhs: impl Fn(usize, &SyncColumn) -> String) -> String {
        self.keys
            .iter()
            .map(|(i, c)| format!("{lhs}{} = {}", quote(&c.name), rhs(*i, c)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn exists_object(&self, name: &'static str, kind: &str, object: &ParsedName) -> DbCommand {
        DbCommand::new(
            name,
            format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = '{kind}' AND name = @object_name"
            ),
        )
        .with_value("object_name", object.name())
    }

    fn create_table(&self) -> DbCommand {
        let mut defs: Vec<String> = self
            .table
            .columns
            .iter()
            .map(|c| {
                let null = if c.allow_null && !self.table.is_primary_key(&c.name) {
                    "NULL"
                } else {
                    "NOT NULL"
                };
                format!("{} {} {null}", quote(&c.name), native_type(c.data_type))
            })
            .collect();
        defs.push(format!("PRIMARY KEY ({})", self.key_list("")));
        DbCommand::new(
            "CreateTable",
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_name(&self.names.table),
                defs.join(", ")
            ),
        )
    }

    fn create_tracking_table(&self) -> DbCommand {
        let mut defs: Vec<String> = self
            .keys
            .iter()
            .map(|(_, c)| format!("{} {} NOT NULL", quote(&c.name), native_type(c.data_type)))
            .collect();
        defs.push(format!("{} TEXT NULL", quote(COLUMN_UPDATE_SCOPE_ID)));
        defs.push(format!("{} INTEGER NOT NULL DEFAULT 0", quote(COLUMN_TOMBSTONE)));
        defs.push(format!("{} INTEGER NULL", quote(COLUMN_LAST_CHANGE)));
        defs.push(format!("PRIMARY KEY ({})", self.key_list("")));
        DbCommand::new(
            "CreateTrackingTable",
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_name(&self.names.tracking),
                defs.join(", ")
            ),
        )
    }

    fn populate_tracking_table(&self) -> DbCommand {
        let text = format!(
            "INSERT OR IGNORE INTO {tracking} ({keys}, {scope}, {tomb}, {last}) \
             SELECT {base_keys}, NULL, 0, {clock}() FROM {table} [base]",
            tracking = quote_name(&self.names.tracking),
            table = quote_name(&self.names.table),
            keys = self.key_list(""),
            base_keys = self.key_list("[base]."),
            scope = quote(COLUMN_UPDATE_SCOPE_ID),
            tomb = quote(COLUMN_TOMBSTONE),
            last = quote(COLUMN_LAST_CHANGE),
            clock = TIMESTAMP_FUNCTION,
        );
        DbCommand::new("PopulateTrackingTable", text)
    }

    fn create_trigger(&self, kind: TriggerKind) -> DbCommand {
        let template = MirrorTemplate::for_table(kind, &self.table);
        let source = template.source.alias();
        let tracking = quote_name(&self.names.tracking);
        let tombstone = template.tombstone_literal();
        let key_match = self.key_match("", |_, c| format!("{source}.{}", quote(&c.name)));

        let when = template
            .guard_expression(quote)
            .map(|guard| format!("\nWHEN {guard}"))
            .unwrap_or_default();

        let text = format!(
            "CREATE TRIGGER IF NOT EXISTS {trigger} AFTER {event} ON {table} FOR EACH ROW{when}\n\
             BEGIN\n\
             UPDATE {tracking} SET {scope} = NULL, {tomb} = {tombstone}, {last} = {clock}() \
             WHERE {key_match};\n\
             INSERT INTO {tracking} ({keys}, {scope}, {tomb}, {last}) \
             SELECT {source_keys}, NULL, {tombstone}, {clock}() \
             WHERE NOT EXISTS (SELECT 1 FROM {tracking} WHERE {key_match});\n\
             END",
            trigger = quote_name(&self.names.trigger(kind)),
            event = kind.event(),
            table = quote_name(&self.names.table),
            scope = quote(COLUMN_UPDATE_SCOPE_ID),
            tomb = quote(COLUMN_TOMBSTONE),
            last = quote(COLUMN_LAST_CHANGE),
            clock = TIMESTAMP_FUNCTION,
            keys = self.key_list(""),
            source_keys = self.key_list(&format!("{source}.")),
        );
        DbCommand::new("CreateTrigger", text)
    }

    /// Window filter shared by change selection and counting.
    fn change_filter(&self) -> String {
        let scope = quote(COLUMN_UPDATE_SCOPE_ID);
        let last = quote(COLUMN_LAST_CHANGE);
        format!(
            "[side].{last} > @{PARAM_MIN_TIMESTAMP} AND [side].{last} <= @{PARAM_MAX_TIMESTAMP} \
             AND ([side].{scope} IS NULL OR @{PARAM_SYNC_SCOPE_ID} IS NULL OR [side].{scope} <> @{PARAM_SYNC_SCOPE_ID})"
        )
    }

    fn with_window_parameters(cmd: DbCommand) -> DbCommand {
        cmd.with_parameter(PARAM_MIN_TIMESTAMP)
            .with_parameter(PARAM_MAX_TIMESTAMP)
            .with_parameter(PARAM_SYNC_SCOPE_ID)
    }

    fn select_changes(&self) -> DbCommand {
        let mut columns: Vec<String> = self
            .table
            .columns
            .iter()
            .map(|c| {
                let alias = if self.table.is_primary_key(&c.name) {
                    "[side]"
                } else {
                    "[base]"
                };
                format!("{alias}.{}", quote(&c.name))
            })
            .collect();
        columns.push(format!("[side].{}", quote(COLUMN_TOMBSTONE)));
        columns.push(format!("[side].{}", quote(COLUMN_LAST_CHANGE)));

        let text = format!(
            "SELECT {columns} FROM {tracking} [side] LEFT JOIN {table} [base] ON {join} \
             WHERE {filter} ORDER BY [side].{last}",
            columns = columns.join(", "),
            tracking = quote_name(&self.names.tracking),
            table = quote_name(&self.names.table),
            join = self.key_match("[base].", |_, c| format!("[side].{}", quote(&c.name))),
            filter = self.change_filter(),
            last = quote(COLUMN_LAST_CHANGE),
        );
        Self::with_window_parameters(DbCommand::new("SelectChanges", text))
    }

    fn count_changes(&self) -> DbCommand {
        let text = format!(
            "SELECT COUNT(*) FROM {} [side] WHERE {}",
            quote_name(&self.names.tracking),
            self.change_filter()
        );
        Self::with_window_parameters(DbCommand::new("CountChanges", text))
    }

    fn with_key_parameters(&self, mut cmd: DbCommand) -> DbCommand {
        for (i, _) in &self.keys {
            cmd = cmd.with_parameter(column_parameter(*i));
        }
        cmd
    }

    fn select_row_metadata(&self) -> DbCommand {
        let text = format!(
            "SELECT {}, {}, {} FROM {} WHERE {}",
            quote(COLUMN_UPDATE_SCOPE_ID),
            quote(COLUMN_TOMBSTONE),
            quote(COLUMN_LAST_CHANGE),
            quote_name(&self.names.tracking),
            self.key_match("", |i, _| format!("@{}", column_parameter(i))),
        );
        self.with_key_parameters(DbCommand::new("SelectRowMetadata", text))
    }

    fn upsert_row(&self) -> DbCommand {
        let writable: Vec<(usize, &SyncColumn)> = self
            .table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_computed)
            .collect();
        let columns: Vec<String> = writable.iter().map(|(_, c)| quote(&c.name)).collect();
        let values: Vec<String> = writable
            .iter()
            .map(|(i, _)| format!("@{}", column_parameter(*i)))
            .collect();

        let updates: Vec<String> = self
            .table
            .mutable_columns()
            .into_iter()
            .map(|c| format!("{0} = excluded.{0}", quote(&c.name)))
            .collect();
        let action = if updates.is_empty() {
            "NOTHING".to_string()
        } else {
            format!("UPDATE SET {}", updates.join(", "))
        };

        let text = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO {action}",
            quote_name(&self.names.table),
            columns.join(", "),
            values.join(", "),
            self.key_list(""),
        );
        writable
            .iter()
            .fold(DbCommand::new("UpsertRow", text), |cmd, (i, _)| {
                cmd.with_parameter(column_parameter(*i))
            })
    }

    fn delete_row(&self) -> DbCommand {
        let text = format!(
            "DELETE FROM {} WHERE {}",
            quote_name(&self.names.table),
            self.key_match("", |i, _| format!("@{}", column_parameter(i))),
        );
        self.with_key_parameters(DbCommand::new("DeleteRow", text))
    }

    fn update_metadata(&self) -> DbCommand {
        let scope = quote(COLUMN_UPDATE_SCOPE_ID);
        let tomb = quote(COLUMN_TOMBSTONE);
        let last = quote(COLUMN_LAST_CHANGE);
        let key_values: Vec<String> = self
            .keys
            .iter()
            .map(|(i, _)| format!("@{}", column_parameter(*i)))
            .collect();
        let text = format!(
            "INSERT INTO {tracking} ({keys}, {scope}, {tomb}, {last}) \
             VALUES ({values}, @{PARAM_SYNC_SCOPE_ID}, @{PARAM_TOMBSTONE}, {TIMESTAMP_FUNCTION}()) \
             ON CONFLICT ({keys}) DO UPDATE SET {scope} = excluded.{scope}, \
             {tomb} = excluded.{tomb}, {last} = excluded.{last}",
            tracking = quote_name(&self.names.tracking),
            keys = self.key_list(""),
            values = key_values.join(", "),
        );
        self.with_key_parameters(DbCommand::new("UpdateMetadata", text))
            .with_parameter(PARAM_SYNC_SCOPE_ID)
            .with_value(PARAM_TOMBSTONE, 0)
    }
}

impl DbTableBuilder for SqliteTableBuilder {
    fn table(&self) -> &SyncTable {
        &self.table
    }

    fn names(&self) -> &TableNames {
        &self.names
    }

    fn command(&self, command: TableCommand) -> ProviderResult<DbCommand> {
        let table = quote_name(&self.names.table);
        let tracking = quote_name(&self.names.tracking);
        let cmd = match command {
            TableCommand::ExistsTable => self.exists_object("ExistsTable", "table", &self.names.table),
            TableCommand::CreateTable => self.create_table(),
            TableCommand::DropTable => {
                DbCommand::new("DropTable", format!("DROP TABLE IF EXISTS {table}"))
            }
            TableCommand::ExistsTrackingTable => {
                self.exists_object("ExistsTrackingTable", "table", &self.names.tracking)
            }
            TableCommand::CreateTrackingTable => self.create_tracking_table(),
            TableCommand::DropTrackingTable => DbCommand::new(
                "DropTrackingTable",
                format!("DROP TABLE IF EXISTS {tracking}"),
            ),
            TableCommand::PopulateTrackingTable => self.populate_tracking_table(),
            TableCommand::ExistsTrigger(kind) => {
                self.exists_object("ExistsTrigger", "trigger", &self.names.trigger(kind))
            }
            TableCommand::CreateTrigger(kind) => self.create_trigger(kind),
            TableCommand::DropTrigger(kind) => DbCommand::new(
                "DropTrigger",
                format!(
                    "DROP TRIGGER IF EXISTS {}",
                    quote_name(&self.names.trigger(kind))
                ),
            ),
            TableCommand::SelectChanges => self.select_changes(),
            TableCommand::CountChanges => self.count_changes(),
            TableCommand::SelectRowMetadata => self.select_row_metadata(),
            TableCommand::UpsertRow => self.upsert_row(),
            TableCommand::DeleteRow => self.delete_row(),
            TableCommand::UpdateMetadata => self.update_metadata(),
        };
        Ok(cmd)
    }
}
