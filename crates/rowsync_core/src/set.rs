//! Schema snapshots (`SyncSet`) and the table allow-list (`SyncSetup`).

use crate::naming::{ParsedName, SyncNamed};
use crate::table::SyncTable;
use serde::{Deserialize, Serialize};

/// Ordered collection of table definitions, optionally carrying rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSet {
    /// Tables, in dependency order (parents first).
    pub tables: Vec<SyncTable>,
}

impl SyncSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table (builder style).
    pub fn with_table(mut self, table: SyncTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Finds a table by name and schema.
    pub fn table<N: SyncNamed + ?Sized>(&self, name: &N) -> Option<&SyncTable> {
        self.tables.iter().find(|t| t.is_same_table(name))
    }

    /// Finds a table by name and schema, mutably.
    pub fn table_mut<N: SyncNamed + ?Sized>(&mut self, name: &N) -> Option<&mut SyncTable> {
        self.tables.iter_mut().find(|t| t.is_same_table(name))
    }

    /// Returns a clone with every table's rows removed.
    ///
    /// The sanitized set is what a batch carries to rehydrate rows read
    /// back from part files.
    pub fn sanitized(&self) -> Self {
        Self {
            tables: self.tables.iter().map(SyncTable::clone_schema).collect(),
        }
    }

    /// Returns true if no table holds rows.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| !t.has_rows())
    }

    /// Total number of rows across all tables.
    pub fn rows_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// One entry of the setup allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupTable {
    /// Table name (unquoted).
    pub table_name: String,
    /// Schema namespace, empty when absent.
    #[serde(default)]
    pub schema_name: String,
    /// Columns to synchronize; empty means every column.
    #[serde(default)]
    pub columns: Vec<String>,
}

impl SetupTable {
    /// Creates an entry for all columns of a table.
    pub fn new(table_name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: schema_name.into(),
            columns: Vec::new(),
        }
    }

    /// Restricts the synchronized columns.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the column is synchronized.
    pub fn includes_column(&self, column: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

impl SyncNamed for SetupTable {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }
}

/// The allow-list of tables (and columns) a scope synchronizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetup {
    /// Tables, in dependency order.
    pub tables: Vec<SetupTable>,
}

impl SyncSetup {
    /// Creates a setup from table names such as `"Orders"` or `"dbo.Orders"`.
    /// Unparseable names are kept verbatim as bare table names.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tables = tables
            .into_iter()
            .map(|t| match ParsedName::parse(t.as_ref()) {
                Ok(name) => SetupTable::new(name.name(), name.schema()),
                Err(_) => SetupTable::new(t.as_ref(), ""),
            })
            .collect();
        Self { tables }
    }

    /// Adds a table entry (builder style).
    pub fn with_table(mut self, table: SetupTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Finds the entry for a table.
    pub fn table<N: SyncNamed + ?Sized>(&self, name: &N) -> Option<&SetupTable> {
        self.tables.iter().find(|t| t.is_same_table(name))
    }

    /// Returns true if there is nothing to synchronize.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
