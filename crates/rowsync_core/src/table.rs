//! In-memory relational tables carried between the two sides of a sync.

use crate::error::{CoreError, CoreResult};
use crate::naming::SyncNamed;
use crate::value::{SyncDataType, SyncValue};
use serde::{Deserialize, Serialize};

/// State of a change row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// Row was inserted since the last sync.
    Added,
    /// Row was inserted or updated since the last sync.
    Modified,
    /// Row was deleted (tombstone).
    Deleted,
}

impl RowState {
    /// Numeric code used in batch part files.
    pub fn to_code(self) -> u8 {
        match self {
            RowState::Added => 1,
            RowState::Modified => 2,
            RowState::Deleted => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RowState::Added),
            2 => Some(RowState::Modified),
            3 => Some(RowState::Deleted),
            _ => None,
        }
    }

    /// Returns true for tombstones.
    pub fn is_tombstone(self) -> bool {
        self == RowState::Deleted
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncColumn {
    /// Column name.
    pub name: String,
    /// Logical data type.
    pub data_type: SyncDataType,
    /// Whether NULL is accepted.
    #[serde(default = "default_true")]
    pub allow_null: bool,
    /// Generated/computed columns are never written by the sync engine.
    #[serde(default)]
    pub is_computed: bool,
}

fn default_true() -> bool {
    true
}

impl SyncColumn {
    /// Creates a nullable, non-computed column.
    pub fn new(name: impl Into<String>, data_type: SyncDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            allow_null: true,
            is_computed: false,
        }
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    /// Marks the column computed.
    pub fn computed(mut self) -> Self {
        self.is_computed = true;
        self
    }
}

/// A change row: positional values plus state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRow {
    /// Row state.
    pub state: RowState,
    /// Values in column order.
    pub values: Vec<SyncValue>,
    /// Logical timestamp of the change, copied from the tracking row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change: Option<i64>,
}

impl SyncRow {
    /// Creates a row.
    pub fn new(state: RowState, values: Vec<SyncValue>) -> Self {
        Self {
            state,
            values,
            last_change: None,
        }
    }

    /// Sets the change timestamp.
    pub fn with_last_change(mut self, timestamp: i64) -> Self {
        self.last_change = Some(timestamp);
        self
    }
}

/// An in-memory table: structure plus an ordered list of rows.
///
/// Column order is the row layout; it must not change while rows exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTable {
    /// Table name (unquoted).
    pub table_name: String,
    /// Schema namespace, empty when absent.
    #[serde(default)]
    pub schema_name: String,
    /// Ordered columns.
    pub columns: Vec<SyncColumn>,
    /// Primary key column names, in declared order.
    pub primary_keys: Vec<String>,
    /// Change rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<SyncRow>,
}

impl SyncTable {
    /// Creates an empty table with no columns.
    pub fn new(table_name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: schema_name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Adds a column (builder style).
    pub fn with_column(mut self, column: SyncColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key (builder style).
    pub fn with_primary_key<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the position of a column, case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Returns true if the column is part of the primary key.
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_keys
            .iter()
            .any(|k| k.eq_ignore_ascii_case(name))
    }

    /// Primary key columns, in key order.
    pub fn primary_key_columns(&self) -> Vec<&SyncColumn> {
        self.primary_keys
            .iter()
            .filter_map(|k| self.column_index(k).map(|i| &self.columns[i]))
            .collect()
    }

    /// Non-key, non-computed columns: the ones an update can change.
    pub fn mutable_columns(&self) -> Vec<&SyncColumn> {
        self.columns
            .iter()
            .filter(|c| !c.is_computed && !self.is_primary_key(&c.name))
            .collect()
    }

    /// Non-computed columns, in table order.
    pub fn writable_columns(&self) -> Vec<&SyncColumn> {
        self.columns.iter().filter(|c| !c.is_computed).collect()
    }

    /// Extracts the primary key values of a row, in key order.
    pub fn key_values(&self, row: &SyncRow) -> Vec<SyncValue> {
        self.primary_keys
            .iter()
            .filter_map(|k| self.column_index(k))
            .map(|i| row.values.get(i).cloned().unwrap_or(SyncValue::Null))
            .collect()
    }

    /// Appends a row after checking its width.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowWidthMismatch`] when the value count differs
    /// from the column count.
    pub fn push_row(&mut self, row: SyncRow) -> CoreResult<()> {
        if row.values.len() != self.columns.len() {
            return Err(CoreError::RowWidthMismatch {
                table: self.full_name(),
                expected: self.columns.len(),
                actual: row.values.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Returns a copy of the structure without rows.
    pub fn clone_schema(&self) -> Self {
        Self {
            table_name: self.table_name.clone(),
            schema_name: self.schema_name.clone(),
            columns: self.columns.clone(),
            primary_keys: self.primary_keys.clone(),
            rows: Vec::new(),
        }
    }

    /// Returns true if the table holds rows.
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }
}

impl SyncNamed for SyncTable {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }
}
