//! `DbConnection` over a rusqlite connection.

use super::clock;
use crate::command::{DbCommand, DbConnection};
use crate::error::{ProviderError, ProviderResult};
use rowsync_core::SyncValue;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{CachedStatement, Connection};
use std::path::Path;

/// Data source reported by in-memory connections.
pub const MEMORY_DATA_SOURCE: &str = ":memory:";

/// An owned SQLite connection with the clock function registered.
///
/// Parameters are bound by name with the `@` prefix. Every declared
/// parameter is bound on every run, so cached statements never see stale
/// values.
#[derive(Debug)]
pub struct SqliteConnection {
    inner: Option<Connection>,
    data_source: String,
}

impl SqliteConnection {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref();
        let connection = Connection::open(path)?;
        Self::from_connection(connection, path.display().to_string())
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the database cannot be created.
    pub fn open_in_memory() -> ProviderResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, MEMORY_DATA_SOURCE)
    }

    /// Wraps an existing connection.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the clock function cannot be registered.
    pub fn from_connection(
        connection: Connection,
        data_source: impl Into<String>,
    ) -> ProviderResult<Self> {
        clock::register(&connection)?;
        Ok(Self {
            inner: Some(connection),
            data_source: data_source.into(),
        })
    }

    /// The underlying connection.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ConnectionClosed`] after [`Self::close`].
    pub fn raw(&self) -> ProviderResult<&Connection> {
        self.inner.as_ref().ok_or(ProviderError::ConnectionClosed)
    }

    /// Runs SQL text without parameters, possibly several statements.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error.
    pub fn execute_batch(&self, sql: &str) -> ProviderResult<()> {
        self.raw()?.execute_batch(sql)?;
        Ok(())
    }

    /// Closes the connection. Further commands fail with
    /// [`ProviderError::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Returns the SQLite error if the close fails; the connection is
    /// dropped anyway.
    pub fn close(&mut self) -> ProviderResult<()> {
        match self.inner.take() {
            Some(connection) => connection.close().map_err(|(_, e)| ProviderError::from(e)),
            None => Ok(()),
        }
    }

    fn prepare(&self, command: &DbCommand) -> ProviderResult<CachedStatement<'_>> {
        let mut stmt = self.raw()?.prepare_cached(&command.text)?;
        for parameter in &command.parameters {
            if let Some(index) = stmt.parameter_index(&format!("@{}", parameter.name))? {
                stmt.raw_bind_parameter(index, to_sql_value(&parameter.value))?;
            }
        }
        Ok(stmt)
    }
}

fn to_sql_value(value: &SyncValue) -> Value {
    match value {
        SyncValue::Null => Value::Null,
        SyncValue::Boolean(b) => Value::Integer(i64::from(*b)),
        SyncValue::Integer(i) => Value::Integer(*i),
        SyncValue::Real(f) => Value::Real(*f),
        SyncValue::Text(s) => Value::Text(s.clone()),
        SyncValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> SyncValue {
    match value {
        ValueRef::Null => SyncValue::Null,
        ValueRef::Integer(i) => SyncValue::Integer(i),
        ValueRef::Real(f) => SyncValue::Real(f),
        ValueRef::Text(t) => SyncValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SyncValue::Blob(b.to_vec()),
    }
}

impl DbConnection for SqliteConnection {
    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn data_source(&self) -> &str {
        &self.data_source
    }

    fn database(&self) -> &str {
        "main"
    }

    fn execute(&self, command: &DbCommand) -> ProviderResult<usize> {
        let mut stmt = self.prepare(command)?;
        Ok(stmt.raw_execute()?)
    }

    fn query(&self, command: &DbCommand) -> ProviderResult<Vec<Vec<SyncValue>>> {
        let mut stmt = self.prepare(command)?;
        let width = stmt.column_count();
        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql_value(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn begin_transaction(&self) -> ProviderResult<()> {
        self.execute_batch("BEGIN")
    }

    fn commit(&self) -> ProviderResult<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> ProviderResult<()> {
        self.execute_batch("ROLLBACK")
    }
}
