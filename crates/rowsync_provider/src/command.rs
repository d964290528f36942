//! Provider-neutral parameterized commands and the connection seam.

use crate::error::{ProviderError, ProviderResult};
use rowsync_core::SyncValue;

/// A named command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct DbParameter {
    /// Parameter name, without the dialect prefix (`@`, `:`).
    pub name: String,
    /// Bound value; NULL until set.
    pub value: SyncValue,
}

/// A prepared, parameterized command.
///
/// Commands are plain values: builders produce them once (scope commands
/// are cached process-wide) and callers clone, bind and run them on their
/// own connection.
#[derive(Debug, Clone, PartialEq)]
pub struct DbCommand {
    /// Command name, for diagnostics.
    pub name: String,
    /// Dialect SQL text.
    pub text: String,
    /// Declared parameters.
    pub parameters: Vec<DbParameter>,
}

impl DbCommand {
    /// Creates a command without parameters.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    /// Declares a parameter (builder style).
    pub fn with_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(DbParameter {
            name: name.into(),
            value: SyncValue::Null,
        });
        self
    }

    /// Declares a parameter with a preset value (builder style).
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<SyncValue>) -> Self {
        self.parameters.push(DbParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Returns true if the command declares `name`.
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    /// Current value of a parameter.
    pub fn parameter(&self, name: &str) -> Option<&SyncValue> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Binds a declared parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownParameter`] when `name` is not
    /// declared.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<SyncValue>) -> ProviderResult<()> {
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.value = value.into();
                Ok(())
            }
            None => Err(ProviderError::UnknownParameter {
                command: self.name.clone(),
                parameter: name.to_string(),
            }),
        }
    }

    /// Binds a parameter only if declared. Returns whether it was.
    pub fn set_if_declared(&mut self, name: &str, value: impl Into<SyncValue>) -> bool {
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.value = value.into();
                true
            }
            None => false,
        }
    }

    /// Binds the positional column parameters (`p0`, `p1`, ..) declared by
    /// row-level table commands from a row's values.
    pub fn bind_row(&mut self, values: &[SyncValue]) {
        for (i, value) in values.iter().enumerate() {
            self.set_if_declared(&column_parameter(i), value.clone());
        }
    }
}

/// Name of the parameter carrying column `index` of a row.
pub fn column_parameter(index: usize) -> String {
    format!("p{index}")
}

/// A connection a provider can run commands on.
///
/// Connections are owned by the caller; builders only borrow them and
/// never open or close them. Commands run inside whatever transaction is
/// currently open on the connection.
pub trait DbConnection: Send {
    /// Returns true if the connection is open.
    fn is_open(&self) -> bool;

    /// Data source identity (file path, host, ..).
    fn data_source(&self) -> &str;

    /// Database (catalog) name.
    fn database(&self) -> &str;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&self, command: &DbCommand) -> ProviderResult<usize>;

    /// Runs a query and returns every row.
    fn query(&self, command: &DbCommand) -> ProviderResult<Vec<Vec<SyncValue>>>;

    /// Starts a transaction.
    fn begin_transaction(&self) -> ProviderResult<()>;

    /// Commits the open transaction.
    fn commit(&self) -> ProviderResult<()>;

    /// Rolls back the open transaction.
    fn rollback(&self) -> ProviderResult<()>;

    /// Runs a query and returns the first column of the first row.
    fn query_scalar(&self, command: &DbCommand) -> ProviderResult<Option<SyncValue>> {
        Ok(self
            .query(command)?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next()))
    }

    /// Fails with [`ProviderError::ConnectionClosed`] unless open.
    fn ensure_open(&self) -> ProviderResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ProviderError::ConnectionClosed)
        }
    }
}
