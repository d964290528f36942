//! Scope builder: the scope-info table behind a fixed command vocabulary.
//!
//! Providers register one handler per [`ScopeCommandType`]; the builder
//! dispatches through that table, checks the connection, and memoizes the
//! built command in a [`CommandCache`].
//!
//! Every scope command declares the four standard parameters
//! (`sync_scope_name`, `sync_scope_schema`, `sync_scope_setup`,
//! `sync_scope_version`). Handlers returning scope rows must select the
//! columns in [`SCOPE_COLUMNS`] order.

use crate::cache::{CacheKey, CommandCache};
use crate::command::{DbCommand, DbConnection};
use crate::error::{ProviderError, ProviderResult};
use rowsync_core::{ScopeInfo, SyncSet, SyncSetup, SyncValue};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Scope name parameter.
pub const PARAM_SCOPE_NAME: &str = "sync_scope_name";
/// Scope schema parameter.
pub const PARAM_SCOPE_SCHEMA: &str = "sync_scope_schema";
/// Scope setup parameter.
pub const PARAM_SCOPE_SETUP: &str = "sync_scope_setup";
/// Scope version parameter.
pub const PARAM_SCOPE_VERSION: &str = "sync_scope_version";
/// Scope id parameter.
pub const PARAM_SCOPE_ID: &str = "sync_scope_id";
/// Last local sync timestamp parameter.
pub const PARAM_LAST_SYNC_TIMESTAMP: &str = "scope_last_sync_timestamp";
/// Last remote sync timestamp parameter.
pub const PARAM_LAST_SERVER_SYNC_TIMESTAMP: &str = "scope_last_server_sync_timestamp";
/// Last sync duration parameter.
pub const PARAM_LAST_SYNC_DURATION: &str = "scope_last_sync_duration";

/// Scope-info table columns, in the order row-returning commands select them.
pub const SCOPE_COLUMNS: [&str; 8] = [
    PARAM_SCOPE_NAME,
    PARAM_SCOPE_ID,
    PARAM_SCOPE_SCHEMA,
    PARAM_SCOPE_SETUP,
    PARAM_SCOPE_VERSION,
    PARAM_LAST_SYNC_TIMESTAMP,
    PARAM_LAST_SERVER_SYNC_TIMESTAMP,
    PARAM_LAST_SYNC_DURATION,
];

/// The scope command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeCommandType {
    /// Does the scope-info table exist.
    ExistsScopeTable,
    /// Create the scope-info table.
    CreateScopeTable,
    /// List scopes (all, or one when the name parameter is set).
    GetScopes,
    /// Insert a scope row.
    InsertScope,
    /// Update a scope row.
    UpdateScope,
    /// Does a scope row exist.
    ExistsScope,
    /// Read the provider's logical clock.
    GetLocalTimestamp,
    /// Drop the scope-info table.
    DropScopeTable,
    /// Delete one scope row.
    DeleteScope,
}

impl ScopeCommandType {
    /// Every command type.
    pub const ALL: [ScopeCommandType; 9] = [
        ScopeCommandType::ExistsScopeTable,
        ScopeCommandType::CreateScopeTable,
        ScopeCommandType::GetScopes,
        ScopeCommandType::InsertScope,
        ScopeCommandType::UpdateScope,
        ScopeCommandType::ExistsScope,
        ScopeCommandType::GetLocalTimestamp,
        ScopeCommandType::DropScopeTable,
        ScopeCommandType::DeleteScope,
    ];

    /// Numeric code.
    pub fn to_code(self) -> u8 {
        match self {
            ScopeCommandType::ExistsScopeTable => 1,
            ScopeCommandType::CreateScopeTable => 2,
            ScopeCommandType::GetScopes => 3,
            ScopeCommandType::InsertScope => 4,
            ScopeCommandType::UpdateScope => 5,
            ScopeCommandType::ExistsScope => 6,
            ScopeCommandType::GetLocalTimestamp => 7,
            ScopeCommandType::DropScopeTable => 8,
            ScopeCommandType::DeleteScope => 9,
        }
    }

    /// Converts from a numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownCommandType`] for unknown codes.
    pub fn from_code(code: u8) -> ProviderResult<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.to_code() == code)
            .ok_or(ProviderError::UnknownCommandType(code))
    }
}

/// Which side's scope table a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeType {
    /// Client scope table.
    Client,
    /// Server scope table.
    Server,
}

/// Builds the command for one [`ScopeCommandType`], given the resolved
/// scope table name.
pub type ScopeHandler = Arc<dyn Fn(&str) -> DbCommand + Send + Sync>;

/// Dispatch table from command type to handler.
pub type ScopeHandlers = HashMap<ScopeCommandType, ScopeHandler>;

/// Scope builder bound to one scope-info table name.
#[derive(Clone)]
pub struct ScopeBuilder {
    scope_info_table: String,
    handlers: Arc<ScopeHandlers>,
    cache: Arc<CommandCache>,
}

impl ScopeBuilder {
    /// Creates a builder using the process-wide command cache.
    pub fn new(scope_info_table: impl Into<String>, handlers: Arc<ScopeHandlers>) -> Self {
        Self {
            scope_info_table: scope_info_table.into(),
            handlers,
            cache: CommandCache::global(),
        }
    }

    /// Uses a dedicated cache instead of the process-wide one.
    pub fn with_cache(mut self, cache: Arc<CommandCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Base scope-info table name.
    pub fn scope_info_table(&self) -> &str {
        &self.scope_info_table
    }

    /// Physical table name for a scope type.
    pub fn table_name(&self, scope_type: ScopeType) -> String {
        match scope_type {
            ScopeType::Client => self.scope_info_table.clone(),
            ScopeType::Server => format!("{}_server", self.scope_info_table),
        }
    }

    /// Returns the command for `command_type`, built at most once per
    /// (data source, database, table, command, scope type).
    ///
    /// # Errors
    ///
    /// - [`ProviderError::ConnectionClosed`] if the connection is not open
    /// - [`ProviderError::MissingCommand`] if no handler is registered
    pub fn get_command(
        &self,
        command_type: ScopeCommandType,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<DbCommand> {
        connection.ensure_open()?;

        let table = self.table_name(scope_type);
        let key = CacheKey {
            data_source: connection.data_source().to_string(),
            database: connection.database().to_string(),
            scope_table: table.clone(),
            command_type,
            scope_type,
        };

        self.cache.get_or_try_init(&key, || {
            let handler = self
                .handlers
                .get(&command_type)
                .ok_or_else(|| ProviderError::missing_command(command_type))?;
            tracing::debug!(?command_type, ?scope_type, table = %table, "building scope command");
            Ok(with_standard_parameters(handler(&table)))
        })
    }

    /// Same as [`ScopeBuilder::get_command`] for a numeric command code.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownCommandType`] for unknown codes, and
    /// the errors of `get_command`.
    pub fn get_command_by_code(
        &self,
        code: u8,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<DbCommand> {
        self.get_command(ScopeCommandType::from_code(code)?, scope_type, connection)
    }

    /// Returns true if the scope-info table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn exists_table(
        &self,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<bool> {
        let cmd = self.get_command(ScopeCommandType::ExistsScopeTable, scope_type, connection)?;
        Ok(scalar_is_positive(connection.query_scalar(&cmd)?))
    }

    /// Creates the scope-info table if it does not exist. Returns true if
    /// it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn create_table(
        &self,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<bool> {
        if self.exists_table(scope_type, connection)? {
            return Ok(false);
        }
        let cmd = self.get_command(ScopeCommandType::CreateScopeTable, scope_type, connection)?;
        connection.execute(&cmd)?;
        tracing::info!(table = %self.table_name(scope_type), "scope table created");
        Ok(true)
    }

    /// Drops the scope-info table if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub fn drop_table(
        &self,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<()> {
        if !self.exists_table(scope_type, connection)? {
            return Ok(());
        }
        let cmd = self.get_command(ScopeCommandType::DropScopeTable, scope_type, connection)?;
        connection.execute(&cmd)?;
        Ok(())
    }

    /// Lists every scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or a row cannot be decoded.
    pub fn get_scopes(
        &self,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<Vec<ScopeInfo>> {
        let cmd = self.get_command(ScopeCommandType::GetScopes, scope_type, connection)?;
        connection
            .query(&cmd)?
            .into_iter()
            .map(scope_from_row)
            .collect()
    }

    /// Reads one scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the row cannot be decoded.
    pub fn get_scope(
        &self,
        name: &str,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<Option<ScopeInfo>> {
        let mut cmd = self.get_command(ScopeCommandType::GetScopes, scope_type, connection)?;
        cmd.set_parameter(PARAM_SCOPE_NAME, name)?;
        connection
            .query(&cmd)?
            .into_iter()
            .next()
            .map(scope_from_row)
            .transpose()
    }

    /// Returns true if a scope row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn exists_scope(
        &self,
        name: &str,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<bool> {
        let mut cmd = self.get_command(ScopeCommandType::ExistsScope, scope_type, connection)?;
        cmd.set_parameter(PARAM_SCOPE_NAME, name)?;
        Ok(scalar_is_positive(connection.query_scalar(&cmd)?))
    }

    /// Inserts or updates a scope row.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails or the blobs cannot be encoded.
    pub fn save_scope(
        &self,
        scope: &ScopeInfo,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<()> {
        let command_type = if self.exists_scope(&scope.name, scope_type, connection)? {
            ScopeCommandType::UpdateScope
        } else {
            ScopeCommandType::InsertScope
        };
        let mut cmd = self.get_command(command_type, scope_type, connection)?;
        bind_scope(&mut cmd, scope)?;
        connection.execute(&cmd)?;
        tracing::debug!(scope = %scope.name, ?command_type, "scope saved");
        Ok(())
    }

    /// Deletes a scope row. Returns true if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn delete_scope(
        &self,
        name: &str,
        scope_type: ScopeType,
        connection: &dyn DbConnection,
    ) -> ProviderResult<bool> {
        let mut cmd = self.get_command(ScopeCommandType::DeleteScope, scope_type, connection)?;
        cmd.set_parameter(PARAM_SCOPE_NAME, name)?;
        Ok(connection.execute(&cmd)? > 0)
    }

    /// Reads the provider's logical clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or returns no integer.
    pub fn local_timestamp(&self, connection: &dyn DbConnection) -> ProviderResult<i64> {
        let cmd = self.get_command(
            ScopeCommandType::GetLocalTimestamp,
            ScopeType::Client,
            connection,
        )?;
        connection
            .query_scalar(&cmd)?
            .and_then(|v| v.as_integer())
            .ok_or_else(|| ProviderError::CorruptedScope {
                scope: self.scope_info_table.clone(),
                message: "local timestamp is not an integer".into(),
            })
    }
}

fn with_standard_parameters(mut cmd: DbCommand) -> DbCommand {
    for name in [
        PARAM_SCOPE_NAME,
        PARAM_SCOPE_SCHEMA,
        PARAM_SCOPE_SETUP,
        PARAM_SCOPE_VERSION,
    ] {
        if !cmd.has_parameter(name) {
            cmd = cmd.with_parameter(name);
        }
    }
    cmd
}

fn scalar_is_positive(value: Option<SyncValue>) -> bool {
    value.and_then(|v| v.as_integer()).unwrap_or(0) > 0
}

fn bind_scope(cmd: &mut DbCommand, scope: &ScopeInfo) -> ProviderResult<()> {
    let schema = scope
        .schema
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let setup = scope
        .setup
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    cmd.set_parameter(PARAM_SCOPE_NAME, scope.name.as_str())?;
    cmd.set_parameter(PARAM_SCOPE_SCHEMA, schema)?;
    cmd.set_parameter(PARAM_SCOPE_SETUP, setup)?;
    cmd.set_parameter(PARAM_SCOPE_VERSION, scope.version.as_str())?;
    cmd.set_if_declared(PARAM_SCOPE_ID, scope.id.to_string());
    cmd.set_if_declared(PARAM_LAST_SYNC_TIMESTAMP, scope.last_sync_timestamp);
    cmd.set_if_declared(
        PARAM_LAST_SERVER_SYNC_TIMESTAMP,
        scope.last_server_sync_timestamp,
    );
    cmd.set_if_declared(PARAM_LAST_SYNC_DURATION, scope.last_sync_duration);
    Ok(())
}

fn scope_from_row(row: Vec<SyncValue>) -> ProviderResult<ScopeInfo> {
    let mut cells = row.into_iter();
    let mut next = || cells.next().unwrap_or(SyncValue::Null);

    let name = match next() {
        SyncValue::Text(name) => name,
        other => {
            return Err(ProviderError::CorruptedScope {
                scope: format!("{other:?}"),
                message: "scope name is not text".into(),
            })
        }
    };
    let corrupted = |message: String| ProviderError::CorruptedScope {
        scope: name.clone(),
        message,
    };

    let id = match next() {
        SyncValue::Text(id) => Uuid::parse_str(&id).map_err(|e| corrupted(e.to_string()))?,
        _ => return Err(corrupted("scope id is not text".into())),
    };
    let schema: Option<SyncSet> = match next() {
        SyncValue::Text(json) => Some(serde_json::from_str(&json)?),
        _ => None,
    };
    let setup: Option<SyncSetup> = match next() {
        SyncValue::Text(json) => Some(serde_json::from_str(&json)?),
        _ => None,
    };
    let version = match next() {
        SyncValue::Text(v) => v,
        _ => rowsync_core::SCOPE_VERSION.to_string(),
    };
    let last_sync_timestamp = next().as_integer();
    let last_server_sync_timestamp = next().as_integer();
    let last_sync_duration = next().as_integer();

    Ok(ScopeInfo {
        name,
        id,
        schema,
        setup,
        version,
        last_sync_timestamp,
        last_server_sync_timestamp,
        last_sync_duration,
    })
}
