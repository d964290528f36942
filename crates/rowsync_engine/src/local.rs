//! Local orchestrator: everything one side does against its own database.
//!
//! The connection sits behind a `parking_lot::Mutex`; database work runs in
//! synchronous helpers that take and release the lock, and batch files are
//! written or read between them, so no guard is ever held across an await.

use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use rowsync_core::{
    BatchInfo, RowState, ScopeInfo, SerializerRegistry, SyncNamed, SyncRow, SyncSet, SyncSetup,
    SyncTable, SyncValue,
};
use rowsync_provider::{
    DbCommand, DbConnection, ProviderError, ProvisionFlags, ScopeBuilder, ScopeType, SyncProvider,
    TableCommand, TableProvisioner, PARAM_MAX_TIMESTAMP, PARAM_MIN_TIMESTAMP, PARAM_SYNC_SCOPE_ID,
    PARAM_TOMBSTONE,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of applying remote rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Rows written.
    pub applied: usize,
    /// Rows that collided with a local change.
    pub conflicts: usize,
    /// Conflicting rows the local side kept.
    pub skipped: usize,
}

impl std::ops::AddAssign for ApplyStats {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.conflicts += other.conflicts;
        self.skipped += other.skipped;
    }
}

/// Runs `f` in a transaction, rolling back on error.
fn in_transaction<T>(
    connection: &dyn DbConnection,
    f: impl FnOnce(&dyn DbConnection) -> SyncResult<T>,
) -> SyncResult<T> {
    connection.begin_transaction()?;
    match f(connection) {
        Ok(value) => {
            connection.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = connection.rollback() {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

fn window_command(
    mut cmd: DbCommand,
    since: i64,
    until: i64,
    exclude: Option<Uuid>,
) -> SyncResult<DbCommand> {
    cmd.set_parameter(PARAM_MIN_TIMESTAMP, since)?;
    cmd.set_parameter(PARAM_MAX_TIMESTAMP, until)?;
    cmd.set_parameter(
        PARAM_SYNC_SCOPE_ID,
        exclude.map_or(SyncValue::Null, |id| SyncValue::Text(id.to_string())),
    )?;
    Ok(cmd)
}

/// Splits a selected row into values, state and last change.
fn change_row(table: &SyncTable, mut raw: Vec<SyncValue>) -> SyncResult<SyncRow> {
    let width = table.columns.len();
    if raw.len() != width + 2 {
        return Err(ProviderError::invalid_schema(
            table.full_name(),
            format!("change row has {} columns, expected {}", raw.len(), width + 2),
        )
        .into());
    }
    let last_change = raw.pop().and_then(|v| v.as_integer());
    let tombstone = raw.pop().and_then(|v| v.as_integer()).unwrap_or(0) != 0;
    let state = if tombstone {
        RowState::Deleted
    } else {
        RowState::Modified
    };
    let mut row = SyncRow::new(state, raw);
    row.last_change = last_change;
    Ok(row)
}

/// Orchestrates provisioning, change selection and change application on
/// one database.
pub struct LocalOrchestrator {
    provider: Arc<dyn SyncProvider>,
    connection: Arc<Mutex<Box<dyn DbConnection>>>,
    scope_builder: ScopeBuilder,
    scope_type: ScopeType,
    options: SyncOptions,
    serializers: SerializerRegistry,
}

impl LocalOrchestrator {
    /// Creates a client-side orchestrator owning `connection`.
    pub fn new(
        provider: Arc<dyn SyncProvider>,
        connection: Box<dyn DbConnection>,
        options: SyncOptions,
    ) -> Self {
        let scope_builder = provider.scope_builder(&options.scope_info_table);
        Self {
            provider,
            connection: Arc::new(Mutex::new(connection)),
            scope_builder,
            scope_type: ScopeType::Client,
            options,
            serializers: SerializerRegistry::new(),
        }
    }

    /// Sets which scope table flavor this side uses.
    pub fn with_scope_type(mut self, scope_type: ScopeType) -> Self {
        self.scope_type = scope_type;
        self
    }

    /// Replaces the serializer registry.
    pub fn with_serializers(mut self, serializers: SerializerRegistry) -> Self {
        self.serializers = serializers;
        self
    }

    /// Options of this side.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Serializer registry.
    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    /// Scope table flavor.
    pub fn scope_type(&self) -> ScopeType {
        self.scope_type
    }

    /// Data source and database of the connection.
    pub fn source(&self) -> (String, String) {
        let conn = self.connection.lock();
        (conn.data_source().to_string(), conn.database().to_string())
    }

    /// Reads the logical clock.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn local_timestamp(&self) -> SyncResult<i64> {
        let conn = self.connection.lock();
        Ok(self.scope_builder.local_timestamp(conn.as_ref())?)
    }

    /// Describes the setup's tables as they exist in this database, keeping
    /// key columns and the columns the setup selects.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidSchema`] for a missing or keyless
    /// table.
    pub fn get_schema(&self, setup: &SyncSetup) -> SyncResult<SyncSet> {
        let conn = self.connection.lock();
        let mut set = SyncSet::new();
        for setup_table in &setup.tables {
            let mut table = self
                .provider
                .describe_table(conn.as_ref(), &setup_table.table_name, &setup_table.schema_name)?
                .ok_or_else(|| {
                    ProviderError::invalid_schema(setup_table.full_name(), "table not found")
                })?;
            let keys = table.primary_keys.clone();
            table.columns.retain(|c| {
                keys.iter().any(|k| k.eq_ignore_ascii_case(&c.name))
                    || setup_table.includes_column(&c.name)
            });
            set.tables.push(table);
        }
        Ok(set)
    }

    /// Creates the objects `flags` selects for every table of `schema`, in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error; nothing is kept.
    pub fn provision(&self, schema: &SyncSet, flags: ProvisionFlags) -> SyncResult<()> {
        let conn = self.connection.lock();
        in_transaction(conn.as_ref(), |c| {
            for table in &schema.tables {
                let builder = self.provider.table_builder(table)?;
                TableProvisioner::new(builder.as_ref(), c).provision(flags)?;
            }
            Ok(())
        })
    }

    /// Drops the objects `flags` selects for every table of `schema`,
    /// last table first.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error; nothing is dropped.
    pub fn deprovision(&self, schema: &SyncSet, flags: ProvisionFlags) -> SyncResult<()> {
        let conn = self.connection.lock();
        in_transaction(conn.as_ref(), |c| {
            for table in schema.tables.iter().rev() {
                let builder = self.provider.table_builder(table)?;
                TableProvisioner::new(builder.as_ref(), c).deprovision(flags)?;
            }
            Ok(())
        })
    }

    /// Deprovisions the tables of a stored scope and deletes the scope row.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ScopeNotProvisioned`] if the scope has no
    /// schema, or a provider error.
    pub fn deprovision_scope(&self, name: &str, flags: ProvisionFlags) -> SyncResult<()> {
        let scope = self
            .get_scope(name)?
            .ok_or_else(|| SyncError::ScopeNotProvisioned(name.to_string()))?;
        let schema = scope
            .schema
            .ok_or_else(|| SyncError::ScopeNotProvisioned(name.to_string()))?;
        self.deprovision(&schema, flags)?;
        let conn = self.connection.lock();
        self.scope_builder
            .delete_scope(name, self.scope_type, conn.as_ref())?;
        tracing::info!(scope = %name, "scope deprovisioned");
        Ok(())
    }

    /// Loads a scope, or creates and saves a new one for `setup`.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn ensure_scope(&self, name: &str, setup: &SyncSetup) -> SyncResult<ScopeInfo> {
        let conn = self.connection.lock();
        self.scope_builder
            .create_table(self.scope_type, conn.as_ref())?;
        if let Some(scope) = self
            .scope_builder
            .get_scope(name, self.scope_type, conn.as_ref())?
        {
            return Ok(scope);
        }
        let mut scope = ScopeInfo::new(name);
        scope.setup = Some(setup.clone());
        self.scope_builder
            .save_scope(&scope, self.scope_type, conn.as_ref())?;
        tracing::info!(scope = %name, id = %scope.id, scope_type = ?self.scope_type, "scope created");
        Ok(scope)
    }

    /// Reads a scope.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn get_scope(&self, name: &str) -> SyncResult<Option<ScopeInfo>> {
        let conn = self.connection.lock();
        if !self.scope_builder.exists_table(self.scope_type, conn.as_ref())? {
            return Ok(None);
        }
        Ok(self
            .scope_builder
            .get_scope(name, self.scope_type, conn.as_ref())?)
    }

    /// Lists every scope.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn get_scopes(&self) -> SyncResult<Vec<ScopeInfo>> {
        let conn = self.connection.lock();
        if !self.scope_builder.exists_table(self.scope_type, conn.as_ref())? {
            return Ok(Vec::new());
        }
        Ok(self
            .scope_builder
            .get_scopes(self.scope_type, conn.as_ref())?)
    }

    /// Saves a scope.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn save_scope(&self, scope: &ScopeInfo) -> SyncResult<()> {
        let conn = self.connection.lock();
        self.scope_builder
            .create_table(self.scope_type, conn.as_ref())?;
        Ok(self
            .scope_builder
            .save_scope(scope, self.scope_type, conn.as_ref())?)
    }

    /// Records a completed exchange on the scope and saves it.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn complete_scope(
        &self,
        scope: &mut ScopeInfo,
        local_timestamp: i64,
        server_timestamp: Option<i64>,
        duration_ms: i64,
    ) -> SyncResult<()> {
        scope.last_sync_timestamp = Some(local_timestamp);
        if server_timestamp.is_some() {
            scope.last_server_sync_timestamp = server_timestamp;
        }
        scope.last_sync_duration = Some(duration_ms);
        self.save_scope(scope)?;
        tracing::debug!(scope = %scope.name, local_timestamp, ?server_timestamp, "scope timestamps written");
        Ok(())
    }

    /// Selects every change after `since` up to now, skipping rows last
    /// written on behalf of `exclude`. Returns the clock value used as the
    /// upper bound and the changed rows per table.
    fn select_changes(
        &self,
        schema: &SyncSet,
        since: i64,
        exclude: Option<Uuid>,
    ) -> SyncResult<(i64, Vec<SyncTable>)> {
        let conn = self.connection.lock();
        let until = self.scope_builder.local_timestamp(conn.as_ref())?;
        let mut tables = Vec::with_capacity(schema.tables.len());
        for table in &schema.tables {
            let builder = self.provider.table_builder(table)?;
            let cmd = window_command(
                builder.command(TableCommand::SelectChanges)?,
                since,
                until,
                exclude,
            )?;
            let mut changes = table.clone_schema();
            for raw in conn.query(&cmd)? {
                changes.push_row(change_row(table, raw)?)?;
            }
            tables.push(changes);
        }
        Ok((until, tables))
    }

    /// Writes local changes into a new batch, one table per part and at
    /// most `batch_size` rows per part. The batch timestamp is the clock
    /// value the selection stopped at.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if `token` fires (partial files are
    /// removed), or a provider or serializer error.
    pub async fn get_changes(
        &self,
        schema: &SyncSet,
        since: i64,
        exclude: Option<Uuid>,
        token: &CancellationToken,
    ) -> SyncResult<BatchInfo> {
        self.get_changes_in_parts(schema, since, exclude, self.options.batch_size, token)
            .await
    }

    /// Like [`LocalOrchestrator::get_changes`] with an explicit part size.
    ///
    /// # Errors
    ///
    /// See [`LocalOrchestrator::get_changes`].
    pub async fn get_changes_in_parts(
        &self,
        schema: &SyncSet,
        since: i64,
        exclude: Option<Uuid>,
        batch_size: usize,
        token: &CancellationToken,
    ) -> SyncResult<BatchInfo> {
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let (timestamp, tables) = self.select_changes(schema, since, exclude)?;

        let factory = self.serializers.get(&self.options.serializer_key)?;
        let mut batch = BatchInfo::new(
            &self.options.batch_directory,
            schema,
            &self.options.serializer_key,
        );
        batch.timestamp = timestamp;

        let mut index = 0;
        for table in tables.into_iter().filter(SyncTable::has_rows) {
            let chunk = match batch_size {
                0 => table.rows.len(),
                n => n,
            };
            for rows in table.rows.chunks(chunk) {
                if token.is_cancelled() {
                    batch.try_remove_directory().await;
                    return Err(SyncError::Cancelled);
                }
                let mut part = table.clone_schema();
                part.rows = rows.to_vec();
                let mut serializer = factory.create_local_serializer();
                batch
                    .save_batch_part_info(index, &part, serializer.as_mut())
                    .await?;
                index += 1;
            }
        }
        batch.ensure_last_batch();
        if !batch.parts().is_empty() {
            batch.save_manifest().await?;
        }

        tracing::info!(
            rows = batch.rows_count(),
            parts = batch.parts().len(),
            since,
            timestamp,
            "changes selected"
        );
        Ok(batch)
    }

    /// Counts local changes after `since`. Returns the clock value used as
    /// the upper bound and the count.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    pub fn estimate_changes(
        &self,
        schema: &SyncSet,
        since: i64,
        exclude: Option<Uuid>,
    ) -> SyncResult<(i64, usize)> {
        let conn = self.connection.lock();
        let until = self.scope_builder.local_timestamp(conn.as_ref())?;
        let mut count = 0;
        for table in &schema.tables {
            let builder = self.provider.table_builder(table)?;
            let cmd = window_command(
                builder.command(TableCommand::CountChanges)?,
                since,
                until,
                exclude,
            )?;
            count += conn
                .query_scalar(&cmd)?
                .and_then(|v| v.as_integer())
                .unwrap_or(0)
                .max(0) as usize;
        }
        Ok((until, count))
    }

    /// Applies every part of `batch`, table by table in schema order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if `token` fires between parts, or
    /// the first failing part's error. Parts applied before the failure
    /// stay applied.
    pub async fn apply_changes(
        &self,
        batch: &BatchInfo,
        sender_scope_id: Uuid,
        since: i64,
        token: &CancellationToken,
    ) -> SyncResult<ApplyStats> {
        let factory = self.serializers.get(&batch.serializer_key)?;
        let mut stats = ApplyStats::default();
        for table in &batch.sanitized_schema.tables {
            for part in batch.batch_parts_info(table) {
                if token.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                let mut serializer = factory.create_local_serializer();
                let loaded = batch
                    .load_batch_part_info(part, table, serializer.as_mut())
                    .await?;
                stats += self.apply_table(&loaded, sender_scope_id, since)?;
            }
        }
        tracing::info!(
            applied = stats.applied,
            conflicts = stats.conflicts,
            skipped = stats.skipped,
            "changes applied"
        );
        Ok(stats)
    }

    /// Applies the rows of one table in one transaction, stamping
    /// `sender_scope_id` on their tracking rows.
    ///
    /// A local row conflicts when it changed after `since` and was not last
    /// written on behalf of the sender; the configured resolution decides
    /// which side is kept.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error; the table is rolled back.
    pub fn apply_table(
        &self,
        table: &SyncTable,
        sender_scope_id: Uuid,
        since: i64,
    ) -> SyncResult<ApplyStats> {
        if !table.has_rows() {
            return Ok(ApplyStats::default());
        }
        let builder = self.provider.table_builder(table)?;
        let mut metadata = builder.command(TableCommand::SelectRowMetadata)?;
        let mut upsert = builder.command(TableCommand::UpsertRow)?;
        let mut delete = builder.command(TableCommand::DeleteRow)?;
        let mut update = builder.command(TableCommand::UpdateMetadata)?;
        update.set_parameter(PARAM_SYNC_SCOPE_ID, sender_scope_id.to_string())?;
        let sender = sender_scope_id.to_string();
        let resolution = self.options.conflict_resolution;

        let conn = self.connection.lock();
        in_transaction(conn.as_ref(), |c| {
            let mut stats = ApplyStats::default();
            for row in &table.rows {
                metadata.bind_row(&row.values);
                let local = c.query(&metadata)?.into_iter().next();
                let local_change = local.and_then(|m| {
                    let scope = m.first().and_then(|v| v.as_text().map(str::to_string));
                    let last = m.get(2).and_then(|v| v.as_integer())?;
                    (last > since && scope.as_deref() != Some(sender.as_str())).then_some(last)
                });

                if let Some(local_last) = local_change {
                    stats.conflicts += 1;
                    if !resolution.remote_wins(row.last_change, local_last) {
                        stats.skipped += 1;
                        continue;
                    }
                }

                let tombstone = row.state.is_tombstone();
                if tombstone {
                    delete.bind_row(&row.values);
                    c.execute(&delete)?;
                } else {
                    upsert.bind_row(&row.values);
                    c.execute(&upsert)?;
                }
                update.bind_row(&row.values);
                update.set_parameter(PARAM_TOMBSTONE, i64::from(tombstone))?;
                c.execute(&update)?;
                stats.applied += 1;
            }
            Ok(stats)
        })
        .inspect(|stats| {
            tracing::debug!(table = %table.full_name(), applied = stats.applied, conflicts = stats.conflicts, "table applied");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::{SetupTable, SyncColumn, SyncDataType};
    use rowsync_provider::sqlite::{SqliteConnection, SqliteSyncProvider};

    const SCHEMA: &str = "CREATE TABLE Orders (Id INTEGER NOT NULL PRIMARY KEY, Customer TEXT, Total REAL); \
                          CREATE TABLE Tags (Name TEXT NOT NULL PRIMARY KEY)";

    fn orchestrator(dir: &std::path::Path, batch_size: usize) -> LocalOrchestrator {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        LocalOrchestrator::new(
            Arc::new(SqliteSyncProvider::new()),
            Box::new(conn),
            SyncOptions::new(dir).with_batch_size(batch_size),
        )
    }

    fn exec(local: &LocalOrchestrator, sql: &str) {
        let conn = local.connection.lock();
        conn.execute(&DbCommand::new("Test", sql)).unwrap();
    }

    fn provisioned(dir: &std::path::Path, batch_size: usize) -> (LocalOrchestrator, SyncSet) {
        let local = orchestrator(dir, batch_size);
        let schema = local.get_schema(&SyncSetup::new(["Orders", "Tags"])).unwrap();
        local.provision(&schema, ProvisionFlags::TRACKING).unwrap();
        (local, schema)
    }

    #[test]
    fn schema_keeps_keys_and_selected_columns() {
        let dir = tempfile::tempdir().unwrap();
        let local = orchestrator(dir.path(), 0);
        let setup = SyncSetup::default()
            .with_table(SetupTable::new("Orders", "").with_columns(["Total"]));
        let schema = local.get_schema(&setup).unwrap();
        let names: Vec<&str> = schema.tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Id", "Total"]);

        let missing = local.get_schema(&SyncSetup::new(["Nope"])).unwrap_err();
        assert!(matches!(
            missing,
            SyncError::Provider(ProviderError::InvalidSchema { .. })
        ));
    }

    #[tokio::test]
    async fn changes_are_split_into_bounded_parts() {
        let dir = tempfile::tempdir().unwrap();
        let (local, schema) = provisioned(dir.path(), 2);
        for id in 1..=5 {
            exec(&local, &format!("INSERT INTO Orders VALUES ({id}, 'c{id}', {id}.0)"));
        }
        exec(&local, "INSERT INTO Tags VALUES ('red')");
        exec(&local, "DELETE FROM Orders WHERE Id = 5");

        let batch = local
            .get_changes(&schema, 0, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch.rows_count(), 6);
        assert_eq!(batch.parts().len(), 4);
        assert_eq!(batch.parts().iter().filter(|p| p.is_last_batch).count(), 1);
        assert!(batch.parts()[3].is_last_batch);
        assert!(batch.timestamp > 0);
        assert!(batch.directory_path().join(rowsync_core::MANIFEST_FILE_NAME).exists());

        let orders = schema.table(&SetupTable::new("Orders", "")).unwrap();
        let mut serializer = rowsync_core::JsonLocalSerializer::new();
        let last = batch
            .load_batch_part_info(&batch.parts()[2], orders, &mut serializer)
            .await
            .unwrap();
        assert_eq!(last.rows.len(), 1);
        assert_eq!(last.rows[0].state, RowState::Deleted);
        assert_eq!(last.rows[0].values[0], SyncValue::Integer(5));
        assert!(last.rows[0].values[1].is_null());
    }

    #[tokio::test]
    async fn empty_selection_has_no_parts_and_advances_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let (local, schema) = provisioned(dir.path(), 0);
        let batch = local
            .get_changes(&schema, 0, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!batch.has_data());
        assert!(batch.parts().is_empty());
        assert!(local.local_timestamp().unwrap() > batch.timestamp);
    }

    #[tokio::test]
    async fn cancelled_selection_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (local, schema) = provisioned(dir.path(), 0);
        let token = CancellationToken::new();
        token.cancel();
        let err = local.get_changes(&schema, 0, None, &token).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    fn orders_row(id: i64, customer: &str, last_change: i64) -> SyncRow {
        SyncRow::new(
            RowState::Modified,
            vec![id.into(), customer.into(), SyncValue::Real(1.0)],
        )
        .with_last_change(last_change)
    }

    fn orders_table() -> SyncTable {
        SyncTable::new("Orders", "")
            .with_column(SyncColumn::new("Id", SyncDataType::Integer).not_null())
            .with_column(SyncColumn::new("Customer", SyncDataType::Text))
            .with_column(SyncColumn::new("Total", SyncDataType::Real))
            .with_primary_key(["Id"])
    }

    #[tokio::test]
    async fn applied_rows_are_stamped_and_not_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let (local, schema) = provisioned(dir.path(), 0);
        let remote = Uuid::new_v4();

        let mut table = orders_table();
        table.push_row(orders_row(1, "ada", 10)).unwrap();
        let mut gone = orders_row(2, "", 10);
        gone.state = RowState::Deleted;
        table.push_row(gone).unwrap();

        let stats = local.apply_table(&table, remote, 0).unwrap();
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.conflicts, 0);

        let token = CancellationToken::new();
        let echo = local.get_changes(&schema, 0, Some(remote), &token).await.unwrap();
        assert_eq!(echo.rows_count(), 0);
        let all = local.get_changes(&schema, 0, None, &token).await.unwrap();
        assert_eq!(all.rows_count(), 2);
        let (_, count) = local.estimate_changes(&schema, 0, Some(Uuid::new_v4())).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn last_writer_wins_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (local, _) = provisioned(dir.path(), 0);
        exec(&local, "INSERT INTO Orders VALUES (1, 'local', 1.0)");
        let local_last = local.local_timestamp().unwrap();

        let mut older = orders_table();
        older.push_row(orders_row(1, "remote-old", 1)).unwrap();
        let stats = local.apply_table(&older, Uuid::new_v4(), 0).unwrap();
        assert_eq!(stats, ApplyStats { applied: 0, conflicts: 1, skipped: 1 });

        let mut newer = orders_table();
        newer
            .push_row(orders_row(1, "remote-new", local_last + 1_000_000))
            .unwrap();
        let stats = local.apply_table(&newer, Uuid::new_v4(), 0).unwrap();
        assert_eq!(stats, ApplyStats { applied: 1, conflicts: 1, skipped: 0 });

        let conn = local.connection.lock();
        let name = conn
            .query_scalar(&DbCommand::new("Read", "SELECT Customer FROM Orders WHERE Id = 1"))
            .unwrap();
        assert_eq!(name, Some(SyncValue::Text("remote-new".into())));
    }

    #[test]
    fn rows_older_than_the_window_are_not_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (local, _) = provisioned(dir.path(), 0);
        exec(&local, "INSERT INTO Orders VALUES (1, 'local', 1.0)");
        let since = local.local_timestamp().unwrap();

        let mut table = orders_table();
        table.push_row(orders_row(1, "remote", 1)).unwrap();
        let stats = local.apply_table(&table, Uuid::new_v4(), since).unwrap();
        assert_eq!(stats, ApplyStats { applied: 1, conflicts: 0, skipped: 0 });
    }

    #[test]
    fn scopes_are_created_once_and_deprovisioned() {
        let dir = tempfile::tempdir().unwrap();
        let (local, schema) = provisioned(dir.path(), 0);
        let setup = SyncSetup::new(["Orders", "Tags"]);

        let mut scope = local.ensure_scope("default", &setup).unwrap();
        let again = local.ensure_scope("default", &setup).unwrap();
        assert_eq!(scope.id, again.id);
        assert!(scope.is_new());

        scope.schema = Some(schema);
        local.complete_scope(&mut scope, 42, Some(7), 15).unwrap();
        let stored = local.get_scope("default").unwrap().unwrap();
        assert_eq!(stored.last_sync_timestamp, Some(42));
        assert_eq!(stored.last_server_sync_timestamp, Some(7));
        assert_eq!(local.get_scopes().unwrap().len(), 1);

        local
            .deprovision_scope("default", ProvisionFlags::TRACKING)
            .unwrap();
        assert!(local.get_scope("default").unwrap().is_none());
        assert!(matches!(
            local.deprovision_scope("default", ProvisionFlags::TRACKING),
            Err(SyncError::ScopeNotProvisioned(_))
        ));
    }
}
