//! Change tracking and scope bookkeeping against real SQLite databases.

use rowsync_core::{ScopeInfo, SyncColumn, SyncDataType, SyncSetup, SyncTable, SyncValue};
use rowsync_provider::sqlite::{SqliteConnection, SqliteSyncProvider};
use rowsync_provider::{
    CommandCache, DbConnection, DbTableBuilder, ProviderError, ProvisionFlags, ScopeCommandType,
    ScopeType, SyncProvider, TableCommand, TableProvisioner, TriggerKind, PARAM_MAX_TIMESTAMP,
    PARAM_MIN_TIMESTAMP, PARAM_SYNC_SCOPE_ID, PARAM_TOMBSTONE,
};
use std::sync::Arc;

fn orders() -> SyncTable {
    SyncTable::new("Orders", "")
        .with_column(SyncColumn::new("Id", SyncDataType::Integer).not_null())
        .with_column(SyncColumn::new("Customer", SyncDataType::Text))
        .with_column(SyncColumn::new("Total", SyncDataType::Real))
        .with_primary_key(["Id"])
}

fn tags() -> SyncTable {
    SyncTable::new("Tags", "")
        .with_column(SyncColumn::new("Name", SyncDataType::Text).not_null())
        .with_primary_key(["Name"])
}

fn provisioned(table: &SyncTable) -> (SqliteConnection, Box<dyn DbTableBuilder>) {
    let conn = SqliteConnection::open_in_memory().unwrap();
    let builder = SqliteSyncProvider::new().table_builder(table).unwrap();
    TableProvisioner::new(builder.as_ref(), &conn)
        .provision(ProvisionFlags::ALL)
        .unwrap();
    (conn, builder)
}

/// (tombstone, last_change, update_scope_id) of a tracking row.
fn tracking(conn: &SqliteConnection, table: &str, key: &str) -> Option<(i64, i64, Option<String>)> {
    let sql = format!(
        "SELECT sync_row_is_tombstone, last_change_datetime, update_scope_id \
         FROM [{table}_tracking] WHERE {key}"
    );
    conn.raw()
        .unwrap()
        .query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .ok()
}

fn tracking_count(conn: &SqliteConnection, table: &str) -> i64 {
    conn.raw()
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM [{table}_tracking]"), [], |r| {
            r.get(0)
        })
        .unwrap()
}

#[test]
fn delete_then_reinsert_clears_the_tombstone() {
    let (conn, _) = provisioned(&orders());

    conn.execute_batch("INSERT INTO Orders VALUES (42, 'ada', 10.0)")
        .unwrap();
    let (tomb, inserted_at, scope) = tracking(&conn, "Orders", "Id = 42").unwrap();
    assert_eq!(tomb, 0);
    assert!(scope.is_none());

    conn.execute_batch("DELETE FROM Orders WHERE Id = 42").unwrap();
    let (tomb, deleted_at, _) = tracking(&conn, "Orders", "Id = 42").unwrap();
    assert_eq!(tomb, 1);
    assert!(deleted_at > inserted_at);

    conn.execute_batch("INSERT INTO Orders VALUES (42, 'ada', 12.0)")
        .unwrap();
    let (tomb, reinserted_at, _) = tracking(&conn, "Orders", "Id = 42").unwrap();
    assert_eq!(tomb, 0);
    assert!(reinserted_at > deleted_at);
    assert_eq!(tracking_count(&conn, "Orders"), 1);
}

#[test]
fn noop_updates_do_not_touch_the_tracking_row() {
    let (conn, _) = provisioned(&orders());
    conn.execute_batch("INSERT INTO Orders VALUES (1, NULL, 5.0)")
        .unwrap();
    let (_, before, _) = tracking(&conn, "Orders", "Id = 1").unwrap();

    conn.execute_batch("UPDATE Orders SET Customer = NULL, Total = 5.0 WHERE Id = 1")
        .unwrap();
    let (_, after_noop, _) = tracking(&conn, "Orders", "Id = 1").unwrap();
    assert_eq!(before, after_noop);

    conn.execute_batch("UPDATE Orders SET Customer = 'bob' WHERE Id = 1")
        .unwrap();
    let (_, after_change, _) = tracking(&conn, "Orders", "Id = 1").unwrap();
    assert!(after_change > before);

    conn.execute_batch("UPDATE Orders SET Customer = NULL WHERE Id = 1")
        .unwrap();
    let (_, after_null, _) = tracking(&conn, "Orders", "Id = 1").unwrap();
    assert!(after_null > after_change);
}

#[test]
fn key_only_tables_always_mirror_updates() {
    let (conn, _) = provisioned(&tags());
    conn.execute_batch("INSERT INTO Tags VALUES ('red')").unwrap();
    let (_, before, _) = tracking(&conn, "Tags", "Name = 'red'").unwrap();

    conn.execute_batch("UPDATE Tags SET Name = Name WHERE Name = 'red'")
        .unwrap();
    let (_, after, _) = tracking(&conn, "Tags", "Name = 'red'").unwrap();
    assert!(after > before);
}

#[test]
fn composite_keys_are_matched_in_full() {
    let lines = SyncTable::new("Lines", "")
        .with_column(SyncColumn::new("OrderId", SyncDataType::Integer).not_null())
        .with_column(SyncColumn::new("LineNo", SyncDataType::Integer).not_null())
        .with_column(SyncColumn::new("Qty", SyncDataType::Integer))
        .with_primary_key(["OrderId", "LineNo"]);
    let (conn, _) = provisioned(&lines);

    conn.execute_batch(
        "INSERT INTO Lines VALUES (1, 1, 3); INSERT INTO Lines VALUES (1, 2, 4); \
         DELETE FROM Lines WHERE OrderId = 1 AND LineNo = 2",
    )
    .unwrap();
    assert_eq!(tracking_count(&conn, "Lines"), 2);
    let (first, _, _) = tracking(&conn, "Lines", "OrderId = 1 AND LineNo = 1").unwrap();
    let (second, _, _) = tracking(&conn, "Lines", "OrderId = 1 AND LineNo = 2").unwrap();
    assert_eq!((first, second), (0, 1));
}

#[test]
fn provisioning_is_idempotent() {
    let (conn, builder) = provisioned(&orders());
    let provisioner = TableProvisioner::new(builder.as_ref(), &conn);

    assert!(!provisioner.create_tracking_table().unwrap());
    assert!(!provisioner.create_trigger(TriggerKind::Update).unwrap());
    provisioner.provision(ProvisionFlags::ALL).unwrap();

    provisioner.deprovision(ProvisionFlags::TRACKING).unwrap();
    assert!(!provisioner.tracking_table_exists().unwrap());
    for kind in TriggerKind::ALL {
        assert!(!provisioner.trigger_exists(kind).unwrap());
        assert!(!provisioner.drop_trigger(kind).unwrap());
    }
    provisioner.deprovision(ProvisionFlags::TRACKING).unwrap();
    assert!(provisioner.table_exists().unwrap());
}

#[test]
fn rows_present_before_provisioning_are_tracked() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE Orders (Id INTEGER NOT NULL PRIMARY KEY, Customer TEXT, Total REAL); \
         INSERT INTO Orders VALUES (1, 'ada', 1.0); \
         INSERT INTO Orders VALUES (2, 'bob', 2.0)",
    )
    .unwrap();
    let builder = SqliteSyncProvider::new().table_builder(&orders()).unwrap();
    let provisioner = TableProvisioner::new(builder.as_ref(), &conn);

    assert!(provisioner.create_tracking_table().unwrap());
    assert_eq!(tracking_count(&conn, "Orders"), 2);
    let (tomb, last, scope) = tracking(&conn, "Orders", "Id = 2").unwrap();
    assert_eq!(tomb, 0);
    assert!(last > 0);
    assert!(scope.is_none());

    assert!(!provisioner.create_tracking_table().unwrap());
    assert_eq!(tracking_count(&conn, "Orders"), 2);
}

#[test]
fn change_selection_excludes_the_remote_scope() {
    let (conn, builder) = provisioned(&orders());
    conn.execute_batch("INSERT INTO Orders VALUES (1, 'a', 1.0); INSERT INTO Orders VALUES (2, 'b', 2.0)")
        .unwrap();

    // Row 2 arrives from a remote scope: apply then stamp.
    let remote = "9f0c7e4e-0000-4000-8000-000000000001";
    let mut upsert = builder.command(TableCommand::UpsertRow).unwrap();
    upsert.bind_row(&[SyncValue::Integer(2), SyncValue::Text("remote".into()), SyncValue::Real(9.0)]);
    conn.execute(&upsert).unwrap();
    let mut stamp = builder.command(TableCommand::UpdateMetadata).unwrap();
    stamp.bind_row(&[SyncValue::Integer(2)]);
    stamp.set_parameter(PARAM_SYNC_SCOPE_ID, remote).unwrap();
    stamp.set_parameter(PARAM_TOMBSTONE, 0).unwrap();
    conn.execute(&stamp).unwrap();

    conn.execute_batch("DELETE FROM Orders WHERE Id = 1").unwrap();

    let mut select = builder.command(TableCommand::SelectChanges).unwrap();
    select.set_parameter(PARAM_MIN_TIMESTAMP, 0).unwrap();
    select.set_parameter(PARAM_MAX_TIMESTAMP, i64::MAX).unwrap();
    select.set_parameter(PARAM_SYNC_SCOPE_ID, remote).unwrap();
    let rows = conn.query(&select).unwrap();
    assert_eq!(rows.len(), 1);
    // Tombstones keep their key and lose their values.
    assert_eq!(rows[0][0], SyncValue::Integer(1));
    assert_eq!(rows[0][1], SyncValue::Null);
    assert_eq!(rows[0][3], SyncValue::Integer(1));

    select.set_parameter(PARAM_SYNC_SCOPE_ID, SyncValue::Null).unwrap();
    let all = conn.query(&select).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0][1], SyncValue::Text("remote".into()));

    let mut count = builder.command(TableCommand::CountChanges).unwrap();
    count.set_parameter(PARAM_MIN_TIMESTAMP, 0).unwrap();
    count.set_parameter(PARAM_MAX_TIMESTAMP, i64::MAX).unwrap();
    count.set_parameter(PARAM_SYNC_SCOPE_ID, remote).unwrap();
    assert_eq!(conn.query_scalar(&count).unwrap(), Some(SyncValue::Integer(1)));
}

#[test]
fn upsert_updates_existing_rows_and_metadata_reads_back() {
    let (conn, builder) = provisioned(&orders());
    let mut upsert = builder.command(TableCommand::UpsertRow).unwrap();
    upsert.bind_row(&[SyncValue::Integer(7), SyncValue::Text("x".into()), SyncValue::Real(1.0)]);
    conn.execute(&upsert).unwrap();
    upsert.bind_row(&[SyncValue::Integer(7), SyncValue::Text("y".into()), SyncValue::Real(2.0)]);
    conn.execute(&upsert).unwrap();

    let customer: String = conn
        .raw()
        .unwrap()
        .query_row("SELECT Customer FROM Orders WHERE Id = 7", [], |r| r.get(0))
        .unwrap();
    assert_eq!(customer, "y");

    let mut metadata = builder.command(TableCommand::SelectRowMetadata).unwrap();
    metadata.bind_row(&[SyncValue::Integer(7)]);
    let rows = conn.query(&metadata).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], SyncValue::Null);
    assert_eq!(rows[0][1], SyncValue::Integer(0));

    let mut delete = builder.command(TableCommand::DeleteRow).unwrap();
    delete.bind_row(&[SyncValue::Integer(7)]);
    assert_eq!(conn.execute(&delete).unwrap(), 1);
    let (tomb, _, _) = tracking(&conn, "Orders", "Id = 7").unwrap();
    assert_eq!(tomb, 1);
}

#[test]
fn scope_rows_roundtrip() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    let provider = SqliteSyncProvider::new();
    let scopes = provider
        .scope_builder("scope_info")
        .with_cache(Arc::new(CommandCache::new()));

    assert!(scopes.create_table(ScopeType::Client, &conn).unwrap());
    assert!(!scopes.create_table(ScopeType::Client, &conn).unwrap());
    assert!(!scopes.exists_table(ScopeType::Server, &conn).unwrap());

    let mut scope = ScopeInfo::new("default");
    scope.setup = Some(SyncSetup::new(["Orders"]));
    scope.schema = Some(rowsync_core::SyncSet::new().with_table(orders()));
    scopes.save_scope(&scope, ScopeType::Client, &conn).unwrap();
    assert!(scopes.exists_scope("default", ScopeType::Client, &conn).unwrap());

    scope.last_sync_timestamp = Some(100);
    scope.last_sync_duration = Some(12);
    scopes.save_scope(&scope, ScopeType::Client, &conn).unwrap();

    let loaded = scopes
        .get_scope("default", ScopeType::Client, &conn)
        .unwrap()
        .unwrap();
    assert_eq!(loaded, scope);
    assert_eq!(scopes.get_scopes(ScopeType::Client, &conn).unwrap().len(), 1);

    assert!(scopes.delete_scope("default", ScopeType::Client, &conn).unwrap());
    assert!(scopes
        .get_scope("default", ScopeType::Client, &conn)
        .unwrap()
        .is_none());

    let a = scopes.local_timestamp(&conn).unwrap();
    let b = scopes.local_timestamp(&conn).unwrap();
    assert!(b > a);

    scopes.drop_table(ScopeType::Client, &conn).unwrap();
    assert!(!scopes.exists_table(ScopeType::Client, &conn).unwrap());
}

#[test]
fn scope_commands_are_cached_per_scope_type() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    let cache = Arc::new(CommandCache::new());
    let scopes = SqliteSyncProvider::new()
        .scope_builder("scope_info")
        .with_cache(Arc::clone(&cache));

    scopes.create_table(ScopeType::Server, &conn).unwrap();
    let cached = cache.len();
    scopes.create_table(ScopeType::Server, &conn).unwrap();
    assert_eq!(cache.len(), cached);

    let server = scopes
        .get_command(ScopeCommandType::DropScopeTable, ScopeType::Server, &conn)
        .unwrap();
    assert_eq!(server.text, "DROP TABLE IF EXISTS [scope_info_server]");
}

#[test]
fn closed_connection_is_rejected_by_the_scope_builder() {
    let mut conn = SqliteConnection::open_in_memory().unwrap();
    conn.close().unwrap();
    let scopes = SqliteSyncProvider::new().scope_builder("scope_info");
    assert!(matches!(
        scopes.exists_table(ScopeType::Client, &conn),
        Err(ProviderError::ConnectionClosed)
    ));
}
