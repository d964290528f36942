//! Full client/server cycles over the loopback transport.

use rowsync_core::{SyncSetup, SyncValue};
use rowsync_engine::{
    HttpOptions, HttpTransport, LocalOrchestrator, RetryConfig, SyncAgent, SyncError, SyncOptions,
    SyncState, WebRemoteOrchestrator,
};
use rowsync_protocol::SyncContext;
use rowsync_provider::sqlite::{SqliteConnection, SqliteSyncProvider};
use rowsync_provider::{DbCommand, DbConnection};
use rowsync_server::{LoopbackTransport, ServerConfig, SyncServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SERVER_SCHEMA: &str = "\
    CREATE TABLE Orders (Id INTEGER NOT NULL PRIMARY KEY, Customer TEXT, Total REAL); \
    CREATE TABLE Tags (Name TEXT NOT NULL PRIMARY KEY); \
    INSERT INTO Orders VALUES (1, 'ada', 10.0), (2, 'grace', 20.0), (3, 'linus', 30.0); \
    INSERT INTO Tags VALUES ('red'), ('blue');";

struct Fixture {
    dir: tempfile::TempDir,
    transport: Arc<LoopbackTransport>,
}

impl Fixture {
    fn new(server_batch_size: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteConnection::open(dir.path().join("server.db")).unwrap();
        conn.execute_batch(SERVER_SCHEMA).unwrap();
        let server = SyncServer::new(
            ServerConfig::new(dir.path().join("server-batches")).with_batch_size(server_batch_size),
            Arc::new(SqliteSyncProvider::new()),
            Box::new(conn),
            SyncSetup::new(["Orders", "Tags"]),
        );
        Self {
            dir,
            transport: Arc::new(LoopbackTransport::new(Arc::new(server))),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn agent(&self, name: &str, batch_size: usize) -> SyncAgent {
        let conn = SqliteConnection::open(self.path(&format!("{name}.db"))).unwrap();
        let local = LocalOrchestrator::new(
            Arc::new(SqliteSyncProvider::new()),
            Box::new(conn),
            SyncOptions::new(self.path(&format!("{name}-batches"))).with_batch_size(batch_size),
        );
        let remote = WebRemoteOrchestrator::new(
            HttpOptions::new("http://loopback/sync").with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            ),
            Arc::clone(&self.transport) as Arc<dyn HttpTransport>,
        )
        .with_batch_size(batch_size);
        SyncAgent::new(local, remote, "default", SyncSetup::new(["Orders", "Tags"]))
    }

    fn db(&self, name: &str) -> SqliteConnection {
        SqliteConnection::open(self.path(&format!("{name}.db"))).unwrap()
    }
}

fn exec(conn: &SqliteConnection, sql: &str) {
    conn.execute(&DbCommand::new("Test", sql)).unwrap();
}

fn scalar(conn: &SqliteConnection, sql: &str) -> SyncValue {
    conn.query_scalar(&DbCommand::new("Test", sql))
        .unwrap()
        .unwrap_or(SyncValue::Null)
}

fn count(conn: &SqliteConnection, table: &str) -> i64 {
    scalar(conn, &format!("SELECT COUNT(*) FROM {table}"))
        .as_integer()
        .unwrap()
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).map_or(true, |mut d| d.next().is_none())
}

#[tokio::test]
async fn first_sync_provisions_the_client_and_downloads_everything() {
    let fx = Fixture::new(0);
    let agent = fx.agent("client", 2);

    let summary = agent.sync().await.unwrap();
    assert_eq!(agent.state(), SyncState::Synced);
    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.downloaded, 5);
    assert_eq!(summary.applied.applied, 5);

    let client = fx.db("client");
    assert_eq!(count(&client, "Orders"), 3);
    assert_eq!(count(&client, "Tags"), 2);
    assert_eq!(
        scalar(&client, "SELECT Customer FROM Orders WHERE Id = 2"),
        SyncValue::Text("grace".into())
    );

    let scope = agent.local().get_scope("default").unwrap().unwrap();
    assert!(!scope.is_new());
    assert_eq!(scope.last_server_sync_timestamp, Some(summary.server_timestamp));

    // Parts of two rows: the download needed more than one round trip, and
    // the session was closed at the end.
    assert_eq!(fx.transport.server().session_count(), 0);
    assert!(dir_is_empty(&fx.path("client-batches")));
    assert!(dir_is_empty(&fx.path("server-batches")));
}

#[tokio::test]
async fn changes_flow_both_ways_without_echo() {
    let fx = Fixture::new(0);
    let agent = fx.agent("client", 0);
    agent.sync().await.unwrap();

    let client = fx.db("client");
    let server = fx.db("server");
    exec(&client, "INSERT INTO Tags VALUES ('green')");
    exec(&client, "DELETE FROM Orders WHERE Id = 3");

    let summary = agent.sync().await.unwrap();
    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.applied_on_server, 2);
    assert_eq!(summary.downloaded, 0);
    assert_eq!(count(&server, "Tags"), 3);
    assert_eq!(count(&server, "Orders"), 2);

    // Nothing changed since: a third cycle moves no rows.
    let summary = agent.sync().await.unwrap();
    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.downloaded, 0);

    exec(&server, "UPDATE Orders SET Total = 99.5 WHERE Id = 1");
    let summary = agent.sync().await.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(
        scalar(&client, "SELECT Total FROM Orders WHERE Id = 1"),
        SyncValue::Real(99.5)
    );
    assert_eq!(agent.stats().cycles_completed, 4);
}

#[tokio::test]
async fn second_client_receives_the_first_clients_changes() {
    let fx = Fixture::new(1);
    let alice = fx.agent("alice", 0);
    let bob = fx.agent("bob", 0);
    alice.sync().await.unwrap();
    bob.sync().await.unwrap();

    exec(&fx.db("alice"), "INSERT INTO Orders VALUES (4, 'alice', 1.0)");
    alice.sync().await.unwrap();

    let summary = bob.sync().await.unwrap();
    assert_eq!(summary.downloaded, 1);
    assert_eq!(
        scalar(&fx.db("bob"), "SELECT Customer FROM Orders WHERE Id = 4"),
        SyncValue::Text("alice".into())
    );
}

#[tokio::test]
async fn newer_client_write_wins_the_server_conflict() {
    let fx = Fixture::new(0);
    let agent = fx.agent("client", 0);
    agent.sync().await.unwrap();

    exec(&fx.db("server"), "UPDATE Orders SET Customer = 'server' WHERE Id = 1");
    exec(&fx.db("client"), "UPDATE Orders SET Customer = 'client' WHERE Id = 1");

    let summary = agent.sync().await.unwrap();
    assert_eq!(summary.server_conflicts, 1);
    assert_eq!(summary.downloaded, 0);
    for db in ["server", "client"] {
        assert_eq!(
            scalar(&fx.db(db), "SELECT Customer FROM Orders WHERE Id = 1"),
            SyncValue::Text("client".into())
        );
    }
}

#[tokio::test]
async fn transient_transport_failures_are_retried() {
    let fx = Fixture::new(0);
    let agent = fx.agent("client", 0);
    fx.transport
        .fail_next(SyncError::transport_retryable("connection reset"));

    agent.sync().await.unwrap();
    assert_eq!(agent.stats().retries, 1);
    assert_eq!(count(&fx.db("client"), "Tags"), 2);
}

#[tokio::test]
async fn download_only_and_estimate_steps() {
    let fx = Fixture::new(2);
    let agent = fx.agent("client", 0);
    let remote = agent.remote();
    let token = CancellationToken::new();
    let context = SyncContext::new("default", Uuid::new_v4());

    let scope = remote.ensure_scope(&context, None, &token).await.unwrap();
    assert_eq!(scope.schema.tables.len(), 2);

    let estimate = remote.estimate_changes(&context, None, &token).await.unwrap();
    assert_eq!(estimate.count, 5);

    let first = remote.get_changes(&context, None, &token).await.unwrap();
    let summary = first.batch.clone().unwrap();
    assert_eq!(summary.rows_count, 5);
    assert_eq!(summary.parts_count, 3);

    let batch = remote
        .download_changes(
            &context,
            first,
            &scope.schema,
            &fx.path("download"),
            "json",
            &token,
        )
        .await
        .unwrap();
    assert_eq!(batch.rows_count(), 5);
    assert_eq!(fx.transport.server().session_count(), 0);

    let nothing_new = remote
        .estimate_changes(&context, Some(estimate.server_timestamp), &token)
        .await
        .unwrap();
    assert_eq!(nothing_new.count, 0);
}
