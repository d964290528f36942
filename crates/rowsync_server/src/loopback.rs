//! In-process transport that hands requests straight to a [`SyncServer`].

use crate::server::SyncServer;
use async_trait::async_trait;
use parking_lot::Mutex;
use rowsync_engine::{HttpRequest, HttpResponse, HttpTransport, SyncError, SyncResult};
use std::sync::Arc;

/// Connects a client request handler to a server without a network.
pub struct LoopbackTransport {
    server: Arc<SyncServer>,
    failures: Mutex<Vec<SyncError>>,
}

impl LoopbackTransport {
    /// Creates a transport serving every request with `server`.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self {
            server,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next send with `error` before it reaches the server.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().insert(0, error);
    }

    /// The server behind the transport.
    pub fn server(&self) -> &Arc<SyncServer> {
        &self.server
    }
}

#[async_trait]
impl HttpTransport for LoopbackTransport {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        if let Some(error) = self.failures.lock().pop() {
            return Err(error);
        }
        Ok(self.server.handle(request).await)
    }
}
