//! Cookie-keyed sessions holding the batches of an ongoing conversation.

use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use rowsync_core::BatchInfo;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "rowsync_session";

/// An upload in progress.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Parts written so far.
    pub batch: BatchInfo,
    /// Index of the next part expected from the client.
    pub expected: usize,
}

impl Upload {
    /// An upload that has received nothing yet.
    pub fn new(batch: BatchInfo) -> Self {
        Self { batch, expected: 0 }
    }
}

/// Server-side state of one client conversation.
#[derive(Debug)]
struct Session {
    /// Parts received so far, applied on the last one.
    upload: Option<Upload>,
    /// Server changes waiting to be fetched part by part.
    download: Option<BatchInfo>,
    last_seen: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            upload: None,
            download: None,
            last_seen: Instant::now(),
        }
    }

    fn into_batches(self) -> impl Iterator<Item = BatchInfo> {
        self.upload.map(|u| u.batch).into_iter().chain(self.download)
    }
}

/// A request's session.
#[derive(Debug)]
pub struct Resolved {
    /// Session id.
    pub id: String,
    /// Whether the id was just issued; the response must set the cookie.
    pub issued: bool,
    /// Batches of sessions that went idle for too long. Their directories
    /// are the caller's to remove.
    pub expired: Vec<BatchInfo>,
}

/// Session table.
///
/// Batches are moved in and out under the lock and never borrowed across
/// file I/O. A session untouched for longer than the idle timeout is
/// dropped the next time any request is resolved.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    max_sessions: usize,
    ttl: Duration,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            ttl,
        }
    }

    /// Resolves the session of a request from its `Cookie` header.
    ///
    /// A cookie naming an unknown session, for instance after a restart or
    /// an expiry, reopens that session empty.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::TooManySessions`] when a new session would
    /// exceed the limit.
    pub fn resolve(&self, cookie_header: Option<&str>) -> ServerResult<Resolved> {
        let (id, issued) = match cookie_header.and_then(parse_cookie) {
            Some(id) => (id.to_string(), false),
            None => (Uuid::new_v4().simple().to_string(), true),
        };
        let now = Instant::now();
        let mut sessions = self.sessions.lock();

        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_seen) > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        let mut expired = Vec::new();
        for stale_id in stale {
            if let Some(session) = sessions.remove(&stale_id) {
                tracing::debug!(session = %stale_id, "idle session expired");
                expired.extend(session.into_batches());
            }
        }

        match sessions.get_mut(&id) {
            Some(session) => session.last_seen = now,
            None => {
                if sessions.len() >= self.max_sessions {
                    return Err(ServerError::TooManySessions(self.max_sessions));
                }
                sessions.insert(id.clone(), Session::new());
                tracing::debug!(session = %id, issued, "session opened");
            }
        }
        Ok(Resolved {
            id,
            issued,
            expired,
        })
    }

    /// Takes the upload out of a session.
    pub fn take_upload(&self, id: &str) -> Option<Upload> {
        self.sessions.lock().get_mut(id)?.upload.take()
    }

    /// Stores the upload of a session.
    pub fn put_upload(&self, id: &str, upload: Upload) {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.upload = Some(upload);
        }
    }

    /// Replaces the download batch; returns the previous one.
    pub fn put_download(&self, id: &str, batch: Option<BatchInfo>) -> Option<BatchInfo> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(id)?;
        std::mem::replace(&mut session.download, batch)
    }

    /// A copy of the download batch description.
    pub fn download(&self, id: &str) -> Option<BatchInfo> {
        self.sessions.lock().get(id)?.download.clone()
    }

    /// Closes a session, returning its pending batches.
    pub fn close(&self, id: &str) -> Vec<BatchInfo> {
        let session = self.sessions.lock().remove(id);
        tracing::debug!(session = %id, "session closed");
        session
            .map(|s| s.into_batches().collect())
            .unwrap_or_default()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns true if no session is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The session id in a `Cookie` header.
pub fn parse_cookie(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
    })
}

/// The `Set-Cookie` value issuing a session.
pub fn set_cookie(id: &str) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly")
}
