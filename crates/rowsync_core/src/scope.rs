//! Scope bookkeeping persisted in the scope-info table.

use crate::set::{SyncSet, SyncSetup};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version string written into new scope rows.
pub const SCOPE_VERSION: &str = "1";

/// One row of the scope-info table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Scope name (primary key).
    pub name: String,
    /// Identifier of this side for the scope; stamped into the peer's
    /// tracking rows as `update_scope_id`.
    pub id: Uuid,
    /// Schema snapshot.
    pub schema: Option<SyncSet>,
    /// Table allow-list.
    pub setup: Option<SyncSetup>,
    /// Protocol version.
    pub version: String,
    /// Local logical timestamp of the last successful exchange.
    pub last_sync_timestamp: Option<i64>,
    /// Remote logical timestamp of the last successful exchange.
    pub last_server_sync_timestamp: Option<i64>,
    /// Duration of the last exchange, in milliseconds.
    pub last_sync_duration: Option<i64>,
}

impl ScopeInfo {
    /// Creates a scope that has never been synchronized.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            schema: None,
            setup: None,
            version: SCOPE_VERSION.to_string(),
            last_sync_timestamp: None,
            last_server_sync_timestamp: None,
            last_sync_duration: None,
        }
    }

    /// Returns true if the scope never completed an exchange.
    pub fn is_new(&self) -> bool {
        self.last_sync_timestamp.is_none()
    }

    /// Lower bound for "changes since": 0 for a new scope.
    pub fn changes_since(&self) -> i64 {
        self.last_sync_timestamp.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_scope_defaults() {
        let scope = ScopeInfo::new("default");
        assert!(scope.is_new());
        assert_eq!(scope.changes_since(), 0);
        assert_eq!(scope.version, SCOPE_VERSION);
    }

    #[test]
    fn scope_json_roundtrip() {
        let mut scope = ScopeInfo::new("default");
        scope.setup = Some(SyncSetup::new(["Orders"]));
        scope.last_sync_timestamp = Some(42);
        let json = serde_json::to_string(&scope).unwrap();
        let back: ScopeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);
    }
}
