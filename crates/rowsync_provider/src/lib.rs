//! # RowSync Provider
//!
//! The SQL side of RowSync: change-tracking tables and triggers, the scope
//! command vocabulary, and the dialect seam.
//!
//! - [`TableCommand`] / [`DbTableBuilder`]: per-table DDL and DML
//! - [`MirrorTemplate`]: the shared shape of the three tracking triggers
//! - [`ScopeBuilder`]: scope-info commands, cached process-wide
//! - [`SyncProvider`] / [`ProviderRegistry`]: dialects by id
//! - [`sqlite`]: the reference dialect
//!
//! Builders borrow connections; they never open, close or commit them.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod cache;
mod command;
mod error;
mod provider;
mod provision;
mod scope;
pub mod sqlite;
mod table;
mod trigger;

pub use cache::{CacheKey, CommandCache};
pub use command::{column_parameter, DbCommand, DbConnection, DbParameter};
pub use error::{ProviderError, ProviderResult};
pub use provider::{ProviderRegistry, SyncProvider};
pub use provision::{ProvisionFlags, TableProvisioner};
pub use scope::{
    ScopeBuilder, ScopeCommandType, ScopeHandler, ScopeHandlers, ScopeType, PARAM_LAST_SERVER_SYNC_TIMESTAMP,
    PARAM_LAST_SYNC_DURATION, PARAM_LAST_SYNC_TIMESTAMP, PARAM_SCOPE_ID, PARAM_SCOPE_NAME,
    PARAM_SCOPE_SCHEMA, PARAM_SCOPE_SETUP, PARAM_SCOPE_VERSION, SCOPE_COLUMNS,
};
pub use table::{
    DbTableBuilder, TableCommand, TableNames, COLUMN_LAST_CHANGE, COLUMN_TOMBSTONE,
    COLUMN_UPDATE_SCOPE_ID, PARAM_MAX_TIMESTAMP, PARAM_MIN_TIMESTAMP, PARAM_SYNC_SCOPE_ID,
    PARAM_TOMBSTONE,
};
pub use trigger::{MirrorTemplate, PseudoTable, TriggerKind};

/// Default name of the scope-info table.
pub const DEFAULT_SCOPE_INFO_TABLE: &str = "scope_info";
