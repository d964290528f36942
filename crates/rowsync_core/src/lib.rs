//! # RowSync Core
//!
//! Data model, batch model and local serializers for RowSync.
//!
//! This crate provides:
//! - `SyncValue`, `SyncTable`, `SyncSet` and `SyncSetup`
//! - The scope row model (`ScopeInfo`)
//! - Table name parsing and the shared naming contract (`SyncNamed`)
//! - `BatchInfo` / `BatchPartInfo` for changesets split into files
//! - Pluggable local serializers (JSON by default)
//!
//! This crate knows nothing about SQL or HTTP; providers and the engine
//! build on top of it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod batch;
mod error;
mod naming;
mod scope;
mod serializer;
mod set;
mod table;
mod value;

pub use batch::{BatchInfo, BatchPartInfo, BatchPartTableInfo, MANIFEST_FILE_NAME};
pub use error::{CoreError, CoreResult};
pub use naming::{ParsedName, SyncNamed};
pub use scope::{ScopeInfo, SCOPE_VERSION};
pub use serializer::{
    JsonLocalSerializer, JsonSerializerFactory, LocalSerializer, SerializerFactory,
    SerializerRegistry, JSON_SERIALIZER_KEY,
};
pub use set::{SetupTable, SyncSet, SyncSetup};
pub use table::{RowState, SyncColumn, SyncRow, SyncTable};
pub use value::{SyncDataType, SyncValue, NON_FINITE_REAL_KEY};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
