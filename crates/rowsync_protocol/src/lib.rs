//! # RowSync Protocol
//!
//! Wire-level types of the RowSync HTTP conversation.
//!
//! This crate provides:
//! - `HttpStep`, the numeric step carried in a header
//! - Header names, the serialization-format descriptor and the body hash
//! - Request/response bodies for every step
//! - `ErrorEnvelope` for failed steps
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod envelope;
mod error;
pub mod headers;
mod messages;
mod step;

pub use envelope::{ErrorEnvelope, SyncSide, SyncStage};
pub use error::{ProtocolError, ProtocolResult};
pub use headers::{compute_hash, verify_hash, SerializationFormat};
pub use messages::{
    BatchSummary, ChangesPart, ChangesResponse, EndDownloadMessage, EnsureScopeRequest,
    EnsureScopeResponse, EstimatedChangesResponse, GetChangesRequest, GetMoreChangesRequest,
    GetMoreChangesResponse, ScopeParameter, SendChangesRequest, SyncContext,
};
pub use step::HttpStep;

/// Protocol version.
pub const PROTOCOL_VERSION: &str = "1";
