//! # RowSync Engine
//!
//! Orchestration of a RowSync exchange.
//!
//! This crate provides:
//! - `LocalOrchestrator`: provisioning, change selection and change
//!   application against one database
//! - `HttpRequestHandler`: one sync step per POST, with headers, body hash,
//!   session cookie, retries and error decoding
//! - `WebRemoteOrchestrator`: the client's view of a sync server
//! - `SyncAgent`: a full client cycle with a state machine
//!
//! ## Cycle
//!
//! 1. Ensure the local scope and the server scope
//! 2. Provision tracking tables and triggers on first sync
//! 3. Upload local changes part by part
//! 4. Download server changes part by part and apply them
//! 5. Advance the scope timestamps
//!
//! Rows applied on behalf of a peer are stamped with the peer's scope id,
//! so they are never sent back to it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod agent;
mod config;
mod converter;
mod error;
mod http;
mod local;
mod policy;
mod remote;
mod transport;

pub use agent::{SyncAgent, SyncState, SyncStats, SyncSummary};
pub use config::{ConflictResolution, HttpOptions, RetryConfig, SyncOptions, DEFAULT_BATCH_SIZE};
pub use converter::SyncConverter;
pub use error::{SyncError, SyncResult};
pub use http::HttpRequestHandler;
pub use local::{ApplyStats, LocalOrchestrator};
pub use policy::{OnRetry, SyncPolicy};
pub use remote::WebRemoteOrchestrator;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, MockTransport, ReqwestTransport};

pub use rowsync_protocol::PROTOCOL_VERSION;
