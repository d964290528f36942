//! # RowSync Server
//!
//! Reference server side of the RowSync HTTP conversation.
//!
//! This crate provides:
//! - Step dispatch for every step a client sends
//! - Body hash verification
//! - Cookie-based sessions holding upload and download batches
//! - Error envelopes for failed steps
//! - `LoopbackTransport` for in-process client/server runs
//!
//! # Protocol
//!
//! 1. `EnsureScopes`: the server loads or provisions its scope and returns
//!    its id and schema
//! 2. `SendChangesInProgress`*: uploaded parts accumulate in the session
//! 3. `SendChanges`: the last part; the server applies the upload, selects
//!    its own changes and answers with the first download part
//! 4. `GetMoreChanges`*: the remaining download parts
//! 5. `SendEndDownloadChanges`: the session batch is dropped
//!
//! Rows applied from a client are stamped with the client's scope id and
//! never selected back for it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod error;
mod loopback;
mod server;
mod session;

pub use config::{ServerConfig, DEFAULT_SESSION_TTL};
pub use error::{ServerError, ServerResult};
pub use loopback::LoopbackTransport;
pub use server::SyncServer;
pub use session::{parse_cookie, set_cookie, Resolved, SessionStore, Upload, SESSION_COOKIE};
