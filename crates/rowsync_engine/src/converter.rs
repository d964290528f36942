//! Row converters applied around the wire.

use rowsync_core::SyncTable;

/// Transforms rows before they are sent and after they are received.
///
/// The converter key travels in the converter header so the server can pick
/// the matching converter.
pub trait SyncConverter: Send + Sync {
    /// Key sent over the wire.
    fn key(&self) -> &str;

    /// Called on every table of an outgoing part.
    fn before_serialize(&self, table: &mut SyncTable);

    /// Called on every table of an incoming part.
    fn after_deserialize(&self, table: &mut SyncTable);
}
