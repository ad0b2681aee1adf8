//! Transport capability set
//!
//! The connection core does not know its transport (plain TCP, TLS,
//! tunnelled HTTP). It drives whatever it is handed through this trait
//! and reads its byte counters for liveness and acknowledgement.

use bytes::Bytes;

use crate::protocol::Packet;

/// Capabilities the connection core requires from its transport
///
/// `write` and `write_raw` hand a message to the transport's outbound
/// path; callers are already serialized by the connection's encoder
/// lock, so implementations never see concurrent writes for one
/// connection. Implementations should enqueue rather than block.
pub trait Transport: Send + Sync + 'static {
    /// Queue a packet for transmission
    fn write(&self, packet: Packet);

    /// Queue pre-encoded bytes for transmission, bypassing the codec
    fn write_raw(&self, data: Bytes);

    /// Total bytes read from the peer so far
    fn read_bytes(&self) -> u64;

    /// Total bytes written to the peer so far
    fn written_bytes(&self) -> u64;

    /// Messages queued but not yet flushed to the wire
    fn pending_messages(&self) -> u64;

    /// Whether the underlying connection is still up
    fn is_connected(&self) -> bool;
}
