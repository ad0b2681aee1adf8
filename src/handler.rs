//! Inbound message handler interface
//!
//! Every decoded packet ends up in a [`ProtocolHandler`]: control
//! messages synchronously on the read path, everything else on a worker.
//! Handler failures are caught and logged by the dispatch pipeline and
//! never tear down the connection.

use std::sync::Arc;

use crate::connection::RtmpConnection;
use crate::error::HandlerError;
use crate::protocol::Packet;
use crate::service::{PendingCall, ServiceCall};

/// User entry point for inbound packets and lifecycle signals
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Called for every inbound packet.
    ///
    /// Errors are logged by the dispatcher and swallowed; they never
    /// propagate past the dispatch pipeline.
    fn message_received(
        &self,
        connection: &Arc<RtmpConnection>,
        packet: &Packet,
    ) -> Result<(), HandlerError>;

    /// Called when the handshake timed out or the keep-alive job decided
    /// the peer is gone. The application is expected to initiate
    /// `close()` from here (spawning it is fine; this runs on a timer
    /// thread).
    fn connection_inactive(&self, connection: &Arc<RtmpConnection>);
}

/// Events an application can dispatch onto a connection
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Invoke the client, tracking the reply via the pending-call map
    ClientInvoke(PendingCall),
    /// Notify the client without reply correlation
    ClientNotify(ServiceCall),
    /// Request an orderly disconnect
    Disconnect,
}
