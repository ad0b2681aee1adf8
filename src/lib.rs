//! RTMP server connection core
//!
//! The per-connection heart of an RTMP server: everything that happens
//! between the byte-level handshake finishing and `close()` completing.
//! One [`connection::RtmpConnection`] owns the protocol state machine,
//! the logical channels multiplexed over its transport, the NetStream
//! id registry, the RPC ledger with pending-call correlation, the
//! keep-alive / inactivity timers and the admission-controlled dispatch
//! pipeline that sheds audio under load.
//!
//! The pieces a server embeds it with are injected as traits: the wire
//! codec and socket behind [`transport::Transport`], the application
//! behind [`handler::ProtocolHandler`] and [`scope::Scope`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_conn::connection::{ConnectionConfig, RtmpConnection};
//! # fn demo(
//! #     transport: Arc<dyn rtmp_conn::transport::Transport>,
//! #     handler: Arc<dyn rtmp_conn::handler::ProtocolHandler>,
//! #     scope: Arc<dyn rtmp_conn::scope::Scope>,
//! # ) -> rtmp_conn::error::Result<()> {
//! let conn = RtmpConnection::with_config(
//!     "session-1",
//!     "203.0.113.9:53102".parse().unwrap(),
//!     transport,
//!     handler,
//!     ConnectionConfig::default(),
//! );
//! conn.open();
//! conn.connect(scope, &[])?;
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod connection;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod scheduler;
pub mod scope;
pub mod service;
pub mod stats;
pub mod transport;

pub use amf::AmfValue;
pub use connection::{Channel, ConnectionConfig, OutputStream, RtmpConnection};
pub use error::{ConnectionError, HandlerError, Result};
pub use handler::{ConnectionEvent, ProtocolHandler};
pub use protocol::{
    BandwidthLimitType, ConnectParams, Encoding, MessageType, Packet, PacketHeader, Phase, Ping,
    PingType, RtmpEvent, SharedObjectEvent, SharedObjectEventType, SharedObjectMessage,
    StatusObject,
};
pub use scope::{ClientStream, Scope, StreamBinding, StreamFactory, StreamService};
pub use service::{CallCallback, CallStatus, DeferredResult, PendingCall, ServiceCall};
pub use stats::{ConnectionStats, StatsSnapshot};
pub use transport::Transport;
