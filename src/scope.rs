//! Scope and stream container interfaces
//!
//! The scope is the application container owning business logic. The
//! connection core asks it to admit sessions, to produce NetStream
//! implementations, and for the deletion hook used during teardown.

use std::sync::Arc;
use std::time::Duration;

use crate::amf::AmfValue;
use crate::connection::RtmpConnection;
use crate::error::Result;

/// Identity and configuration handed to a freshly created stream
///
/// Streams are bound at construction: the factory receives the stream id,
/// a random UUID name and the remembered buffer duration, and returns a
/// fully wired stream.
#[derive(Debug, Clone)]
pub struct StreamBinding {
    /// 1-based NetStream id
    pub stream_id: u32,
    /// Random UUID assigned at creation
    pub name: String,
    /// Client buffer duration remembered before creation, if any
    pub buffer_duration: Option<Duration>,
}

/// A NetStream owned by a connection
pub trait ClientStream: Send + Sync + 'static {
    /// 1-based stream id
    fn stream_id(&self) -> u32;

    /// Name assigned at creation
    fn name(&self) -> &str;

    /// Release stream resources; idempotent
    fn close(&self);
}

/// Produces stream implementations for a connection
///
/// Mirrors prototype lookup in the application container: each call
/// yields a new instance, or `None` when the container has no prototype
/// configured for that stream flavor. The stream is bound to the owning
/// connection at construction.
pub trait StreamFactory: Send + Sync + 'static {
    /// A stream the client publishes into
    fn broadcast_stream(
        &self,
        connection: &Arc<RtmpConnection>,
        binding: StreamBinding,
    ) -> Option<Arc<dyn ClientStream>>;

    /// A play-once subscriber stream
    fn single_item_subscriber_stream(
        &self,
        connection: &Arc<RtmpConnection>,
        binding: StreamBinding,
    ) -> Option<Arc<dyn ClientStream>>;

    /// A playlist-capable subscriber stream
    fn playlist_subscriber_stream(
        &self,
        connection: &Arc<RtmpConnection>,
        binding: StreamBinding,
    ) -> Option<Arc<dyn ClientStream>>;
}

/// Scope-level stream service; owns stream deletion during teardown
pub trait StreamService: Send + Sync + 'static {
    /// Delete a live stream on behalf of a closing connection
    fn delete_stream(&self, connection: &Arc<RtmpConnection>, stream: Arc<dyn ClientStream>);
}

/// The application container a connection attaches to
pub trait Scope: Send + Sync + 'static {
    /// Scope name (application plus instance)
    fn name(&self) -> &str;

    /// Admit or reject a connecting session.
    ///
    /// Returning `ConnectionError::ClientRejected` denies the session;
    /// the reason travels back to the connect caller.
    fn connect(&self, connection: &Arc<RtmpConnection>, params: &[AmfValue]) -> Result<()>;

    /// Detach a session; called once during connection teardown
    fn disconnect(&self, connection: &Arc<RtmpConnection>);

    /// Stream prototype factory, if this scope serves streams
    fn stream_factory(&self) -> Option<Arc<dyn StreamFactory>>;

    /// Deletion hook used while tearing down live streams
    fn stream_service(&self) -> Option<Arc<dyn StreamService>>;
}
