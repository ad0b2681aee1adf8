//! Shared fixtures for connection tests

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::amf::AmfValue;
use crate::error::{ConnectionError, HandlerError, Result};
use crate::handler::ProtocolHandler;
use crate::protocol::Packet;
use crate::scope::{ClientStream, Scope, StreamBinding, StreamFactory, StreamService};
use crate::transport::Transport;

use super::{ConnectionConfig, RtmpConnection};

/// Transport double that records everything written through it
pub(crate) struct MockTransport {
    pub written: Mutex<Vec<Packet>>,
    pub raw: Mutex<Vec<Bytes>>,
    pub read_bytes: AtomicU64,
    pub written_bytes: AtomicU64,
    pub pending_messages: AtomicU64,
    pub connected: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            written: Mutex::new(Vec::new()),
            raw: Mutex::new(Vec::new()),
            read_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            pending_messages: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        })
    }

    pub fn written_packets(&self) -> Vec<Packet> {
        self.written.lock().clone()
    }
}

impl Transport for MockTransport {
    fn write(&self, packet: Packet) {
        self.written.lock().push(packet);
    }

    fn write_raw(&self, data: Bytes) {
        self.raw.lock().push(data);
    }

    fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Acquire)
    }

    fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Acquire)
    }

    fn pending_messages(&self) -> u64 {
        self.pending_messages.load(Ordering::Acquire)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Handler double recording packets and inactivity signals
pub(crate) struct RecordingHandler {
    pub received: Mutex<Vec<Packet>>,
    pub inactive_count: AtomicU32,
    pub fail_next: AtomicBool,
    pub handling_delay: Mutex<Option<Duration>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            inactive_count: AtomicU32::new(0),
            fail_next: AtomicBool::new(false),
            handling_delay: Mutex::new(None),
        })
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }
}

impl ProtocolHandler for RecordingHandler {
    fn message_received(
        &self,
        _connection: &Arc<RtmpConnection>,
        packet: &Packet,
    ) -> std::result::Result<(), HandlerError> {
        if let Some(delay) = *self.handling_delay.lock() {
            std::thread::sleep(delay);
        }
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err("handler failure for test".into());
        }
        self.received.lock().push(packet.clone());
        Ok(())
    }

    fn connection_inactive(&self, _connection: &Arc<RtmpConnection>) {
        self.inactive_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Minimal stream double bound at construction
pub(crate) struct TestStream {
    id: u32,
    name: String,
}

impl ClientStream for TestStream {
    fn stream_id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) {}
}

/// Factory producing [`TestStream`]s and remembering the bindings seen
pub(crate) struct TestFactory {
    pub bindings: Mutex<Vec<StreamBinding>>,
}

impl TestFactory {
    fn make(&self, binding: StreamBinding) -> Option<Arc<dyn ClientStream>> {
        let stream = Arc::new(TestStream {
            id: binding.stream_id,
            name: binding.name.clone(),
        });
        self.bindings.lock().push(binding);
        Some(stream)
    }
}

impl StreamFactory for TestFactory {
    fn broadcast_stream(
        &self,
        _connection: &Arc<RtmpConnection>,
        binding: StreamBinding,
    ) -> Option<Arc<dyn ClientStream>> {
        self.make(binding)
    }

    fn single_item_subscriber_stream(
        &self,
        _connection: &Arc<RtmpConnection>,
        binding: StreamBinding,
    ) -> Option<Arc<dyn ClientStream>> {
        self.make(binding)
    }

    fn playlist_subscriber_stream(
        &self,
        _connection: &Arc<RtmpConnection>,
        binding: StreamBinding,
    ) -> Option<Arc<dyn ClientStream>> {
        self.make(binding)
    }
}

/// Stream service double recording deletions
pub(crate) struct TestService {
    pub deleted: Mutex<Vec<u32>>,
}

impl StreamService for TestService {
    fn delete_stream(&self, _connection: &Arc<RtmpConnection>, stream: Arc<dyn ClientStream>) {
        stream.close();
        self.deleted.lock().push(stream.stream_id());
    }
}

/// Scope double with configurable admission
pub(crate) struct TestScope {
    pub reject_reason: Option<String>,
    pub factory: Arc<TestFactory>,
    pub service: Arc<TestService>,
    pub disconnect_count: AtomicU32,
}

impl TestScope {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            reject_reason: None,
            factory: Arc::new(TestFactory {
                bindings: Mutex::new(Vec::new()),
            }),
            service: Arc::new(TestService {
                deleted: Mutex::new(Vec::new()),
            }),
            disconnect_count: AtomicU32::new(0),
        })
    }

    pub fn rejecting(reason: &str) -> Arc<Self> {
        let scope = Self::accepting();
        Arc::new(Self {
            reject_reason: Some(reason.to_string()),
            factory: Arc::clone(&scope.factory),
            service: Arc::clone(&scope.service),
            disconnect_count: AtomicU32::new(0),
        })
    }
}

impl Scope for TestScope {
    fn name(&self) -> &str {
        "test"
    }

    fn connect(&self, _connection: &Arc<RtmpConnection>, _params: &[AmfValue]) -> Result<()> {
        match &self.reject_reason {
            Some(reason) => Err(ConnectionError::ClientRejected(Some(reason.clone()))),
            None => Ok(()),
        }
    }

    fn disconnect(&self, _connection: &Arc<RtmpConnection>) {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
    }

    fn stream_factory(&self) -> Option<Arc<dyn StreamFactory>> {
        Some(Arc::clone(&self.factory) as Arc<dyn StreamFactory>)
    }

    fn stream_service(&self) -> Option<Arc<dyn StreamService>> {
        Some(Arc::clone(&self.service) as Arc<dyn StreamService>)
    }
}

pub(crate) fn test_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1935)
}

/// Build a connection wired to fresh mocks
pub(crate) fn connection(
    config: ConnectionConfig,
) -> (
    Arc<RtmpConnection>,
    Arc<MockTransport>,
    Arc<RecordingHandler>,
) {
    let transport = MockTransport::new();
    let handler = RecordingHandler::new();
    let conn = RtmpConnection::with_config(
        "session-1",
        test_addr(),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&handler) as Arc<dyn ProtocolHandler>,
        config,
    );
    (conn, transport, handler)
}
