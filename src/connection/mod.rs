//! Per-connection core
//!
//! [`RtmpConnection`] is the object representing one live client session
//! after the byte-level handshake. It owns the protocol state, the
//! channel table, the NetStream registry, the RPC ledger and the
//! liveness timers, and mediates every message in or out of the session
//! until `close()` tears it all down exactly once.
//!
//! The transport, the user handler and the application scope are
//! injected; see the `transport`, `handler` and `scope` modules.

pub mod calls;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod liveness;
pub mod streams;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use uuid::Uuid;

use crate::amf::AmfValue;
use crate::error::{ConnectionError, Result};
use crate::handler::{ConnectionEvent, ProtocolHandler};
use crate::protocol::constants::{COMMAND_CHANNEL, CONTROL_CHANNEL};
use crate::protocol::{
    ConnectParams, Encoding, MessageType, Packet, Phase, Ping, ProtocolState, RtmpEvent,
    SharedObjectEvent, SharedObjectMessage, StatusObject,
};
use crate::scheduler::{self, TaskHandle};
use crate::scope::{ClientStream, Scope, StreamBinding};
use crate::service::{CallStatus, DeferredResult, PendingCall, ServiceCall};
use crate::stats::{ConnectionStats, StatsSnapshot};
use crate::transport::Transport;

pub use calls::CallLedger;
pub use channels::{Channel, OutputStream};
pub use config::ConnectionConfig;
pub use dispatch::DispatchState;
pub use liveness::LivenessState;
pub use streams::StreamRegistry;

/// The stream flavors a connection can create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Broadcast,
    SingleItemSubscriber,
    PlaylistSubscriber,
}

/// A single live RTMP session
///
/// Created on accept, destroyed after [`close`](Self::close) completes.
/// Shared across the transport reader, the worker pool and the timer
/// threads via `Arc`; all internal state is concurrency-safe.
pub struct RtmpConnection {
    session_id: String,
    remote_addr: SocketAddr,
    pub(crate) config: ConnectionConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) handler: Arc<dyn ProtocolHandler>,

    state: ProtocolState,
    epoch: Instant,

    pub(crate) channels: Mutex<HashMap<u32, Arc<Channel>>>,
    pub(crate) streams: StreamRegistry,
    pub(crate) calls: CallLedger,
    pub(crate) liveness: LivenessState,
    pub(crate) dispatch: DispatchState,
    pending_videos: Mutex<HashMap<u32, u64>>,

    scope: Mutex<Option<Arc<dyn Scope>>>,
    client_id: Mutex<Option<String>>,
    connect_params: Mutex<Option<ConnectParams>>,

    pub(crate) stats: ConnectionStats,
    timer: AtomicU64,
    next_bytes_read: AtomicU64,

    pub(crate) closing: AtomicBool,
    decoder_lock: Semaphore,
    encoder_lock: Semaphore,

    handshake_task: Mutex<Option<TaskHandle>>,
    keepalive_task: Mutex<Option<TaskHandle>>,
}

impl RtmpConnection {
    /// Create a connection with default configuration
    pub fn new(
        session_id: impl Into<String>,
        remote_addr: SocketAddr,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Arc<Self> {
        Self::with_config(
            session_id,
            remote_addr,
            transport,
            handler,
            ConnectionConfig::default(),
        )
    }

    /// Create a connection with custom configuration
    pub fn with_config(
        session_id: impl Into<String>,
        remote_addr: SocketAddr,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn ProtocolHandler>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let next_bytes_read = config.bytes_read_interval;
        Arc::new(Self {
            session_id: session_id.into(),
            remote_addr,
            config,
            transport,
            handler,
            state: ProtocolState::new(),
            epoch: Instant::now(),
            channels: Mutex::new(HashMap::new()),
            streams: StreamRegistry::new(),
            calls: CallLedger::new(),
            liveness: LivenessState::new(),
            dispatch: DispatchState::new(),
            pending_videos: Mutex::new(HashMap::new()),
            scope: Mutex::new(None),
            client_id: Mutex::new(None),
            connect_params: Mutex::new(None),
            stats: ConnectionStats::new(),
            timer: AtomicU64::new(0),
            next_bytes_read: AtomicU64::new(next_bytes_read),
            closing: AtomicBool::new(false),
            decoder_lock: Semaphore::new(1),
            encoder_lock: Semaphore::new(1),
            handshake_task: Mutex::new(None),
            keepalive_task: Mutex::new(None),
        })
    }

    // --- identity and accessors ---

    /// Opaque session identifier assigned at accept
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Remote peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Externally assigned client id, once the application set one
    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    /// Record the externally assigned client id
    pub fn set_client_id(&self, client_id: impl Into<String>) {
        *self.client_id.lock() = Some(client_id.into());
    }

    /// The scope this session is attached to, after a successful connect
    pub fn scope(&self) -> Option<Arc<dyn Scope>> {
        self.scope.lock().clone()
    }

    /// Parameters recorded by [`setup`](Self::setup)
    pub fn connect_params(&self) -> Option<ConnectParams> {
        self.connect_params.lock().clone()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Advance the lifecycle phase; driven by the handshake driver
    pub fn set_phase(&self, phase: Phase) {
        self.state.set_phase(phase);
    }

    /// Object encoding in effect for this session
    pub fn encoding(&self) -> Encoding {
        self.state.encoding()
    }

    /// Override the object encoding
    pub fn set_encoding(&self, encoding: Encoding) {
        self.state.set_encoding(encoding);
    }

    /// Whether the session reached the connected phase and is not closing
    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Connected && !self.closing.load(Ordering::Acquire)
    }

    /// Whether teardown started
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Copy of the message counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Strictly monotone per-connection tick, used for tracing order
    pub fn next_timer_tick(&self) -> u64 {
        self.timer.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Milliseconds since this connection was accepted
    pub(crate) fn timestamp_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    // --- lifecycle ---

    /// Start the session: schedules the handshake-wait job which marks
    /// the connection inactive if no successful connect arrives in time.
    pub fn open(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let deadline = self.config.max_handshake_timeout;
        let handle = scheduler::schedule_once(deadline, async move {
            if let Some(conn) = weak.upgrade() {
                if conn.phase() != Phase::Connected {
                    tracing::info!(
                        session_id = %conn.session_id,
                        timeout_ms = deadline.as_millis() as u64,
                        "No connect within handshake deadline"
                    );
                    conn.on_inactive();
                }
            }
        });
        *self.handshake_task.lock() = Some(handle);
        tracing::debug!(session_id = %self.session_id, peer = %self.remote_addr, "Connection opened");
    }

    /// Attach this session to a scope.
    ///
    /// On success the handshake-wait job is cancelled and keep-alive
    /// starts. On rejection the handshake-wait job is cancelled and the
    /// rejection propagates to the caller.
    pub fn connect(self: &Arc<Self>, scope: Arc<dyn Scope>, params: &[AmfValue]) -> Result<()> {
        self.state.set_phase(Phase::Connect);
        match scope.connect(self, params) {
            Ok(()) => {
                *self.scope.lock() = Some(scope);
                self.state.set_phase(Phase::Connected);
                self.cancel_handshake_wait();
                self.start_keep_alive();
                tracing::info!(session_id = %self.session_id, "Connected");
                Ok(())
            }
            Err(err) => {
                self.cancel_handshake_wait();
                tracing::info!(session_id = %self.session_id, error = %err, "Connect rejected");
                Err(err)
            }
        }
    }

    /// Record connection metadata from the connect command. Advertising
    /// `objectEncoding == 3` switches the session to AMF3.
    pub fn setup(&self, host: &str, path: &str, params: HashMap<String, AmfValue>) {
        let connect_params = ConnectParams {
            host: host.to_string(),
            path: path.to_string(),
            params,
        };
        if connect_params.is_amf3() {
            self.state.set_encoding(Encoding::Amf3);
        }
        tracing::debug!(
            session_id = %self.session_id,
            host = %connect_params.host,
            path = %connect_params.path,
            encoding = ?self.encoding(),
            "Connection setup"
        );
        *self.connect_params.lock() = Some(connect_params);
    }

    pub(crate) fn cancel_handshake_wait(&self) {
        if let Some(handle) = self.handshake_task.lock().take() {
            handle.cancel();
        }
    }

    pub(crate) fn on_inactive(self: &Arc<Self>) {
        self.handler.connection_inactive(self);
    }

    // --- outbound traffic ---

    /// Advertise bandwidth to the peer: a ServerBW followed by a
    /// ClientBW with the configured limit semantics, both on the control
    /// channel.
    pub async fn set_bandwidth(self: &Arc<Self>, window: u32) {
        let channel = self.channel(CONTROL_CHANNEL);
        channel.write(RtmpEvent::ServerBandwidth { window }).await;
        channel
            .write(RtmpEvent::ClientBandwidth {
                window,
                limit_type: self.config.bandwidth_limit_type,
            })
            .await;
    }

    /// Advertise the configured default bandwidth
    pub async fn advertise_default_bandwidth(self: &Arc<Self>) {
        self.set_bandwidth(self.config.default_bandwidth).await;
    }

    /// Write an explicit user control message on the control channel
    pub async fn ping(self: &Arc<Self>, ping: Ping) {
        self.channel(CONTROL_CHANNEL)
            .write(RtmpEvent::Ping(ping))
            .await;
    }

    /// Write a packet through the encoder lock.
    ///
    /// Writes for one connection are serialized here; per-channel order
    /// follows from it. A packet arriving after close is counted as
    /// dropped.
    pub async fn write_packet(&self, packet: Packet) {
        if self.closing.load(Ordering::Acquire) {
            self.message_dropped();
            return;
        }
        self.writing_message(&packet);
        let message_type = packet.header.message_type;
        let stream_id = packet.header.stream_id;
        match self.encoder_lock.acquire().await {
            Ok(_permit) => {
                self.transport.write(packet);
                self.message_sent(message_type, stream_id);
            }
            Err(_) => {
                // Permits were drained by close.
                self.message_dropped();
            }
        }
    }

    /// Write pre-encoded bytes through the encoder lock
    pub async fn write_raw(&self, data: Bytes) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        if self.encoder_lock.acquire().await.is_ok() {
            self.transport.write_raw(data);
        }
    }

    /// Pre-write hook: video frames count toward the stream's pending
    /// total until the transport takes them.
    fn writing_message(&self, packet: &Packet) {
        if packet.header.message_type == MessageType::VideoData {
            *self
                .pending_videos
                .lock()
                .entry(packet.header.stream_id)
                .or_insert(0) += 1;
        }
    }

    /// Post-write hook
    fn message_sent(&self, message_type: MessageType, stream_id: u32) {
        if message_type == MessageType::VideoData {
            let mut pending = self.pending_videos.lock();
            if let Some(count) = pending.get_mut(&stream_id) {
                *count = count.saturating_sub(1);
            }
        }
        self.stats.written_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a message that never reached the wire or the worker pool
    pub(crate) fn message_dropped(&self) {
        self.stats.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// In-flight video frames for one stream; raw count
    pub fn pending_video_count(&self, stream_id: u32) -> u64 {
        self.pending_videos
            .lock()
            .get(&stream_id)
            .copied()
            .unwrap_or(0)
    }

    /// In-flight video frames across all streams; raw count
    pub fn total_pending_videos(&self) -> u64 {
        self.pending_videos.lock().values().sum()
    }

    // --- inbound bookkeeping ---

    /// Per-message accounting on the read path: counts the message and
    /// acknowledges read bytes when the interval is crossed.
    pub async fn message_received(self: &Arc<Self>) {
        self.stats.read_messages.fetch_add(1, Ordering::Relaxed);
        self.update_bytes_read().await;
    }

    async fn update_bytes_read(self: &Arc<Self>) {
        let read = self.transport.read_bytes();
        if read >= self.next_bytes_read.load(Ordering::Acquire) {
            let sequence = (read % (1u64 << 31)) as u32;
            self.channel(CONTROL_CHANNEL)
                .write(RtmpEvent::BytesRead { sequence })
                .await;
            self.next_bytes_read
                .fetch_add(self.config.bytes_read_interval, Ordering::AcqRel);
        }
    }

    // --- RPC ---

    /// Invoke the peer on the command channel, tracking the reply
    pub async fn invoke(self: &Arc<Self>, call: PendingCall) {
        self.invoke_on_channel(call, COMMAND_CHANNEL).await;
    }

    /// Invoke the peer on a specific channel.
    ///
    /// The call is parked in the pending map under a fresh transaction
    /// id before the Invoke is written.
    pub async fn invoke_on_channel(self: &Arc<Self>, call: PendingCall, channel_id: u32) {
        let transaction_id = self.calls.next_transaction_id();
        let service_call = call.call().clone();
        self.calls.register_pending(transaction_id, call);
        self.channel(channel_id)
            .write(RtmpEvent::Invoke {
                transaction_id,
                call: service_call,
            })
            .await;
    }

    /// Notify the peer on the command channel; no reply correlation
    pub async fn notify(self: &Arc<Self>, call: ServiceCall) {
        self.notify_on_channel(call, COMMAND_CHANNEL).await;
    }

    /// Notify the peer on a specific channel
    pub async fn notify_on_channel(self: &Arc<Self>, call: ServiceCall, channel_id: u32) {
        self.channel(channel_id)
            .write(RtmpEvent::Notify { call })
            .await;
    }

    /// Send a status object on the command channel
    pub async fn send_status(self: &Arc<Self>, status: StatusObject) {
        self.channel(COMMAND_CHANNEL).send_status(status).await;
    }

    /// Non-destructive read of a pending call
    pub fn pending_call(&self, transaction_id: u32) -> Option<ServiceCall> {
        self.calls.pending_call(transaction_id)
    }

    /// Destructive take of a pending call, typically on reply arrival
    pub fn retrieve_pending_call(&self, transaction_id: u32) -> Option<PendingCall> {
        self.calls.retrieve_pending_call(transaction_id)
    }

    /// Track a deferred result until the application produces the value
    pub fn register_deferred_result(&self, result: DeferredResult) {
        self.calls.register_deferred_result(result);
    }

    /// Stop tracking a deferred result
    pub fn unregister_deferred_result(&self, transaction_id: u32) -> Option<DeferredResult> {
        self.calls.unregister_deferred_result(transaction_id)
    }

    /// Answer a deferred invoke: writes the stored call, completed with
    /// `result`, back on the channel the request arrived on.
    pub async fn complete_deferred_result(self: &Arc<Self>, transaction_id: u32, result: AmfValue) {
        let Some(deferred) = self.calls.unregister_deferred_result(transaction_id) else {
            tracing::debug!(
                session_id = %self.session_id,
                transaction_id,
                "No deferred result registered"
            );
            return;
        };
        let mut call = deferred.call;
        call.status = CallStatus::SuccessResult;
        call.result = Some(result);
        self.channel(deferred.channel_id)
            .write(RtmpEvent::Invoke {
                transaction_id,
                call,
            })
            .await;
    }

    /// Fail every surviving pending call with NotConnected, firing each
    /// registered callback exactly once.
    pub fn send_pending_service_calls_close_error(&self) {
        self.calls.fail_pending_calls(CallStatus::NotConnected);
    }

    // --- shared objects ---

    /// Send a shared-object update on the command channel. The AMF3
    /// session variant uses flex framing. Failures are logged, never
    /// propagated.
    pub async fn send_shared_object(
        self: &Arc<Self>,
        name: &str,
        version: u32,
        persistent: bool,
        events: Vec<SharedObjectEvent>,
    ) {
        let mut message = SharedObjectMessage::new(name, version, persistent);
        for event in events {
            message.add_event(event);
        }
        let event = match self.encoding() {
            Encoding::Amf3 => RtmpEvent::FlexSharedObject(message),
            Encoding::Amf0 => RtmpEvent::SharedObject(message),
        };
        self.channel(COMMAND_CHANNEL).write(event).await;
    }

    // --- application events ---

    /// Dispatch an application event onto the connection
    pub async fn dispatch_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::ClientInvoke(call) => self.invoke(call).await,
            ConnectionEvent::ClientNotify(call) => self.notify(call).await,
            other => {
                tracing::warn!(
                    session_id = %self.session_id,
                    event = ?other,
                    "Unhandled connection event"
                );
            }
        }
    }

    // --- streams ---

    /// Reserve the lowest free stream id
    pub fn reserve_stream_id(&self) -> u32 {
        self.streams.reserve_stream_id()
    }

    /// Reserve `id` if free, otherwise the lowest free id
    pub fn reserve_requested_stream_id(&self, id: u32) -> u32 {
        self.streams.reserve_requested_stream_id(id)
    }

    /// Whether `id` is reserved and not yet backed by a stream
    pub fn is_valid_stream_id(&self, id: u32) -> bool {
        self.streams.is_valid_stream_id(id)
    }

    /// Create and register a broadcast stream under `id`
    pub fn new_broadcast_stream(self: &Arc<Self>, id: u32) -> Option<Arc<dyn ClientStream>> {
        self.create_stream(id, StreamKind::Broadcast)
    }

    /// Create and register a play-once subscriber stream under `id`
    pub fn new_single_item_subscriber_stream(
        self: &Arc<Self>,
        id: u32,
    ) -> Option<Arc<dyn ClientStream>> {
        self.create_stream(id, StreamKind::SingleItemSubscriber)
    }

    /// Create and register a playlist subscriber stream under `id`
    pub fn new_playlist_subscriber_stream(
        self: &Arc<Self>,
        id: u32,
    ) -> Option<Arc<dyn ClientStream>> {
        self.create_stream(id, StreamKind::PlaylistSubscriber)
    }

    fn create_stream(self: &Arc<Self>, id: u32, kind: StreamKind) -> Option<Arc<dyn ClientStream>> {
        if !self.streams.is_valid_stream_id(id) {
            return None;
        }
        let factory = self.scope.lock().as_ref()?.stream_factory()?;
        let binding = StreamBinding {
            stream_id: id,
            name: Uuid::new_v4().to_string(),
            buffer_duration: self.streams.buffer_duration(id),
        };
        let stream = match kind {
            StreamKind::Broadcast => factory.broadcast_stream(self, binding),
            StreamKind::SingleItemSubscriber => factory.single_item_subscriber_stream(self, binding),
            StreamKind::PlaylistSubscriber => factory.playlist_subscriber_stream(self, binding),
        }?;
        self.streams.register_stream(Arc::clone(&stream));
        tracing::debug!(
            session_id = %self.session_id,
            stream_id = id,
            kind = ?kind,
            "Stream created"
        );
        Some(stream)
    }

    /// Remove the stream registered under `id` along with its buffer
    /// hint and pending-video counter. The reservation stays.
    pub fn delete_stream_by_id(&self, id: u32) -> bool {
        let removed = self.streams.unregister_stream(id).is_some();
        self.pending_videos.lock().remove(&id);
        removed
    }

    /// Remove the stream under `id` and release the id for reuse
    pub fn unreserve_stream_id(&self, id: u32) {
        self.pending_videos.lock().remove(&id);
        self.streams.unreserve_stream_id(id);
    }

    /// Remember a client buffer duration applied when the stream is
    /// created later
    pub fn remember_stream_buffer_duration(&self, id: u32, duration: Duration) {
        self.streams.remember_buffer_duration(id, duration);
    }

    /// Look up a registered stream by id
    pub fn stream_by_id(&self, id: u32) -> Option<Arc<dyn ClientStream>> {
        self.streams.stream_by_id(id)
    }

    /// Look up the stream whose channel triple contains `channel_id`
    pub fn stream_by_channel_id(&self, channel_id: u32) -> Option<Arc<dyn ClientStream>> {
        self.streams.stream_by_channel_id(channel_id)
    }

    /// Number of currently registered streams
    pub fn used_stream_count(&self) -> u32 {
        self.streams.used_stream_count()
    }

    // --- codec serialization ---

    /// Acquire the decoder permit. Fails once close drained the permits.
    pub async fn acquire_decoder(&self) -> Result<SemaphorePermit<'_>> {
        self.decoder_lock
            .acquire()
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Acquire the encoder permit. Fails once close drained the permits.
    pub async fn acquire_encoder(&self) -> Result<SemaphorePermit<'_>> {
        self.encoder_lock
            .acquire()
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    // --- teardown ---

    /// Tear the session down. Idempotent: only the first caller does the
    /// work, everything after the CAS is a no-op.
    pub fn close(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::AcqRel) {
            tracing::debug!(session_id = %self.session_id, "Close already in progress");
            return;
        }

        self.cancel_handshake_wait();
        self.cancel_keep_alive();

        if self.phase() == Phase::Disconnected {
            tracing::debug!(session_id = %self.session_id, "Already disconnected");
            return;
        }
        self.state.set_phase(Phase::Disconnecting);
        tracing::debug!(session_id = %self.session_id, "Closing connection");

        self.send_pending_service_calls_close_error();

        let scope = self.scope.lock().clone();
        if let Some(scope) = &scope {
            let service = scope.stream_service();
            for stream in self.streams.streams() {
                let stream_id = stream.stream_id();
                match &service {
                    Some(service) => service.delete_stream(self, Arc::clone(&stream)),
                    None => stream.close(),
                }
                self.streams.unregister_stream(stream_id);
            }
            scope.disconnect(self);
        }
        *self.scope.lock() = None;
        *self.client_id.lock() = None;

        self.channels.lock().clear();
        self.streams.clear();
        self.calls.clear();
        self.pending_videos.lock().clear();

        // No further codec operation may proceed.
        self.decoder_lock.close();
        self.encoder_lock.close();

        self.state.set_phase(Phase::Disconnected);
        tracing::info!(session_id = %self.session_id, "Connection closed");
    }
}

impl std::fmt::Debug for RtmpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmpConnection")
            .field("session_id", &self.session_id)
            .field("remote_addr", &self.remote_addr)
            .field("phase", &self.phase())
            .field("encoding", &self.encoding())
            .field("used_streams", &self.used_stream_count())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing;
