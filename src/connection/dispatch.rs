//! Inbound dispatch pipeline
//!
//! The transport reader delivers every decoded packet here. Control
//! messages are forwarded to the handler on the calling thread; all
//! other types go through the worker pool with a wall-time bound per
//! task. Under queue pressure audio is the first thing sacrificed:
//! video and commands still flow while audio frames are dropped and
//! counted.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::{MessageType, Packet, PingType, RtmpEvent};

use super::RtmpConnection;

/// Shared dispatch state for one connection
#[derive(Debug)]
pub struct DispatchState {
    /// Monotone counter stamped on every worker submission, for tracing
    pub(crate) packet_sequence: AtomicU64,
    /// Tasks submitted to the worker pool and not yet finished
    pub(crate) queue_size: AtomicU32,
    /// Audio frames dropped under queue pressure
    pub(crate) audio_dropped: AtomicU64,
    /// First audio drop logs at warn, the rest at trace
    audio_drop_logged: AtomicBool,
}

impl DispatchState {
    pub fn new() -> Self {
        Self {
            packet_sequence: AtomicU64::new(0),
            queue_size: AtomicU32::new(0),
            audio_dropped: AtomicU64::new(0),
            audio_drop_logged: AtomicBool::new(false),
        }
    }

    /// Tasks currently queued or executing
    pub fn current_queue_size(&self) -> u32 {
        self.queue_size.load(Ordering::Acquire)
    }

    /// Audio frames dropped under queue pressure so far
    pub fn dropped_audio(&self) -> u64 {
        self.audio_dropped.load(Ordering::Relaxed)
    }
}

impl Default for DispatchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the queue counter when the worker task finishes, however
/// it finishes.
struct QueueGuard(Arc<RtmpConnection>);

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.0.dispatch.queue_size.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RtmpConnection {
    /// Tasks currently queued or executing for this connection
    pub fn current_queue_size(&self) -> u32 {
        self.dispatch.current_queue_size()
    }

    /// Route one inbound packet.
    ///
    /// Control types run synchronously through the handler; handler
    /// errors are logged and swallowed. Everything else is submitted to
    /// the worker pool, subject to the audio-drop admission check.
    pub async fn handle_message_received(self: &Arc<Self>, packet: Packet) {
        self.message_received().await;

        let message_type = packet.header.message_type;
        if message_type.is_control() {
            // Pongs feed the liveness monitor before the handler sees them.
            if let RtmpEvent::Ping(ping) = &packet.event {
                if ping.event == PingType::PongServer {
                    self.ping_received(*ping);
                }
            }
            if let Err(error) = self.handler.message_received(self, &packet) {
                tracing::error!(
                    session_id = %self.session_id(),
                    message_type = ?message_type,
                    error = %error,
                    "Control handler failed"
                );
            }
            return;
        }

        let threshold = self.config.queue_threshold_for_audio_drop;
        if threshold > 0
            && message_type == MessageType::AudioData
            && self.dispatch.queue_size.load(Ordering::Acquire) >= threshold
        {
            self.message_dropped();
            let dropped = self.dispatch.audio_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if !self.dispatch.audio_drop_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    session_id = %self.session_id(),
                    threshold,
                    "Queue above audio-drop threshold, dropping audio"
                );
            } else {
                tracing::trace!(session_id = %self.session_id(), dropped, "Audio frame dropped");
            }
            return;
        }

        if self.closing.load(Ordering::Acquire) {
            self.message_dropped();
            tracing::debug!(
                session_id = %self.session_id(),
                message_type = ?message_type,
                "Task rejected, connection closing"
            );
            return;
        }

        let sequence = self.dispatch.packet_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.dispatch.queue_size.fetch_add(1, Ordering::AcqRel);

        let conn = Arc::clone(self);
        let handler = Arc::clone(&self.handler);
        let timeout = self.config.max_handling_timeout;
        tokio::spawn(async move {
            let session_id = conn.session_id().to_owned();
            let worker_conn = Arc::clone(&conn);
            let join = tokio::task::spawn_blocking(move || {
                let _guard = QueueGuard(Arc::clone(&worker_conn));
                handler.message_received(&worker_conn, &packet)
            });
            match tokio::time::timeout(timeout, join).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(error))) => {
                    tracing::error!(
                        session_id = %session_id,
                        sequence,
                        error = %error,
                        "Handler failed"
                    );
                }
                Ok(Err(join_error)) => {
                    tracing::error!(
                        session_id = %session_id,
                        sequence,
                        error = %join_error,
                        "Handler task panicked"
                    );
                }
                Err(_) => {
                    // The stuck task keeps its thread; the queue counter
                    // drops when it eventually returns and the cleared
                    // maps absorb whatever it did.
                    tracing::warn!(
                        session_id = %session_id,
                        sequence,
                        timeout_ms = timeout.as_millis() as u64,
                        "Handling timeout exceeded, abandoning task"
                    );
                }
            }
        });
    }
}
