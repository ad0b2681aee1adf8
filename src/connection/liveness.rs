//! Liveness monitoring
//!
//! Two timer jobs keep a session honest: a one-shot handshake-wait
//! scheduled at open (see `RtmpConnection::open`) and the fixed-rate
//! keep-alive started after connect. The keep-alive job watches the
//! transport's read counter, sends pings carrying the low 32 bits of
//! the session clock, and measures round trips from matching pongs.
//!
//! All timestamps are milliseconds since the connection was accepted;
//! zero means "never".

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::constants::PENDING_MESSAGES_CONGESTION_THRESHOLD;
use crate::protocol::{Phase, Ping};
use crate::scheduler;

use super::RtmpConnection;

/// Shared liveness state for one connection
#[derive(Debug)]
pub struct LivenessState {
    /// When the last ping left, ms since accept; 0 = never
    last_ping_sent: AtomicU64,
    /// When the last pong arrived, ms since accept; 0 = never
    last_pong_received: AtomicU64,
    /// Last measured round trip, ms; -1 until measured
    last_ping_rtt: AtomicI64,
    /// Transport read-counter snapshot from the previous tick
    last_bytes_read: AtomicU64,
    /// When the read counter last advanced, ms since accept
    last_bytes_read_time: AtomicU64,
    /// Overlap guard: a tick stuck on a slow transport must not stack
    running: AtomicBool,
}

impl LivenessState {
    pub fn new() -> Self {
        Self {
            last_ping_sent: AtomicU64::new(0),
            last_pong_received: AtomicU64::new(0),
            last_ping_rtt: AtomicI64::new(-1),
            last_bytes_read: AtomicU64::new(0),
            last_bytes_read_time: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Last measured round trip, if any ping has been answered
    pub fn last_ping_rtt(&self) -> Option<u32> {
        let rtt = self.last_ping_rtt.load(Ordering::Acquire);
        (rtt >= 0).then_some(rtt as u32)
    }

    /// When the last pong arrived, ms since accept; 0 = never
    pub fn last_pong_received(&self) -> u64 {
        self.last_pong_received.load(Ordering::Acquire)
    }

    pub(crate) fn last_ping_sent(&self) -> u64 {
        self.last_ping_sent.load(Ordering::Acquire)
    }

    /// A session is idle when pongs stopped arriving for longer than the
    /// inactivity window while pings kept going out
    pub(crate) fn is_idle(&self, max_inactivity_ms: u64) -> bool {
        let pong = self.last_pong_received.load(Ordering::Acquire);
        if pong == 0 {
            return false;
        }
        let ping = self.last_ping_sent.load(Ordering::Acquire);
        ping as i64 - pong as i64 > max_inactivity_ms as i64
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl RtmpConnection {
    /// Last measured ping round trip, if any
    pub fn last_ping_rtt(&self) -> Option<u32> {
        self.liveness.last_ping_rtt()
    }

    /// Start the keep-alive job; a zero ping interval disables it
    pub(crate) fn start_keep_alive(self: &Arc<Self>) {
        let period = self.config.ping_interval;
        if period.is_zero() {
            tracing::debug!(session_id = %self.session_id(), "Keep-alive disabled");
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = scheduler::schedule_fixed_rate(period, move || {
            let weak = weak.clone();
            async move {
                if let Some(conn) = weak.upgrade() {
                    conn.keep_alive_tick().await;
                }
            }
        });
        *self.keepalive_task.lock() = Some(handle);
    }

    pub(crate) fn cancel_keep_alive(&self) {
        if let Some(handle) = self.keepalive_task.lock().take() {
            handle.cancel();
        }
    }

    async fn keep_alive_tick(self: &Arc<Self>) {
        if self
            .liveness
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(session_id = %self.session_id(), "Previous keep-alive tick still running");
            return;
        }
        self.run_keep_alive().await;
        self.liveness.running.store(false, Ordering::Release);
    }

    async fn run_keep_alive(self: &Arc<Self>) {
        if self.phase() != Phase::Connected {
            return;
        }
        if !self.transport.is_connected() {
            tracing::info!(session_id = %self.session_id(), "Transport gone, marking inactive");
            self.on_inactive();
            return;
        }

        let now = self.timestamp_millis();
        let max_inactivity = self.config.max_inactivity.as_millis() as u64;

        // Data is still flowing: refresh the snapshot instead of pinging,
        // but a session whose pongs stopped long ago is idle regardless.
        let current = self.transport.read_bytes();
        let previous = self.liveness.last_bytes_read.load(Ordering::Acquire);
        if current > previous {
            if self
                .liveness
                .last_bytes_read
                .compare_exchange(previous, current, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.liveness.last_bytes_read_time.store(now, Ordering::Release);
            }
            if self.liveness.is_idle(max_inactivity) {
                tracing::info!(
                    session_id = %self.session_id(),
                    "Pongs stopped beyond the inactivity window, marking inactive"
                );
                self.on_inactive();
            }
            return;
        }

        let last_ping = self.liveness.last_ping_sent.load(Ordering::Acquire);
        let last_pong = self.liveness.last_pong_received.load(Ordering::Acquire);
        let bytes_read_time = self.liveness.last_bytes_read_time.load(Ordering::Acquire);
        if last_pong > 0
            && last_ping as i64 - last_pong as i64 > max_inactivity as i64
            && now.saturating_sub(bytes_read_time) > max_inactivity
        {
            tracing::info!(
                session_id = %self.session_id(),
                silent_ms = now.saturating_sub(last_pong),
                "No data and no pongs within the inactivity window, marking inactive"
            );
            self.on_inactive();
            return;
        }

        let first_ping = last_ping == 0;
        self.ping(Ping::ping_client(now as u32)).await;
        self.liveness.last_ping_sent.store(now, Ordering::Release);
        if first_ping {
            // Seed the pong clock so the first interval is well-defined.
            let _ = self.liveness.last_pong_received.compare_exchange(
                0,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        tracing::trace!(session_id = %self.session_id(), echo = now as u32, "Keep-alive ping sent");
    }

    /// Record an inbound pong.
    ///
    /// A pong echoing the timestamp of the last ping yields a round-trip
    /// measurement. An unmatched pong with a deep outbound queue is
    /// reported as congestion. Either way the pong clock advances.
    pub fn ping_received(&self, pong: Ping) {
        let now = self.timestamp_millis();
        let last_ping = self.liveness.last_ping_sent.load(Ordering::Acquire);
        if pong.value2 == last_ping as u32 {
            let rtt = (now as u32).wrapping_sub(pong.value2);
            self.liveness.last_ping_rtt.store(rtt as i64, Ordering::Release);
            tracing::trace!(session_id = %self.session_id(), rtt_ms = rtt, "Ping round trip measured");
        } else {
            let pending = self.transport.pending_messages();
            if pending > PENDING_MESSAGES_CONGESTION_THRESHOLD {
                tracing::info!(
                    session_id = %self.session_id(),
                    pending_messages = pending,
                    echo = pong.value2,
                    "Stale pong with deep outbound queue, peer looks congested"
                );
            }
        }
        self.liveness.last_pong_received.store(now, Ordering::Release);
    }
}
