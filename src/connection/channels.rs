//! Channel multiplexing
//!
//! Channels are the logical sub-streams carved over one transport.
//! Channels 2 and 3 carry control and commands by convention; stream
//! traffic starts at channel 4 with five slots per stream (data, video,
//! audio plus spares). Channels are created lazily on first use and all
//! writes funnel into the connection's encoder lock.

use std::sync::{Arc, Weak};

use crate::protocol::constants::{
    AUDIO_CHANNEL_OFFSET, CHANNELS_PER_STREAM, STREAM_CHANNEL_BASE, VIDEO_CHANNEL_OFFSET,
};
use crate::protocol::{Packet, RtmpEvent, StatusObject};
use crate::service::ServiceCall;

use super::streams::StreamRegistry;
use super::RtmpConnection;

/// One logical outbound channel of a connection
pub struct Channel {
    id: u32,
    connection: Weak<RtmpConnection>,
}

impl Channel {
    pub(crate) fn new(id: u32, connection: Weak<RtmpConnection>) -> Self {
        Self { id, connection }
    }

    /// Channel id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Write an event on this channel.
    ///
    /// For stream channels the owning stream id is stamped into the
    /// header; if the stream was deleted in the meantime the message is
    /// discarded.
    pub async fn write(&self, event: RtmpEvent) {
        let Some(conn) = self.connection.upgrade() else {
            return;
        };
        let stream_id = match StreamRegistry::stream_id_for_channel(self.id) {
            Some(stream_id) => {
                if conn.streams.stream_by_id(stream_id).is_none() {
                    tracing::debug!(
                        session_id = %conn.session_id(),
                        channel_id = self.id,
                        stream_id,
                        "Stream no longer exists, discarding message"
                    );
                    return;
                }
                stream_id
            }
            None => 0,
        };
        self.write_to_stream(event, stream_id).await;
    }

    /// Write an event on this channel for an explicit stream id
    pub async fn write_to_stream(&self, event: RtmpEvent, stream_id: u32) {
        let Some(conn) = self.connection.upgrade() else {
            return;
        };
        let packet = Packet::new(self.id, stream_id, event);
        conn.write_packet(packet).await;
    }

    /// Wrap a status object in an `onStatus` invoke and write it
    pub async fn send_status(&self, status: StatusObject) {
        let call = ServiceCall::new("onStatus", vec![status.to_amf()]);
        self.write(RtmpEvent::Invoke {
            transaction_id: 0,
            call,
        })
        .await;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

/// The channel triple carrying one output stream
#[derive(Debug, Clone)]
pub struct OutputStream {
    data: Arc<Channel>,
    video: Arc<Channel>,
    audio: Arc<Channel>,
}

impl OutputStream {
    /// Channel for data messages (metadata, notify)
    pub fn data(&self) -> &Arc<Channel> {
        &self.data
    }

    /// Channel for video frames
    pub fn video(&self) -> &Arc<Channel> {
        &self.video
    }

    /// Channel for audio frames
    pub fn audio(&self) -> &Arc<Channel> {
        &self.audio
    }
}

impl RtmpConnection {
    /// Get or lazily create the channel for `channel_id`.
    ///
    /// Concurrent first calls resolve to one instance; the map entry is
    /// created atomically under the table lock.
    pub fn channel(self: &Arc<Self>, channel_id: u32) -> Arc<Channel> {
        Arc::clone(
            self.channels
                .lock()
                .entry(channel_id)
                .or_insert_with(|| Arc::new(Channel::new(channel_id, Arc::downgrade(self)))),
        )
    }

    /// Remove a channel from the table
    pub fn close_channel(&self, channel_id: u32) {
        self.channels.lock().remove(&channel_id);
    }

    /// Whether a channel currently exists for `channel_id`
    pub fn is_channel_used(&self, channel_id: u32) -> bool {
        self.channels.lock().contains_key(&channel_id)
    }

    /// Smallest channel id at or above the stream range not in use
    pub fn next_available_channel_id(&self) -> u32 {
        let channels = self.channels.lock();
        let mut id = STREAM_CHANNEL_BASE;
        while channels.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// The data/video/audio channel triple for an output stream
    pub fn create_output_stream(self: &Arc<Self>, stream_id: u32) -> OutputStream {
        let base = STREAM_CHANNEL_BASE + stream_id.saturating_sub(1) * CHANNELS_PER_STREAM;
        OutputStream {
            data: self.channel(base),
            video: self.channel(base + VIDEO_CHANNEL_OFFSET),
            audio: self.channel(base + AUDIO_CHANNEL_OFFSET),
        }
    }
}
