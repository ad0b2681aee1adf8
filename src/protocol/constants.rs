//! Protocol constants
//!
//! Channel conventions, default timer values and admission-control
//! defaults shared across the connection core.

use std::time::Duration;

/// Channel used for protocol control messages (ping, bandwidth, acks)
pub const CONTROL_CHANNEL: u32 = 2;

/// Channel used for command messages (invoke, notify, status)
pub const COMMAND_CHANNEL: u32 = 3;

/// First channel id assigned to stream traffic
pub const STREAM_CHANNEL_BASE: u32 = 4;

/// Channels consumed per output stream (data, video, audio plus spares)
pub const CHANNELS_PER_STREAM: u32 = 5;

/// Offset from a stream's base channel to its video channel
pub const VIDEO_CHANNEL_OFFSET: u32 = 1;

/// Offset from a stream's base channel to its audio channel
pub const AUDIO_CHANNEL_OFFSET: u32 = 2;

/// Default keep-alive ping period; zero disables the keep-alive job
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default window without traffic or pongs before a session is inactive
pub const DEFAULT_MAX_INACTIVITY: Duration = Duration::from_secs(60);

/// Default time allowed between accept and a successful connect
pub const DEFAULT_MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wall-time bound for a single worker task
pub const DEFAULT_MAX_HANDLING_TIMEOUT: Duration = Duration::from_millis(500);

/// Default interval of read bytes between outbound BytesRead acks (1 MiB)
pub const DEFAULT_BYTES_READ_INTERVAL: u64 = 1024 * 1024;

/// Default bandwidth advertised to peers (10 Mbit/s)
pub const DEFAULT_BANDWIDTH: u32 = 10_000_000;

/// Queue depth of pending outbound messages above which an unmatched
/// pong is reported as congestion
pub const PENDING_MESSAGES_CONGESTION_THRESHOLD: u64 = 4;
