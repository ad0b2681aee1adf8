//! Typed RTMP messages
//!
//! The wire codec (external to this crate) frames bytes into [`Packet`]s
//! and back. The connection core only routes and classifies them: control
//! messages are handled on the read thread, everything else goes through
//! the worker pool.

use std::collections::HashMap;

use bytes::Bytes;

use crate::amf::AmfValue;
use crate::service::ServiceCall;

/// RTMP message type ids as they appear in the chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Set chunk size (0x01)
    ChunkSize,
    /// Abort a partially delivered message (0x02)
    Abort,
    /// Bytes-read acknowledgement (0x03)
    BytesRead,
    /// User control / ping (0x04)
    Ping,
    /// Window acknowledgement size, "server bandwidth" (0x05)
    ServerBandwidth,
    /// Set peer bandwidth, "client bandwidth" (0x06)
    ClientBandwidth,
    /// Audio data (0x08)
    AudioData,
    /// Video data (0x09)
    VideoData,
    /// AMF3 data message (0x0F)
    FlexStreamSend,
    /// AMF3 shared object (0x10)
    FlexSharedObject,
    /// AMF3 command (0x11)
    FlexMessage,
    /// AMF0 data message (0x12)
    Notify,
    /// AMF0 shared object (0x13)
    SharedObject,
    /// AMF0 command (0x14)
    Invoke,
    /// Aggregate message (0x16)
    Aggregate,
    /// Anything this implementation does not know about
    Unknown(u8),
}

impl MessageType {
    /// The wire type id
    pub fn id(self) -> u8 {
        match self {
            MessageType::ChunkSize => 0x01,
            MessageType::Abort => 0x02,
            MessageType::BytesRead => 0x03,
            MessageType::Ping => 0x04,
            MessageType::ServerBandwidth => 0x05,
            MessageType::ClientBandwidth => 0x06,
            MessageType::AudioData => 0x08,
            MessageType::VideoData => 0x09,
            MessageType::FlexStreamSend => 0x0F,
            MessageType::FlexSharedObject => 0x10,
            MessageType::FlexMessage => 0x11,
            MessageType::Notify => 0x12,
            MessageType::SharedObject => 0x13,
            MessageType::Invoke => 0x14,
            MessageType::Aggregate => 0x16,
            MessageType::Unknown(id) => id,
        }
    }

    /// Map a wire type id to a message type
    pub fn from_id(id: u8) -> Self {
        match id {
            0x01 => MessageType::ChunkSize,
            0x02 => MessageType::Abort,
            0x03 => MessageType::BytesRead,
            0x04 => MessageType::Ping,
            0x05 => MessageType::ServerBandwidth,
            0x06 => MessageType::ClientBandwidth,
            0x08 => MessageType::AudioData,
            0x09 => MessageType::VideoData,
            0x0F => MessageType::FlexStreamSend,
            0x10 => MessageType::FlexSharedObject,
            0x11 => MessageType::FlexMessage,
            0x12 => MessageType::Notify,
            0x13 => MessageType::SharedObject,
            0x14 => MessageType::Invoke,
            0x16 => MessageType::Aggregate,
            other => MessageType::Unknown(other),
        }
    }

    /// Control messages are handled synchronously on the read thread
    /// instead of being queued to the worker pool.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            MessageType::Ping
                | MessageType::Abort
                | MessageType::BytesRead
                | MessageType::ChunkSize
                | MessageType::ClientBandwidth
                | MessageType::ServerBandwidth
        )
    }
}

/// User control event subtypes carried in a [`Ping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingType {
    /// Stream is ready for data (0)
    StreamBegin,
    /// Playback on the stream is over (1)
    StreamPlaybufferClear,
    /// No more data on the stream (2)
    StreamDry,
    /// Client buffer duration notification (3)
    ClientBuffer,
    /// Stream is recorded (4)
    RecordedStream,
    /// Server-to-client liveness probe (6)
    PingClient,
    /// Client's echo of a liveness probe (7)
    PongServer,
    /// SWF verification request (26)
    SwfVerificationRequest,
}

impl PingType {
    /// The wire event id
    pub fn id(self) -> u16 {
        match self {
            PingType::StreamBegin => 0,
            PingType::StreamPlaybufferClear => 1,
            PingType::StreamDry => 2,
            PingType::ClientBuffer => 3,
            PingType::RecordedStream => 4,
            PingType::PingClient => 6,
            PingType::PongServer => 7,
            PingType::SwfVerificationRequest => 26,
        }
    }
}

/// A user control message
///
/// Liveness probes carry the low 32 bits of the sender's clock in
/// `value2`; the peer echoes it back unchanged, which is what makes
/// round-trip measurement possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Event subtype
    pub event: PingType,
    /// First event payload word; timestamp echo for ping/pong
    pub value2: u32,
    /// Second payload word where the subtype uses one
    pub value3: Option<u32>,
    /// Third payload word where the subtype uses one
    pub value4: Option<u32>,
}

impl Ping {
    /// Build a server-side liveness probe carrying a timestamp echo
    pub fn ping_client(timestamp: u32) -> Self {
        Self {
            event: PingType::PingClient,
            value2: timestamp,
            value3: None,
            value4: None,
        }
    }

    /// Build a pong answering a liveness probe
    pub fn pong_server(echo: u32) -> Self {
        Self {
            event: PingType::PongServer,
            value2: echo,
            value3: None,
            value4: None,
        }
    }

    /// Build a stream-begin notification
    pub fn stream_begin(stream_id: u32) -> Self {
        Self {
            event: PingType::StreamBegin,
            value2: stream_id,
            value3: None,
            value4: None,
        }
    }
}

/// Peer bandwidth limit semantics for the ClientBandwidth message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthLimitType {
    /// Limit output bandwidth to the indicated window (0)
    Hard,
    /// Limit to the indicated window or the one in effect, whichever is
    /// smaller (1)
    Soft,
    /// Treat as hard if the previous limit was hard, else ignore (2)
    Dynamic,
}

impl BandwidthLimitType {
    /// The wire limit-type byte
    pub fn id(self) -> u8 {
        match self {
            BandwidthLimitType::Hard => 0,
            BandwidthLimitType::Soft => 1,
            BandwidthLimitType::Dynamic => 2,
        }
    }
}

/// Shared-object event subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedObjectEventType {
    /// Client connects to the shared object
    ServerConnect,
    /// Client disconnects from the shared object
    ServerDisconnect,
    /// Attribute update sent by a client
    ServerSetAttribute,
    /// Attribute delete sent by a client
    ServerDeleteAttribute,
    /// Broadcast message sent by a client
    ServerSendMessage,
    /// Status notification to the client
    ClientStatus,
    /// Full data snapshot to the client
    ClientInitialData,
    /// Attribute update pushed to the client
    ClientUpdateAttribute,
    /// Attribute delete pushed to the client
    ClientDeleteData,
    /// Broadcast message pushed to the client
    ClientSendMessage,
}

/// A single shared-object event
#[derive(Debug, Clone, PartialEq)]
pub struct SharedObjectEvent {
    /// Event subtype
    pub kind: SharedObjectEventType,
    /// Attribute key where the subtype carries one
    pub key: Option<String>,
    /// Attribute or message value where the subtype carries one
    pub value: Option<AmfValue>,
}

/// A shared-object message: the object's identity plus a batch of events
#[derive(Debug, Clone, PartialEq)]
pub struct SharedObjectMessage {
    /// Shared object name
    pub name: String,
    /// Object version, incremented on every change
    pub version: u32,
    /// Whether the object is persistent on the server
    pub persistent: bool,
    /// Events in this update
    pub events: Vec<SharedObjectEvent>,
}

impl SharedObjectMessage {
    /// Create an update message for the named object
    pub fn new(name: impl Into<String>, version: u32, persistent: bool) -> Self {
        Self {
            name: name.into(),
            version,
            persistent,
            events: Vec::new(),
        }
    }

    /// Append an event to the update
    pub fn add_event(&mut self, event: SharedObjectEvent) {
        self.events.push(event);
    }
}

/// Conventional status levels
pub const STATUS_LEVEL_STATUS: &str = "status";
pub const STATUS_LEVEL_ERROR: &str = "error";
pub const STATUS_LEVEL_WARNING: &str = "warning";

/// Conventional NetConnection / NetStream status codes
pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";
pub const NC_CONNECT_CLOSED: &str = "NetConnection.Connect.Closed";
pub const NC_CALL_FAILED: &str = "NetConnection.Call.Failed";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";

/// A status object as delivered through `onStatus`
#[derive(Debug, Clone, PartialEq)]
pub struct StatusObject {
    /// Status level: "status", "error" or "warning"
    pub level: String,
    /// Dotted status code
    pub code: String,
    /// Human-readable description
    pub description: String,
}

impl StatusObject {
    /// Create a status-level status
    pub fn status(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: STATUS_LEVEL_STATUS.into(),
            code: code.into(),
            description: description.into(),
        }
    }

    /// Create an error-level status
    pub fn error(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: STATUS_LEVEL_ERROR.into(),
            code: code.into(),
            description: description.into(),
        }
    }

    /// Convert to the AMF object shape clients expect
    pub fn to_amf(&self) -> AmfValue {
        let mut map = HashMap::new();
        map.insert("level".to_string(), AmfValue::String(self.level.clone()));
        map.insert("code".to_string(), AmfValue::String(self.code.clone()));
        map.insert(
            "description".to_string(),
            AmfValue::String(self.description.clone()),
        );
        AmfValue::Object(map)
    }
}

/// A decoded RTMP message body
#[derive(Debug, Clone)]
pub enum RtmpEvent {
    /// Chunk size negotiation
    ChunkSize { size: u32 },
    /// Abort a partially delivered message on a channel
    Abort { channel_id: u32 },
    /// Bytes-read acknowledgement
    BytesRead { sequence: u32 },
    /// User control message
    Ping(Ping),
    /// Window acknowledgement size
    ServerBandwidth { window: u32 },
    /// Set peer bandwidth
    ClientBandwidth {
        window: u32,
        limit_type: BandwidthLimitType,
    },
    /// Opaque audio payload
    Audio { data: Bytes },
    /// Opaque video payload
    Video { data: Bytes },
    /// AMF0 command expecting a correlated reply
    Invoke {
        transaction_id: u32,
        call: ServiceCall,
    },
    /// AMF3 command expecting a correlated reply
    FlexInvoke {
        transaction_id: u32,
        call: ServiceCall,
    },
    /// Fire-and-forget command
    Notify { call: ServiceCall },
    /// AMF0 shared-object update
    SharedObject(SharedObjectMessage),
    /// AMF3 shared-object update
    FlexSharedObject(SharedObjectMessage),
    /// Aggregate of sub-messages; passed through opaque
    Aggregate { data: Bytes },
    /// Unrecognized message, carried verbatim
    Unknown { type_id: u8, data: Bytes },
}

impl RtmpEvent {
    /// The message type this event is framed as
    pub fn message_type(&self) -> MessageType {
        match self {
            RtmpEvent::ChunkSize { .. } => MessageType::ChunkSize,
            RtmpEvent::Abort { .. } => MessageType::Abort,
            RtmpEvent::BytesRead { .. } => MessageType::BytesRead,
            RtmpEvent::Ping(_) => MessageType::Ping,
            RtmpEvent::ServerBandwidth { .. } => MessageType::ServerBandwidth,
            RtmpEvent::ClientBandwidth { .. } => MessageType::ClientBandwidth,
            RtmpEvent::Audio { .. } => MessageType::AudioData,
            RtmpEvent::Video { .. } => MessageType::VideoData,
            RtmpEvent::Invoke { .. } => MessageType::Invoke,
            RtmpEvent::FlexInvoke { .. } => MessageType::FlexMessage,
            RtmpEvent::Notify { .. } => MessageType::Notify,
            RtmpEvent::SharedObject(_) => MessageType::SharedObject,
            RtmpEvent::FlexSharedObject(_) => MessageType::FlexSharedObject,
            RtmpEvent::Aggregate { .. } => MessageType::Aggregate,
            RtmpEvent::Unknown { type_id, .. } => MessageType::Unknown(*type_id),
        }
    }
}

/// Per-message header metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Logical channel the message travels on
    pub channel_id: u32,
    /// NetStream the message belongs to; 0 for connection-level traffic
    pub stream_id: u32,
    /// Message type id
    pub message_type: MessageType,
    /// Message timestamp in milliseconds
    pub timestamp: u32,
}

/// A complete message: header plus decoded body
#[derive(Debug, Clone)]
pub struct Packet {
    /// Header metadata
    pub header: PacketHeader,
    /// Decoded body
    pub event: RtmpEvent,
}

impl Packet {
    /// Build a packet for `event` on the given channel and stream
    pub fn new(channel_id: u32, stream_id: u32, event: RtmpEvent) -> Self {
        Self {
            header: PacketHeader {
                channel_id,
                stream_id,
                message_type: event.message_type(),
                timestamp: 0,
            },
            event,
        }
    }
}

/// Parameters recorded at connect time
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// Host the client addressed
    pub host: String,
    /// Connection path (application plus instance)
    pub path: String,
    /// Raw connect parameter map
    pub params: HashMap<String, AmfValue>,
}

impl ConnectParams {
    /// Create from the pieces the command handler extracts
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            params: HashMap::new(),
        }
    }

    /// The application name, if the client sent one
    pub fn app(&self) -> Option<&str> {
        self.params.get("app").and_then(|v| v.as_str())
    }

    /// The advertised object encoding, defaulting to AMF0's 0.0
    pub fn object_encoding(&self) -> f64 {
        self.params
            .get("objectEncoding")
            .and_then(|v| v.as_number())
            .unwrap_or(0.0)
    }

    /// Whether the client asked for AMF3
    pub fn is_amf3(&self) -> bool {
        self.object_encoding() == 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_round_trip() {
        for id in 0u8..=0x20 {
            assert_eq!(MessageType::from_id(id).id(), id);
        }
    }

    #[test]
    fn test_control_classification() {
        assert!(MessageType::Ping.is_control());
        assert!(MessageType::Abort.is_control());
        assert!(MessageType::BytesRead.is_control());
        assert!(MessageType::ChunkSize.is_control());
        assert!(MessageType::ClientBandwidth.is_control());
        assert!(MessageType::ServerBandwidth.is_control());

        assert!(!MessageType::AudioData.is_control());
        assert!(!MessageType::VideoData.is_control());
        assert!(!MessageType::Invoke.is_control());
        assert!(!MessageType::Notify.is_control());
        assert!(!MessageType::Unknown(0x7F).is_control());
    }

    #[test]
    fn test_event_message_type() {
        let ping = RtmpEvent::Ping(Ping::ping_client(42));
        assert_eq!(ping.message_type(), MessageType::Ping);

        let audio = RtmpEvent::Audio {
            data: Bytes::from_static(&[0xAF, 0x01]),
        };
        assert_eq!(audio.message_type(), MessageType::AudioData);

        let so = RtmpEvent::FlexSharedObject(SharedObjectMessage::new("room", 1, false));
        assert_eq!(so.message_type(), MessageType::FlexSharedObject);
    }

    #[test]
    fn test_status_to_amf() {
        let status = StatusObject::status(NC_CONNECT_SUCCESS, "Connection succeeded.");
        let amf = status.to_amf();

        assert_eq!(amf.get_string("level"), Some("status"));
        assert_eq!(amf.get_string("code"), Some(NC_CONNECT_SUCCESS));
        assert_eq!(amf.get_string("description"), Some("Connection succeeded."));
    }

    #[test]
    fn test_connect_params_encoding() {
        let mut params = ConnectParams::new("localhost", "live");
        assert!(!params.is_amf3());

        params
            .params
            .insert("objectEncoding".into(), AmfValue::Number(3.0));
        assert!(params.is_amf3());
        assert_eq!(params.object_encoding(), 3.0);
    }

    #[test]
    fn test_ping_constructors() {
        let ping = Ping::ping_client(1234);
        assert_eq!(ping.event, PingType::PingClient);
        assert_eq!(ping.value2, 1234);

        let pong = Ping::pong_server(1234);
        assert_eq!(pong.event, PingType::PongServer);
        assert_eq!(pong.value2, 1234);

        let begin = Ping::stream_begin(1);
        assert_eq!(begin.event, PingType::StreamBegin);
        assert_eq!(begin.value2, 1);
    }
}
