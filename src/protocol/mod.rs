//! Protocol-level types
//!
//! Message model, state machine and the constants of the channel and
//! timer conventions. The byte codec and the handshake itself are
//! external collaborators; only their decoded output passes through here.

pub mod constants;
pub mod message;
pub mod state;

pub use message::{
    BandwidthLimitType, ConnectParams, MessageType, Packet, PacketHeader, Ping, PingType,
    RtmpEvent, SharedObjectEvent, SharedObjectEventType, SharedObjectMessage, StatusObject,
};
pub use state::{Encoding, Phase, ProtocolState};
