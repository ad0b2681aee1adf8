//! Session protocol state
//!
//! Tracks the lifecycle phase of an RTMP session and the object encoding
//! negotiated at connect time. Both fields are read from several threads
//! (reader, workers, timers), so they live in atomics.

use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Accepted, nothing exchanged yet
    Uninit = 0,
    /// Byte-level handshake in progress
    Handshake = 1,
    /// Handshake complete, waiting for the connect command
    HandshakeOk = 2,
    /// Connect command being processed
    Connect = 3,
    /// Session fully established
    Connected = 4,
    /// Close in progress
    Disconnecting = 5,
    /// Session closed; terminal
    Disconnected = 6,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Uninit,
            1 => Phase::Handshake,
            2 => Phase::HandshakeOk,
            3 => Phase::Connect,
            4 => Phase::Connected,
            5 => Phase::Disconnecting,
            _ => Phase::Disconnected,
        }
    }
}

/// Object encoding negotiated at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// Classic AMF0 serialization
    Amf0 = 0,
    /// AMF3 serialization, selected when the client advertises
    /// `objectEncoding == 3`
    Amf3 = 3,
}

/// Combined phase + encoding state
#[derive(Debug)]
pub struct ProtocolState {
    phase: AtomicU8,
    encoding: AtomicU8,
}

impl ProtocolState {
    /// Create state for a freshly accepted session
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Uninit as u8),
            encoding: AtomicU8::new(Encoding::Amf0 as u8),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Advance the phase. Transitions are advisory and never rejected,
    /// with one exception: `Disconnected` is terminal.
    pub fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if Phase::from_u8(current) == Phase::Disconnected {
                return;
            }
            match self.phase.compare_exchange_weak(
                current,
                phase as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current object encoding
    pub fn encoding(&self) -> Encoding {
        if self.encoding.load(Ordering::Acquire) == Encoding::Amf3 as u8 {
            Encoding::Amf3
        } else {
            Encoding::Amf0
        }
    }

    /// Set the object encoding
    pub fn set_encoding(&self, encoding: Encoding) {
        self.encoding.store(encoding as u8, Ordering::Release);
    }
}

impl Default for ProtocolState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ProtocolState::new();
        assert_eq!(state.phase(), Phase::Uninit);
        assert_eq!(state.encoding(), Encoding::Amf0);
    }

    #[test]
    fn test_phase_progression() {
        let state = ProtocolState::new();

        state.set_phase(Phase::Handshake);
        state.set_phase(Phase::HandshakeOk);
        state.set_phase(Phase::Connect);
        state.set_phase(Phase::Connected);
        assert_eq!(state.phase(), Phase::Connected);

        state.set_phase(Phase::Disconnecting);
        assert_eq!(state.phase(), Phase::Disconnecting);
    }

    #[test]
    fn test_disconnected_is_terminal() {
        let state = ProtocolState::new();
        state.set_phase(Phase::Disconnected);

        state.set_phase(Phase::Connected);
        assert_eq!(state.phase(), Phase::Disconnected);

        state.set_phase(Phase::Uninit);
        assert_eq!(state.phase(), Phase::Disconnected);
    }

    #[test]
    fn test_out_of_order_transitions_allowed() {
        // Ordering is advisory below the terminal state.
        let state = ProtocolState::new();
        state.set_phase(Phase::Connected);
        state.set_phase(Phase::Handshake);
        assert_eq!(state.phase(), Phase::Handshake);
    }

    #[test]
    fn test_encoding_switch() {
        let state = ProtocolState::new();
        state.set_encoding(Encoding::Amf3);
        assert_eq!(state.encoding(), Encoding::Amf3);
        state.set_encoding(Encoding::Amf0);
        assert_eq!(state.encoding(), Encoding::Amf0);
    }
}
