//! Connection configuration

use std::time::Duration;

use crate::protocol::constants::*;
use crate::protocol::BandwidthLimitType;

/// Tunables for a single connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Keep-alive ping period; zero disables the keep-alive job
    pub ping_interval: Duration,

    /// Window without traffic or pongs before the session is inactive
    pub max_inactivity: Duration,

    /// Time allowed between accept and a successful connect
    pub max_handshake_timeout: Duration,

    /// Wall-time bound for a single worker task
    pub max_handling_timeout: Duration,

    /// Queue depth at which inbound audio is dropped (0 = disabled)
    pub queue_threshold_for_audio_drop: u32,

    /// Read bytes between outbound BytesRead acknowledgements
    pub bytes_read_interval: u64,

    /// Limit semantics advertised in ClientBandwidth messages
    pub bandwidth_limit_type: BandwidthLimitType,

    /// Default bandwidth advertised on connect, bits per second
    pub default_bandwidth: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            max_inactivity: DEFAULT_MAX_INACTIVITY,
            max_handshake_timeout: DEFAULT_MAX_HANDSHAKE_TIMEOUT,
            max_handling_timeout: DEFAULT_MAX_HANDLING_TIMEOUT,
            queue_threshold_for_audio_drop: 0, // Disabled
            bytes_read_interval: DEFAULT_BYTES_READ_INTERVAL,
            bandwidth_limit_type: BandwidthLimitType::Dynamic,
            default_bandwidth: DEFAULT_BANDWIDTH,
        }
    }
}

impl ConnectionConfig {
    /// Set the keep-alive ping period; zero disables keep-alive
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the inactivity window
    pub fn max_inactivity(mut self, window: Duration) -> Self {
        self.max_inactivity = window;
        self
    }

    /// Set the handshake deadline
    pub fn max_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.max_handshake_timeout = timeout;
        self
    }

    /// Set the per-task handling deadline
    pub fn max_handling_timeout(mut self, timeout: Duration) -> Self {
        self.max_handling_timeout = timeout;
        self
    }

    /// Set the queue depth at which inbound audio is dropped
    pub fn queue_threshold_for_audio_drop(mut self, threshold: u32) -> Self {
        self.queue_threshold_for_audio_drop = threshold;
        self
    }

    /// Set the BytesRead acknowledgement interval
    pub fn bytes_read_interval(mut self, interval: u64) -> Self {
        self.bytes_read_interval = interval;
        self
    }

    /// Set the advertised bandwidth limit semantics
    pub fn bandwidth_limit_type(mut self, limit_type: BandwidthLimitType) -> Self {
        self.bandwidth_limit_type = limit_type;
        self
    }

    /// Set the default advertised bandwidth
    pub fn default_bandwidth(mut self, bandwidth: u32) -> Self {
        self.default_bandwidth = bandwidth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();

        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.max_inactivity, Duration::from_secs(60));
        assert_eq!(config.max_handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.queue_threshold_for_audio_drop, 0);
        assert_eq!(config.bytes_read_interval, 1024 * 1024);
        assert_eq!(config.bandwidth_limit_type, BandwidthLimitType::Dynamic);
    }

    #[test]
    fn test_builder_chaining() {
        let config = ConnectionConfig::default()
            .ping_interval(Duration::from_millis(100))
            .max_inactivity(Duration::from_millis(300))
            .max_handshake_timeout(Duration::from_secs(1))
            .queue_threshold_for_audio_drop(10)
            .bandwidth_limit_type(BandwidthLimitType::Hard);

        assert_eq!(config.ping_interval, Duration::from_millis(100));
        assert_eq!(config.max_inactivity, Duration::from_millis(300));
        assert_eq!(config.max_handshake_timeout, Duration::from_secs(1));
        assert_eq!(config.queue_threshold_for_audio_drop, 10);
        assert_eq!(config.bandwidth_limit_type, BandwidthLimitType::Hard);
    }
}
