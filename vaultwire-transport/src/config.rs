//! Transport configuration.

use std::time::Duration;

use vaultwire_core::DEFAULT_MAX_PAYLOAD;

/// Default time allowed for a single frame read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed for a single frame write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the whole key exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Limits applied to one connection.
///
/// Every expiry is a connection failure. Nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest payload accepted from or sealed for the peer.
    pub max_payload: usize,
    /// Bound on each frame read.
    pub read_timeout: Duration,
    /// Bound on each frame write.
    pub write_timeout: Duration,
    /// Bound on the whole handshake.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Set the maximum payload size.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Set the per-read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the per-write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = TransportConfig::default()
            .with_max_payload(1024)
            .with_read_timeout(Duration::from_millis(5))
            .with_write_timeout(Duration::from_millis(6))
            .with_handshake_timeout(Duration::from_millis(7));

        assert_eq!(config.max_payload, 1024);
        assert_eq!(config.read_timeout, Duration::from_millis(5));
        assert_eq!(config.write_timeout, Duration::from_millis(6));
        assert_eq!(config.handshake_timeout, Duration::from_millis(7));
    }

    #[test]
    fn test_default_payload_matches_core() {
        assert_eq!(TransportConfig::default().max_payload, 64 * 1024);
    }
}
