//! Multiplexer configuration.

use sni_protocol::DEFAULT_MAX_FRAME_PAYLOAD;
use sni_transport::{Provider, SniErrorCode, TransportError};

/// Consumed-but-unacknowledged frames a session tolerates before it sends an
/// ACK.
pub const ACK_THRESHOLD: u32 = 2;

/// Send and receive highwater every session starts with.
pub const INITIAL_HIGHWATER: u32 = 4;

/// Configuration for a [`MultiplexedConnection`](crate::MultiplexedConnection).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct MuxConfig {
    /// Largest payload accepted in one inbound frame, and allowed in one
    /// outbound frame.
    pub max_frame_payload: usize,

    /// ACK threshold. Fixed at [`ACK_THRESHOLD`]; other values fail
    /// validation.
    pub ack_threshold: u32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            ack_threshold: ACK_THRESHOLD,
        }
    }
}

impl MuxConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest frame payload.
    #[must_use]
    pub fn max_frame_payload(mut self, size: usize) -> Self {
        self.max_frame_payload = size;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_frame_payload == 0 || u32::try_from(self.max_frame_payload).is_err() {
            return Err(TransportError::new(
                Provider::Smux,
                SniErrorCode::InvalidParameter,
                "max_frame_payload must be between 1 and u32::MAX",
            ));
        }
        if self.ack_threshold != ACK_THRESHOLD {
            return Err(TransportError::new(
                Provider::Smux,
                SniErrorCode::InvalidParameter,
                format!("ack_threshold must be {ACK_THRESHOLD}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MuxConfig::default();
        assert_eq!(config.max_frame_payload, DEFAULT_MAX_FRAME_PAYLOAD);
        assert_eq!(config.ack_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_payload_rejected() {
        let err = MuxConfig::new().max_frame_payload(0).validate().unwrap_err();
        assert_eq!(err.code, SniErrorCode::InvalidParameter);
    }

    #[test]
    fn test_threshold_is_fixed() {
        let mut config = MuxConfig::new();
        config.ack_threshold = 5;
        assert!(config.validate().is_err());
    }
}
