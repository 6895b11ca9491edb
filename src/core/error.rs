//! Error types for the bridge.
//!
//! Expected failures are values, not panics: each operation returns a
//! `Result` and the caller decides whether the failure is fatal (configuration,
//! MQTT authentication) or transient (bus send, state persistence).

use thiserror::Error;

/// Bridge error type.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid configuration (fatal at startup).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// CAN bus could not be opened or is unavailable.
    #[error("CAN bus unavailable: {0}")]
    Connection(String),

    /// A CAN frame could not be handed to the bus (transient, logged and
    /// swallowed by callers).
    #[error("CAN send failed: {0}")]
    BusSend(String),

    /// Inbound CAN frame shorter than its format requires.
    #[error("malformed frame 0x{arb_id:08X}: {reason}")]
    FrameMalformed {
        /// Arbitration ID of the offending frame.
        arb_id: u32,
        /// Why the frame was rejected.
        reason: String,
    },

    /// An MQTT command payload could not be parsed.
    #[error("MQTT command parse failed: {0}")]
    MqttParse(String),

    /// A retained MQTT command was older than the replay window.
    #[error("stale retained command (age {age_secs} s)")]
    StaleRetainedCommand {
        /// Age of the message at receive time.
        age_secs: u64,
    },

    /// The state file could not be read or written.
    #[error("state persistence failed: {0}")]
    StatePersist(#[source] std::io::Error),

    /// MQTT broker rejected our credentials (fatal at startup).
    #[error("MQTT authentication failed: {0}")]
    MqttAuth(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = BridgeError::Config("duplicate entity_id 'galley'".to_string());
        assert!(e.to_string().contains("duplicate entity_id"));

        let e = BridgeError::FrameMalformed {
            arb_id: 0x021606B8,
            reason: "expected 8 bytes, got 4".to_string(),
        };
        assert!(e.to_string().contains("0x021606B8"));

        let e = BridgeError::StaleRetainedCommand { age_secs: 400 };
        assert!(e.to_string().contains("400"));
    }
}
