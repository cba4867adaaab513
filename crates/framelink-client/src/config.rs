use std::time::Duration;

use framelink_frame::DEFAULT_CONFIDENCE;

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Consecutive automatic reconnects before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each automatic reconnect.
    pub reconnect_delay: Duration,
    /// Confidence written into outbound frames until changed.
    pub confidence: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(2000),
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}
