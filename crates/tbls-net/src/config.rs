//! Connection tuning knobs

use std::time::Duration;

use crate::handshake::MAX_CLOCK_SKEW_SECS;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Per attempt TCP connect timeout
    pub connect_timeout: Duration,
    /// Connect attempts after the first one
    pub connect_retries: u32,
    /// Pause between connect attempts
    pub retry_backoff: Duration,
    /// TLS plus handshake exchange
    pub handshake_timeout: Duration,
    /// Accepted peer clock difference, in seconds
    pub max_clock_skew: i64,
    /// Outgoing frames queued per remote party
    pub queue_capacity: usize,
    /// Inbound messages buffered before readers apply back-pressure
    pub inbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            connect_retries: 3,
            retry_backoff: Duration::from_millis(200),
            handshake_timeout: Duration::from_secs(10),
            max_clock_skew: MAX_CLOCK_SKEW_SECS,
            queue_capacity: 1024,
            inbound_capacity: 1024,
        }
    }
}
