use std::time::Duration;

/// Timing knobs shared by the server session and the client manager.
///
/// All three are independent and read once at startup, either from the
/// environment (`PULSE_HEARTBEAT_MS`, `PULSE_CONNECT_TIMEOUT_MS`,
/// `PULSE_RECONNECT_MS`) or from explicit configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamTiming {
    /// Interval between server heartbeat writes.
    pub heartbeat_interval: Duration,
    /// How long the client waits for a stream to reach Open before treating
    /// the attempt as failed. Some transports never signal an error for a
    /// silently-unavailable endpoint.
    pub connect_timeout: Duration,
    /// Fixed delay between client reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl StreamTiming {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heartbeat_interval: env_ms("PULSE_HEARTBEAT_MS")
                .unwrap_or(defaults.heartbeat_interval),
            connect_timeout: env_ms("PULSE_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout),
            reconnect_delay: env_ms("PULSE_RECONNECT_MS").unwrap_or(defaults.reconnect_delay),
        }
    }
}

fn env_ms(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
