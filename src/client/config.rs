use std::time::Duration;

use crate::constants::DEFAULT_MAX_LINE_LENGTH;

/// Client configuration parameters for the connection engine
///
/// Encapsulates the settings for reaching an XTables server and keeping the
/// connection alive, plus request and cache policy.
///
/// # Key Configuration Areas
/// - Endpoint (address, port) and reconnect policy
/// - Request lifecycle (connect and request timeouts)
/// - Read-through cache freshness
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or IP of the server
    /// Default: 127.0.0.1
    pub server_address: String,

    /// TCP port of the server
    /// Default: 1735
    pub server_port: u16,

    /// Constant delay between reconnect attempts
    /// Default: 1 second
    pub reconnect_delay: Duration,

    /// Maximum time to wait for a correlated response in `complete()`
    /// Default: 3 seconds
    pub request_timeout: Duration,

    /// Maximum time to wait for a TCP connection to be established
    /// Default: 2 seconds
    pub connect_timeout: Duration,

    /// Minimum age before a cached value is fetched again from the server.
    /// Push events invalidate immediately regardless of this value.
    /// Zero disables caching of reads.
    /// Default: 10 seconds
    pub cache_fetch_cooldown: Duration,

    /// Reconnect automatically after the connection drops
    /// Default: true
    pub auto_reconnect: bool,

    /// Largest frame accepted from the server, in bytes
    /// Default: 16MB
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 1735,
            reconnect_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(3000),
            connect_timeout: Duration::from_millis(2000),
            cache_fetch_cooldown: Duration::from_secs(10),
            auto_reconnect: true,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}
