use std::time::Duration;

use super::ClientConfig;
use super::XTablesClient;
use crate::Result;

#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set server host (default: 127.0.0.1)
    pub fn server_address(
        mut self,
        address: impl Into<String>,
    ) -> Self {
        self.config.server_address = address.into();
        self
    }

    /// Set server port (default: 1735)
    pub fn server_port(
        mut self,
        port: u16,
    ) -> Self {
        self.config.server_port = port;
        self
    }

    /// Set constant reconnect delay (default: 1s)
    pub fn reconnect_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set connection timeout (default: 2s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set cache fetch cooldown; zero disables caching (default: 10s)
    pub fn cache_fetch_cooldown(
        mut self,
        cooldown: Duration,
    ) -> Self {
        self.config.cache_fetch_cooldown = cooldown;
        self
    }

    /// Enable/disable automatic reconnects (default: enabled)
    pub fn auto_reconnect(
        mut self,
        enable: bool,
    ) -> Self {
        self.config.auto_reconnect = enable;
        self
    }

    /// Completely replaces the default configuration
    ///
    /// # Warning: Configuration Override
    /// This will discard all previous settings configured through individual
    /// methods like [`server_port`](ClientBuilder::server_port) or
    /// [`request_timeout`](ClientBuilder::request_timeout).
    ///
    /// # Example: Full Configuration
    /// ```ignore
    /// use xtables::client::{ClientBuilder, ClientConfig};
    /// use std::time::Duration;
    ///
    /// let custom_config = ClientConfig {
    ///     server_port: 4880,
    ///     request_timeout: Duration::from_secs(5),
    ///     ..ClientConfig::default()
    /// };
    ///
    /// let builder = ClientBuilder::new().set_config(custom_config);
    /// ```
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Connect with current configuration
    pub async fn build(self) -> Result<XTablesClient> {
        XTablesClient::connect(self.config).await
    }
}
