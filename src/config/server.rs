use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_MAX_LINE_LENGTH;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Interface the listener binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// TCP port (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Longest accepted frame in bytes; longer lines close the connection
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// How often the server refreshes its `_xtables.*` diagnostic keys
    #[serde(default = "default_diagnostics_interval_ms")]
    pub diagnostics_interval_ms: u64,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            max_line_length: default_max_line_length(),
            diagnostics_interval_ms: default_diagnostics_interval_ms(),
            log_dir: default_log_dir(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_address.trim().is_empty() {
            return Err(Error::InvalidConfig("listen_address cannot be empty".into()));
        }
        if self.max_line_length < 64 {
            return Err(Error::InvalidConfig(format!(
                "max_line_length {} is too small (minimum 64)",
                self.max_line_length
            )));
        }
        if self.diagnostics_interval_ms == 0 {
            return Err(Error::InvalidConfig("diagnostics_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    1735
}
fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}
fn default_diagnostics_interval_ms() -> u64 {
    1000
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
