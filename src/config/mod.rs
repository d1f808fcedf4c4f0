//! Server configuration.
//!
//! Sources are merged in increasing priority:
//! 1. Type defaults
//! 2. File named by the `CONFIG_PATH` environment variable
//! 3. Explicit override files passed to [`XTablesConfig::with_override_config`]
//! 4. `XTABLES__`-prefixed environment variables

mod monitoring;
mod server;
mod store;
pub use monitoring::*;
pub use server::*;
pub use store::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "XTABLES";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct XTablesConfig {
    /// Listener and per-connection parameters
    #[serde(default)]
    pub server: ServerConfig,
    /// Tree protection and backup settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Metrics and monitoring settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl XTablesConfig {
    /// Loads defaults, the `CONFIG_PATH` file and environment overrides
    /// without validating. Call [`validate`](Self::validate) afterwards.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Layers `path` over the current values; environment variables still win.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated configuration.
    ///
    /// # Errors
    /// `Error::InvalidConfig` from the first failing section.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.store.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("store.flagged_prefixes")
        .ignore_empty(true)
        .try_parsing(true)
}
