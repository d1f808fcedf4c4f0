use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DIAGNOSTICS_ROOT;
use crate::key;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Subtrees external clients may read but never write
    #[serde(default = "default_flagged_prefixes")]
    pub flagged_prefixes: Vec<String>,

    /// Backup restored at startup when the file exists
    #[serde(default)]
    pub restore_from: Option<PathBuf>,

    /// Where a backup is written on graceful shutdown (disabled when unset)
    #[serde(default)]
    pub backup_on_shutdown: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flagged_prefixes: default_flagged_prefixes(),
            restore_from: None,
            backup_on_shutdown: None,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        for prefix in &self.flagged_prefixes {
            key::validate(prefix)
                .map_err(|e| Error::InvalidConfig(format!("flagged prefix '{prefix}': {e}")))?;
        }
        Ok(())
    }
}

fn default_flagged_prefixes() -> Vec<String> {
    vec![DIAGNOSTICS_ROOT.to_string()]
}
