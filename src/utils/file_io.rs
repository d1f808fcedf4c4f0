use std::fs::create_dir_all;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;

use tracing::error;

use crate::Result;

/// File the server binary appends its trace output to, inside `log_dir`.
pub const LOG_FILE_NAME: &str = "xtables.log";

/// Opens `<log_dir>/xtables.log` for appending, creating the directory
/// tree when missing.
pub fn open_log_file(log_dir: &Path) -> Result<File> {
    if !log_dir.exists() {
        if let Err(e) = create_dir_all(log_dir) {
            error!("Failed to create log directory {:?}: {:?}", log_dir, e);
            return Err(e.into());
        }
    }
    let log_file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_dir.join(LOG_FILE_NAME))?;
    Ok(log_file)
}
