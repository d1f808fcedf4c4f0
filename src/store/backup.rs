use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use tracing::info;

use super::Store;
use super::StoreNode;
use crate::utils::time::get_now_as_millis;
use crate::Result;
use crate::StoreError;

/// On-disk backup document
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupDocument {
    #[serde(default)]
    pub comment: String,
    /// Unix epoch milliseconds
    #[serde(rename = "savedAt", default)]
    pub saved_at: u64,
    pub data: BTreeMap<String, StoreNode>,
}

fn backup_error(
    path: &Path,
    reason: impl ToString,
) -> StoreError {
    StoreError::Backup {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Serializes the full store and writes it to `path`.
///
/// The document is written to a sibling temp file first and renamed into
/// place, so an interrupted save never leaves a truncated backup.
///
/// # Errors
/// `StoreError::Backup` on serialization or filesystem failure.
pub async fn save_backup(
    store: &Store,
    path: &Path,
    comment: &str,
) -> Result<()> {
    let document = BackupDocument {
        comment: comment.to_string(),
        saved_at: get_now_as_millis(),
        data: store.snapshot(),
    };
    let body = serde_json::to_vec_pretty(&document).map_err(|e| backup_error(path, e))?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| backup_error(path, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| backup_error(path, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        error!(?path, "failed to move backup into place: {e}");
        backup_error(path, e)
    })?;

    info!(?path, bytes = body.len(), "backup saved");
    Ok(())
}

/// Restores the store from a document written by [`save_backup`].
pub async fn load_backup(
    store: &Store,
    path: &Path,
) -> Result<BackupDocument> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| backup_error(path, e))?;
    let document: BackupDocument = serde_json::from_slice(&body).map_err(|e| backup_error(path, e))?;
    store.replace_tree(document.data.clone())?;
    info!(?path, comment = %document.comment, "backup restored");
    Ok(document)
}
