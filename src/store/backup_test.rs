use std::sync::Arc;

use super::*;
use crate::Error;
use crate::StoreError;

fn test_store() -> Store {
    Store::new(Arc::new(SessionRegistry::new()), Vec::new())
}

#[tokio::test]
async fn backup_roundtrip_restores_all_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("backup.json");

    let store = test_store();
    store.put("robot.arm.angle", "42.5").unwrap();
    store.put("robot.name", "\"xbot\"").unwrap();
    save_backup(&store, &path, "before match").await.unwrap();

    let restored = test_store();
    let document = load_backup(&restored, &path).await.unwrap();

    assert_eq!(document.comment, "before match");
    assert!(document.saved_at > 0);
    assert_eq!(restored.entries(), store.entries());
}

#[tokio::test]
async fn missing_backup_file_is_a_backup_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store();

    let result = load_backup(&store, &dir.path().join("absent.json")).await;
    assert!(matches!(result, Err(Error::Store(StoreError::Backup { .. }))));
}

#[tokio::test]
async fn corrupt_backup_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.json");
    tokio::fs::write(&path, b"{\"data\": 17}").await.unwrap();

    let store = test_store();
    store.put("keep", "1").unwrap();
    assert!(load_backup(&store, &path).await.is_err());
    assert_eq!(store.get("keep").as_deref(), Some("1"));
}
