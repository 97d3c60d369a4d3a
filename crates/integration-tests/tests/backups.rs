//! Snapshot files on disk.

#![allow(clippy::unwrap_used)]

use flor_integration_tests::seed_legacy_store;
use flor_migrate::replay::{ReplayOptions, restore};
use flor_migrate::snapshot::{self, SnapshotError, SnapshotVersion};
use flor_migrate::store::{EntityKind, MemoryStore, Store};

#[tokio::test]
async fn test_two_backups_in_one_process_get_distinct_files() {
    let store = seed_legacy_store().await;
    let dir = tempfile::tempdir().unwrap();

    let first = snapshot::backup(&store, dir.path()).await.unwrap();
    let second = snapshot::backup(&store, dir.path()).await.unwrap();

    assert_ne!(first, second);
    let first = snapshot::read(&first).await.unwrap();
    let second = snapshot::read(&second).await.unwrap();
    assert_eq!(first.stats(), second.stats());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_document_without_version_reads_as_version_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backup-1736510400000.json");
    std::fs::write(
        &path,
        r#"{
            "timestamp": "2025-01-10T12:00:00.000Z",
            "users": [{ "id": 1, "name": "Admin", "email": "admin@flordemaio.com.br" }],
            "categories": [],
            "products": [],
            "carts": [{
                "id": 1, "uid": "abcd1234", "customerName": "Ana",
                "createdAt": "2025-01-10T12:00:00.000Z", "updatedAt": "2025-01-10T12:00:00.000Z",
                "items": []
            }]
        }"#,
    )
    .unwrap();

    let snapshot = snapshot::read(&path).await.unwrap();
    assert_eq!(snapshot.version, SnapshotVersion::V1);
    assert!(snapshot.product_images.is_empty());
    assert!(snapshot.config.is_none());

    let target = MemoryStore::multi_category();
    restore(&target, &snapshot, &ReplayOptions::default())
        .await
        .unwrap();
    assert_eq!(target.count(EntityKind::Cart).await.unwrap(), 1);
}

#[tokio::test]
async fn test_invalid_values_make_the_snapshot_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let cases = [
        ("bad-email", r#"{"id":1,"name":"A","email":"nope"}"#, "[]"),
        (
            "bad-uid",
            "",
            r#"[{"id":1,"uid":"SHOUTING","createdAt":"2025-01-10T12:00:00Z","updatedAt":"2025-01-10T12:00:00Z","items":[]}]"#,
        ),
    ];

    for (name, user, carts) in cases {
        let users = if user.is_empty() { "[]".to_owned() } else { format!("[{user}]") };
        let path = dir.path().join(format!("{name}.json"));
        std::fs::write(
            &path,
            format!(
                r#"{{"timestamp":"2025-01-10T12:00:00Z","users":{users},"categories":[],"products":[],"carts":{carts}}}"#
            ),
        )
        .unwrap();

        assert!(
            matches!(snapshot::read(&path).await, Err(SnapshotError::Corrupt { .. })),
            "{name} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_unparsable_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backup-1.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = snapshot::read(&path).await.unwrap_err();
    assert!(err.to_string().contains("backup-1.json"));
}
