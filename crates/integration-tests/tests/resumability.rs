//! A replay interrupted part way can be started again from the top.

#![allow(clippy::unwrap_used)]

use flor_integration_tests::{Faults, FlakyStore, INJECTED, seed_legacy_store};
use flor_migrate::replay::{ReplayError, ReplayOptions, restore};
use flor_migrate::snapshot;
use flor_migrate::store::{EntityKind, MemoryStore, Store};

#[tokio::test]
async fn test_rerun_after_failure_between_categories_and_products() {
    let snapshot = snapshot::capture(&seed_legacy_store().await).await.unwrap();

    let faults = Faults::new();
    faults.fail_next_upsert(EntityKind::Product);
    let target = MemoryStore::multi_category();
    let flaky = FlakyStore::new(target.clone(), faults);

    let err = restore(&flaky, &snapshot, &ReplayOptions { concurrency: 1 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReplayError::Store {
            kind: EntityKind::Product,
            ..
        }
    ));
    assert!(err.to_string().contains(INJECTED));
    assert_eq!(target.count(EntityKind::User).await.unwrap(), 2);
    assert_eq!(target.count(EntityKind::Category).await.unwrap(), 2);
    assert_eq!(target.count(EntityKind::Cart).await.unwrap(), 0);

    restore(&flaky, &snapshot, &ReplayOptions { concurrency: 1 })
        .await
        .unwrap();

    let uninterrupted = MemoryStore::multi_category();
    restore(&uninterrupted, &snapshot, &ReplayOptions::default())
        .await
        .unwrap();

    assert_eq!(
        target.export().await.unwrap(),
        uninterrupted.export().await.unwrap()
    );
}

#[tokio::test]
async fn test_rerun_after_failure_in_cart_items() {
    let snapshot = snapshot::capture(&seed_legacy_store().await).await.unwrap();

    let faults = Faults::new();
    faults.fail_next_upsert(EntityKind::CartItem);
    let target = MemoryStore::multi_category();
    let flaky = FlakyStore::new(target.clone(), faults);

    assert!(restore(&flaky, &snapshot, &ReplayOptions::default()).await.is_err());
    assert_eq!(target.count(EntityKind::Cart).await.unwrap(), 2);

    let report = restore(&flaky, &snapshot, &ReplayOptions::default())
        .await
        .unwrap();
    assert_eq!(report.count(EntityKind::CartItem), 2);
    assert_eq!(target.count(EntityKind::CartItem).await.unwrap(), 2);
}
