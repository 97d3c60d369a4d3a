//! Snapshot replay (Restore).
//!
//! Writes a snapshot back into a store on the multi-category schema, one
//! entity kind at a time in dependency order:
//!
//! 1. users
//! 2. categories
//! 3. products, then their category join rows
//! 4. product images
//! 5. carts, then cart items
//! 6. site config
//!
//! Each pass is a batch of idempotent upserts, so a replay interrupted at any
//! point can be started again from the top. References are checked before
//! the pass that would write them: a product naming an unknown category, or a
//! cart item naming an unknown product, stops the replay before any row of
//! that pass is written. A reference resolves only if the target is in the
//! snapshot itself; rows already in the store do not count.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::{info, instrument};

use flor_core::{CartId, CartItemId};

use crate::cart_rules::cart_pass_records;
use crate::remap::associations;
use crate::site_config::ensure_config;
use crate::snapshot::Snapshot;
use crate::store::{EntityKind, Record, RecordKey, SchemaShape, Store, StoreError};
use crate::upsert::upsert_all;

/// Default number of upserts in flight per pass.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Errors that stop a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("restore target is on the {0} schema, expected multi-category")]
    WrongShape(SchemaShape),

    #[error("{from} references {missing}, which is not in the snapshot")]
    DanglingReference { from: RecordKey, missing: RecordKey },

    #[error("cart item {item} is nested under cart {nested_under} but belongs to cart {cart_id}")]
    MisplacedItem {
        item: CartItemId,
        nested_under: CartId,
        cart_id: CartId,
    },

    #[error("verification failed for {kind}: expected at least {expected} rows, found {found}")]
    VerificationFailed {
        kind: EntityKind,
        expected: u64,
        found: u64,
    },

    #[error("{kind} pass failed: {source}")]
    Store {
        kind: EntityKind,
        #[source]
        source: StoreError,
    },

    #[error("failed to reseed identity sequences: {0}")]
    Reseed(#[source] StoreError),
}

impl ReplayError {
    fn store(kind: EntityKind) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { kind, source }
    }
}

/// Replay tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Upserts in flight per pass. Capped by the store's own limit.
    pub concurrency: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Rows written per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub upserted: BTreeMap<EntityKind, usize>,
    /// The snapshot had no config and a default row was ensured.
    pub default_config: bool,
}

impl ReplayReport {
    /// Rows written for one kind.
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        self.upserted.get(&kind).copied().unwrap_or(0)
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in EntityKind::ALL {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{kind}={}", self.count(kind))?;
        }
        Ok(())
    }
}

/// Check that every `(from, missing)` reference names a row in the snapshot.
fn check_references(
    known: &HashSet<RecordKey>,
    references: impl IntoIterator<Item = (RecordKey, RecordKey)>,
) -> Result<(), ReplayError> {
    for (from, target) in references {
        if !known.contains(&target) {
            return Err(ReplayError::DanglingReference {
                from,
                missing: target,
            });
        }
    }
    Ok(())
}

struct Passes<'a, S> {
    store: &'a S,
    concurrency: usize,
    report: ReplayReport,
}

impl<S: Store> Passes<'_, S> {
    async fn run(&mut self, kind: EntityKind, records: &[Record]) -> Result<(), ReplayError> {
        let written = upsert_all(self.store, records, self.concurrency)
            .await
            .map_err(ReplayError::store(kind))?;
        self.report.upserted.insert(kind, written);
        info!(kind = %kind, count = written, "Replayed pass");
        Ok(())
    }
}

/// Expected minimum row counts after replaying `snapshot`.
fn expected_counts(snapshot: &Snapshot, links: usize) -> [(EntityKind, usize); 8] {
    let stats = snapshot.stats();
    [
        (EntityKind::User, stats.users),
        (EntityKind::Category, stats.categories),
        (EntityKind::Product, stats.products),
        (EntityKind::ProductCategory, links),
        (EntityKind::ProductImage, stats.product_images),
        (EntityKind::Cart, stats.carts),
        (EntityKind::CartItem, stats.cart_items),
        (EntityKind::SiteConfig, 1),
    ]
}

/// Replay a snapshot into `store`.
///
/// # Errors
///
/// Returns `ReplayError::WrongShape` if the store has not been migrated,
/// `DanglingReference` or `MisplacedItem` for an inconsistent snapshot,
/// `Store` if an upsert fails and `VerificationFailed` if a table ends up
/// with fewer rows than the snapshot holds.
#[instrument(skip(store, snapshot), fields(version = %snapshot.version, taken_at = %snapshot.timestamp))]
pub async fn restore<S: Store>(
    store: &S,
    snapshot: &Snapshot,
    options: &ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    if store.shape() != SchemaShape::MultiCategory {
        return Err(ReplayError::WrongShape(store.shape()));
    }

    let concurrency = store
        .max_concurrency()
        .map_or(options.concurrency, |limit| options.concurrency.min(limit))
        .max(1);
    let mut passes = Passes {
        store,
        concurrency,
        report: ReplayReport::default(),
    };

    let users: Vec<Record> = snapshot.users.iter().cloned().map(Record::User).collect();
    passes.run(EntityKind::User, &users).await?;

    let categories: Vec<Record> = snapshot
        .categories
        .iter()
        .cloned()
        .map(Record::Category)
        .collect();
    passes.run(EntityKind::Category, &categories).await?;

    let known_categories: HashSet<RecordKey> = categories.iter().map(Record::key).collect();
    check_references(
        &known_categories,
        snapshot.products.iter().flat_map(|entry| {
            let from = RecordKey::Product(entry.product.id);
            entry
                .referenced_categories()
                .map(move |id| (from, RecordKey::Category(id)))
        }),
    )?;

    let products: Vec<Record> = snapshot
        .products
        .iter()
        .map(|entry| Record::Product(entry.product.clone()))
        .collect();
    passes.run(EntityKind::Product, &products).await?;

    let links: Vec<Record> = snapshot
        .products
        .iter()
        .flat_map(associations)
        .map(Record::ProductCategory)
        .collect();
    passes.run(EntityKind::ProductCategory, &links).await?;

    let known_products: HashSet<RecordKey> = products.iter().map(Record::key).collect();
    check_references(
        &known_products,
        snapshot.product_images.iter().map(|image| {
            (
                RecordKey::ProductImage(image.id),
                RecordKey::Product(image.product_id),
            )
        }),
    )?;
    let images: Vec<Record> = snapshot
        .product_images
        .iter()
        .cloned()
        .map(Record::ProductImage)
        .collect();
    passes.run(EntityKind::ProductImage, &images).await?;

    let (carts, items) = cart_pass_records(&snapshot.carts)?;
    check_references(
        &known_products,
        items.iter().filter_map(|record| match record {
            Record::CartItem(item) => Some((
                RecordKey::CartItem(item.id),
                RecordKey::Product(item.product_id),
            )),
            _ => None,
        }),
    )?;
    passes.run(EntityKind::Cart, &carts).await?;
    passes.run(EntityKind::CartItem, &items).await?;

    if let Some(config) = &snapshot.config {
        passes
            .run(EntityKind::SiteConfig, &[Record::SiteConfig(config.clone())])
            .await?;
    } else {
        ensure_config(store)
            .await
            .map_err(ReplayError::store(EntityKind::SiteConfig))?;
        passes.report.default_config = true;
    }

    store
        .reseed_identities()
        .await
        .map_err(ReplayError::Reseed)?;

    for (kind, expected) in expected_counts(snapshot, links.len()) {
        let found = store.count(kind).await.map_err(ReplayError::store(kind))?;
        let expected = u64::try_from(expected).unwrap_or(u64::MAX);
        if found < expected {
            return Err(ReplayError::VerificationFailed {
                kind,
                expected,
                found,
            });
        }
    }

    info!(report = %passes.report, "Replay verified");
    Ok(passes.report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use flor_core::{
        Cart, CartItem, CartUid, Category, CategoryId, Email, Price, Product, ProductId, Quantity,
        User, UserId,
    };

    use super::*;
    use crate::snapshot::{SnapshotCart, SnapshotProduct, SnapshotVersion};
    use crate::store::MemoryStore;

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    fn product(id: i32, price: &str) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Arranjo {id}"),
            description: None,
            price: Price::parse(price).unwrap(),
            image_url: None,
            active: true,
            created_at: at(),
            updated_at: at(),
        }
    }

    fn cart(id: i32, uid: &str, items: Vec<CartItem>) -> SnapshotCart {
        SnapshotCart {
            cart: Cart {
                id: CartId::new(id),
                uid: CartUid::parse(uid).unwrap(),
                customer_name: None,
                phone: None,
                note: None,
                delivery_method: None,
                address: None,
                payment_method: None,
                needs_change: false,
                change_for: None,
                recipient_name: None,
                recipient_phone: None,
                created_at: at(),
                updated_at: at(),
            },
            items,
        }
    }

    fn item(id: i32, cart_id: i32, product_id: i32, price: &str) -> CartItem {
        CartItem {
            id: CartItemId::new(id),
            cart_id: CartId::new(cart_id),
            product_id: ProductId::new(product_id),
            qty: Quantity::new(1).unwrap(),
            price: Price::parse(price).unwrap(),
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            version: SnapshotVersion::V1,
            timestamp: at(),
            users: vec![User {
                id: UserId::new(1),
                name: "Admin".to_owned(),
                email: Email::parse("admin@flordemaio.com.br").unwrap(),
            }],
            categories: vec![Category {
                id: CategoryId::new(5),
                name: "Rosas".to_owned(),
                image_url: None,
            }],
            products: vec![
                SnapshotProduct::legacy(product(1, "20.00"), Some(CategoryId::new(5))),
                SnapshotProduct::legacy(product(2, "9.90"), None),
            ],
            product_images: vec![],
            carts: vec![cart(1, "abcd1234", vec![item(1, 1, 1, "15.00")])],
            config: None,
        }
    }

    #[tokio::test]
    async fn test_restore_reports_counts() {
        let store = MemoryStore::multi_category();
        let report = restore(&store, &snapshot(), &ReplayOptions::default())
            .await
            .unwrap();

        assert_eq!(report.count(EntityKind::Product), 2);
        assert_eq!(report.count(EntityKind::ProductCategory), 1);
        assert_eq!(report.count(EntityKind::CartItem), 1);
        assert!(report.default_config);
        assert_eq!(store.count(EntityKind::SiteConfig).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_restore_requires_migrated_schema() {
        let store = MemoryStore::legacy();
        let err = restore(&store, &snapshot(), &ReplayOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::WrongShape(SchemaShape::Legacy)));
    }

    #[tokio::test]
    async fn test_unknown_category_stops_before_products() {
        let store = MemoryStore::multi_category();
        let mut snapshot = snapshot();
        snapshot.products[1].category_id = Some(CategoryId::new(99));

        let err = restore(&store, &snapshot, &ReplayOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::DanglingReference {
                missing: RecordKey::Category(id),
                ..
            } if id == CategoryId::new(99)
        ));
        assert_eq!(store.count(EntityKind::Product).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_category_only_in_store_is_dangling() {
        let store = MemoryStore::multi_category();
        store
            .upsert(&Record::Category(Category {
                id: CategoryId::new(99),
                name: "Tulipas".to_owned(),
                image_url: None,
            }))
            .await
            .unwrap();
        let mut snapshot = snapshot();
        snapshot.products[1].category_id = Some(CategoryId::new(99));

        let err = restore(&store, &snapshot, &ReplayOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::DanglingReference {
                missing: RecordKey::Category(id),
                ..
            } if id == CategoryId::new(99)
        ));
        assert_eq!(store.count(EntityKind::Product).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replayed_item_keeps_snapshot_price() {
        let store = MemoryStore::multi_category();
        restore(&store, &snapshot(), &ReplayOptions::default())
            .await
            .unwrap();

        let stored = store
            .find_by_id(&RecordKey::CartItem(CartItemId::new(1)))
            .await
            .unwrap();
        let Some(Record::CartItem(stored)) = stored else {
            panic!("cart item missing");
        };
        assert_eq!(stored.price, Price::parse("15.00").unwrap());
    }

    #[test]
    fn test_report_display_lists_every_kind() {
        let report = ReplayReport::default();
        let text = report.to_string();
        for kind in EntityKind::ALL {
            assert!(text.contains(kind.table()));
        }
    }
}
