//! Snapshot files.
//!
//! A snapshot is a point-in-time export of every table, written once as a
//! self-describing JSON document and only read afterwards.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 2,
//!   "timestamp": "2025-01-10T12:00:00Z",
//!   "users": [...],
//!   "categories": [...],
//!   "products": [{ "id": 1, ..., "categoryIds": [5] }],
//!   "productImages": [...],
//!   "carts": [{ "id": 1, "uid": "abcd1234", ..., "items": [...] }],
//!   "config": { "id": 1, "heroImageUrl": "...", "updatedAt": "..." }
//! }
//! ```
//!
//! Version 1 documents carry a nullable `categoryId` per product instead of
//! `categoryIds`. Files written before the version tag existed have no
//! `version` field and are read as version 1.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use flor_core::{Cart, CartId, CartItem, Category, CategoryId, Product, ProductId, ProductImage, SiteConfig, User};

use crate::store::{Dataset, SchemaShape, Store, StoreError};

/// Errors that can occur reading or writing snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The file is missing, unparsable or internally inconsistent.
    #[error("corrupt snapshot {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Writing the snapshot file failed.
    #[error("failed to write snapshot in {}: {source}", dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the store failed.
    #[error("failed to capture snapshot: {0}")]
    Capture(#[from] StoreError),
}

/// Document format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SnapshotVersion {
    /// Single nullable `categoryId` per product.
    #[default]
    V1,
    /// `categoryIds` array per product.
    V2,
}

/// Error for a version number this build does not understand.
#[derive(Debug, Clone, Copy, Error)]
#[error("unknown snapshot version {0}")]
pub struct UnknownVersion(pub u32);

impl TryFrom<u32> for SnapshotVersion {
    type Error = UnknownVersion;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(UnknownVersion(other)),
        }
    }
}

impl From<SnapshotVersion> for u32 {
    fn from(version: SnapshotVersion) -> Self {
        match version {
            SnapshotVersion::V1 => 1,
            SnapshotVersion::V2 => 2,
        }
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", u32::from(*self))
    }
}

/// A product plus its category reference(s) in the shape of the snapshot
/// version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotProduct {
    #[serde(flatten)]
    pub product: Product,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_ids: Option<Vec<CategoryId>>,
}

impl SnapshotProduct {
    /// A version 1 entry.
    #[must_use]
    pub const fn legacy(product: Product, category_id: Option<CategoryId>) -> Self {
        Self {
            product,
            category_id,
            category_ids: None,
        }
    }

    /// A version 2 entry.
    #[must_use]
    pub const fn multi(product: Product, category_ids: Vec<CategoryId>) -> Self {
        Self {
            product,
            category_id: None,
            category_ids: Some(category_ids),
        }
    }

    /// Every category this product references, whatever the version.
    pub fn referenced_categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.category_id
            .into_iter()
            .chain(self.category_ids.iter().flatten().copied())
    }
}

/// A cart with its items nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCart {
    #[serde(flatten)]
    pub cart: Cart,
    pub items: Vec<CartItem>,
}

/// A point-in-time export of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub version: SnapshotVersion,
    pub timestamp: DateTime<Utc>,
    pub users: Vec<User>,
    pub categories: Vec<Category>,
    pub products: Vec<SnapshotProduct>,
    #[serde(default)]
    pub product_images: Vec<ProductImage>,
    pub carts: Vec<SnapshotCart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SiteConfig>,
}

/// Per-kind record counts of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotStats {
    pub users: usize,
    pub categories: usize,
    pub products: usize,
    pub category_links: usize,
    pub product_images: usize,
    pub carts: usize,
    pub cart_items: usize,
    pub config: bool,
}

impl fmt::Display for SnapshotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "users={} categories={} products={} category_links={} product_images={} carts={} cart_items={} config={}",
            self.users,
            self.categories,
            self.products,
            self.category_links,
            self.product_images,
            self.carts,
            self.cart_items,
            if self.config { "yes" } else { "no" },
        )
    }
}

impl Snapshot {
    /// Build a snapshot from a store export.
    ///
    /// The version follows the shape of the store the data came from.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::Capture` if a cart item or category link points
    /// at a row the export does not contain.
    pub fn from_dataset(dataset: Dataset, timestamp: DateTime<Utc>) -> Result<Self, SnapshotError> {
        let mut links: BTreeMap<ProductId, Vec<CategoryId>> = BTreeMap::new();
        for link in &dataset.product_categories {
            links.entry(link.product_id).or_default().push(link.category_id);
        }

        let (version, products) = match dataset.shape {
            SchemaShape::Legacy => {
                let mut products = Vec::with_capacity(dataset.products.len());
                for product in dataset.products {
                    let category_id = match links.remove(&product.id).as_deref() {
                        None | Some([]) => None,
                        Some([only]) => Some(*only),
                        Some(_) => {
                            return Err(StoreError::DataCorruption(format!(
                                "product {} has several categories on the legacy schema",
                                product.id
                            ))
                            .into());
                        }
                    };
                    products.push(SnapshotProduct::legacy(product, category_id));
                }
                (SnapshotVersion::V1, products)
            }
            SchemaShape::MultiCategory => {
                let products = dataset
                    .products
                    .into_iter()
                    .map(|product| {
                        let ids = links.remove(&product.id).unwrap_or_default();
                        SnapshotProduct::multi(product, ids)
                    })
                    .collect();
                (SnapshotVersion::V2, products)
            }
        };

        if let Some(product_id) = links.keys().next() {
            return Err(StoreError::DataCorruption(format!(
                "category link for missing product {product_id}"
            ))
            .into());
        }

        let mut items: BTreeMap<CartId, Vec<CartItem>> = BTreeMap::new();
        for item in dataset.cart_items {
            items.entry(item.cart_id).or_default().push(item);
        }
        let carts = dataset
            .carts
            .into_iter()
            .map(|cart| SnapshotCart {
                items: items.remove(&cart.id).unwrap_or_default(),
                cart,
            })
            .collect();
        if let Some(cart_id) = items.keys().next() {
            return Err(
                StoreError::DataCorruption(format!("cart items for missing cart {cart_id}")).into(),
            );
        }

        Ok(Self {
            version,
            timestamp,
            users: dataset.users,
            categories: dataset.categories,
            products,
            product_images: dataset.product_images,
            carts,
            config: dataset.config,
        })
    }

    /// Per-kind record counts.
    #[must_use]
    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            users: self.users.len(),
            categories: self.categories.len(),
            products: self.products.len(),
            category_links: self
                .products
                .iter()
                .map(|p| p.referenced_categories().count())
                .sum(),
            product_images: self.product_images.len(),
            carts: self.carts.len(),
            cart_items: self.carts.iter().map(|c| c.items.len()).sum(),
            config: self.config.is_some(),
        }
    }

    /// Check that every product entry matches the version tag.
    fn check_version_shape(&self) -> Result<(), String> {
        for entry in &self.products {
            let id = entry.product.id;
            match self.version {
                SnapshotVersion::V1 if entry.category_ids.is_some() => {
                    return Err(format!("version 1 product {id} carries categoryIds"));
                }
                SnapshotVersion::V2 if entry.category_id.is_some() => {
                    return Err(format!("version 2 product {id} carries categoryId"));
                }
                SnapshotVersion::V2 if entry.category_ids.is_none() => {
                    return Err(format!("version 2 product {id} is missing categoryIds"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Read the whole store into a snapshot.
///
/// # Errors
///
/// Returns `SnapshotError::Capture` if the export fails.
#[instrument(skip(store), fields(shape = %store.shape()))]
pub async fn capture<S: Store>(store: &S) -> Result<Snapshot, SnapshotError> {
    let dataset = store.export().await?;
    Snapshot::from_dataset(dataset, Utc::now())
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Epoch milliseconds, strictly increasing within the process.
fn next_stamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_STAMP
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

async fn write_file(tmp: &Path, path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, path).await
}

/// Write a snapshot to `dir/backup-<epoch-millis>.json`.
///
/// Creates `dir` if needed and never replaces an existing file. The document
/// lands under a `.tmp` name first and is renamed once it is on disk.
///
/// # Errors
///
/// Returns `SnapshotError::Io` if the directory or file cannot be written.
pub async fn write(snapshot: &Snapshot, dir: &Path) -> Result<PathBuf, SnapshotError> {
    let io_error = |source: std::io::Error| SnapshotError::Io {
        dir: dir.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
    let body = serde_json::to_vec_pretty(snapshot).map_err(|e| io_error(e.into()))?;

    loop {
        let path = dir.join(format!("backup-{}.json", next_stamp()));
        if tokio::fs::try_exists(&path).await.map_err(io_error)? {
            continue;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        return match write_file(&tmp, &path, &body).await {
            Ok(()) => Ok(path),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(io_error(e))
            }
        };
    }
}

/// Read and validate a snapshot file.
///
/// # Errors
///
/// Returns `SnapshotError::Corrupt` if the file is missing, unparsable,
/// lacks a required array, has an unknown version or a product entry that
/// does not match the version.
pub async fn read(path: &Path) -> Result<Snapshot, SnapshotError> {
    let corrupt = |reason: String| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| corrupt(e.to_string()))?;
    let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    snapshot.check_version_shape().map_err(corrupt)?;
    Ok(snapshot)
}

/// Capture the store and write the snapshot, returning the file path.
///
/// # Errors
///
/// Returns `SnapshotError` if either step fails.
#[instrument(skip(store))]
pub async fn backup<S: Store>(store: &S, dir: &Path) -> Result<PathBuf, SnapshotError> {
    let snapshot = capture(store).await?;
    let path = write(&snapshot, dir).await?;
    info!(
        path = %path.display(),
        version = %snapshot.version,
        stats = %snapshot.stats(),
        "Backup written"
    );
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use flor_core::{CartItemId, CartUid, Price, Quantity};

    use super::*;
    use crate::store::{MemoryStore, Record};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    fn product(id: i32, price: &str) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Buquê {id}"),
            description: None,
            price: Price::parse(price).unwrap(),
            image_url: None,
            active: true,
            created_at: at(),
            updated_at: at(),
        }
    }

    fn cart(id: i32, uid: &str) -> Cart {
        Cart {
            id: CartId::new(id),
            uid: CartUid::parse(uid).unwrap(),
            customer_name: Some("Ana".to_owned()),
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
        }
    }

    async fn legacy_store() -> MemoryStore {
        let store = MemoryStore::legacy();
        store
            .upsert(&Record::Category(Category {
                id: CategoryId::new(5),
                name: "Rosas".to_owned(),
                image_url: None,
            }))
            .await
            .unwrap();
        store
            .insert_legacy_product(product(1, "15.00"), Some(CategoryId::new(5)))
            .unwrap();
        store.insert_legacy_product(product(2, "9.90"), None).unwrap();
        store.upsert(&Record::Cart(cart(1, "abcd1234"))).await.unwrap();
        store
            .upsert(&Record::CartItem(CartItem {
                id: CartItemId::new(1),
                cart_id: CartId::new(1),
                product_id: ProductId::new(1),
                qty: Quantity::new(2).unwrap(),
                price: Price::parse("15.00").unwrap(),
            }))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_capture_legacy_store_is_version_one() {
        let store = legacy_store().await;
        let snapshot = capture(&store).await.unwrap();

        assert_eq!(snapshot.version, SnapshotVersion::V1);
        assert_eq!(snapshot.products[0].category_id, Some(CategoryId::new(5)));
        assert_eq!(snapshot.products[1].category_id, None);
        assert!(snapshot.products.iter().all(|p| p.category_ids.is_none()));
        assert_eq!(snapshot.carts[0].items.len(), 1);

        let stats = snapshot.stats();
        assert_eq!(stats.category_links, 1);
        assert_eq!(stats.cart_items, 1);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = legacy_store().await;
        let snapshot = capture(&store).await.unwrap();

        let path = write(&snapshot, dir.path()).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("backup-") && name.ends_with(".json"));

        let read_back = read(&path).await.unwrap();
        assert_eq!(read_back, snapshot);
    }

    #[tokio::test]
    async fn test_write_creates_missing_directory_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let snapshot = capture(&legacy_store().await).await.unwrap();

        write(&snapshot, &nested).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(&nested)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].ends_with(".tmp"));
    }

    #[test]
    fn test_stamps_strictly_increase() {
        let first = next_stamp();
        let second = next_stamp();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_read_rejects_missing_carts_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-1.json");
        std::fs::write(
            &path,
            r#"{"timestamp":"2025-01-10T12:00:00Z","users":[],"categories":[],"products":[]}"#,
        )
        .unwrap();

        let err = read(&path).await.unwrap_err();
        assert!(err.to_string().contains("carts"), "{err}");
    }

    #[tokio::test]
    async fn test_read_rejects_mismatched_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-1.json");
        std::fs::write(
            &path,
            r#"{
                "timestamp": "2025-01-10T12:00:00Z",
                "users": [], "categories": [], "carts": [],
                "products": [{
                    "id": 1, "name": "Rosa", "price": "10.00", "active": true,
                    "createdAt": "2025-01-10T12:00:00Z", "updatedAt": "2025-01-10T12:00:00Z",
                    "categoryIds": [5]
                }]
            }"#,
        )
        .unwrap();

        let err = read(&path).await.unwrap_err();
        assert!(err.to_string().contains("categoryIds"), "{err}");
    }

    #[tokio::test]
    async fn test_read_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-1.json");
        std::fs::write(
            &path,
            r#"{"version":7,"timestamp":"2025-01-10T12:00:00Z","users":[],"categories":[],"products":[],"carts":[]}"#,
        )
        .unwrap();

        assert!(matches!(
            read(&path).await,
            Err(SnapshotError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_referenced_categories() {
        let v1 = SnapshotProduct::legacy(product(1, "1.00"), Some(CategoryId::new(5)));
        let v2 = SnapshotProduct::multi(product(2, "1.00"), vec![CategoryId::new(5), CategoryId::new(6)]);
        assert_eq!(v1.referenced_categories().count(), 1);
        assert_eq!(v2.referenced_categories().collect::<Vec<_>>(), vec![CategoryId::new(5), CategoryId::new(6)]);
    }
}
