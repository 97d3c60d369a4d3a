//! Integration test support for the Flor de Maio migration pipeline.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p flor-integration-tests
//! ```
//!
//! Everything runs against [`MemoryStore`], so no database is needed.
//!
//! # Fixtures
//!
//! - [`seed_legacy_store`] - a pre-migration store with every kind of row
//! - [`FlakyBinder`] / [`FlakyStore`] - wrap a store and fail chosen calls

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use flor_core::{
    Cart, CartId, CartItem, CartItemId, CartUid, Category, CategoryId, ConfigId, Email, Price,
    Product, ProductId, ProductImage, ProductImageId, Quantity, SiteConfig, User, UserId,
};
use flor_migrate::orchestrator::StopSignal;
use flor_migrate::store::{
    Binder, Dataset, EntityKind, MemoryStore, Record, RecordKey, SchemaShape, Store, StoreError,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Fixed timestamp for fixtures.
#[must_use]
pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 12, 0, 0).unwrap()
}

#[must_use]
pub fn user(id: i32, email: &str) -> User {
    User {
        id: UserId::new(id),
        name: format!("Cliente {id}"),
        email: Email::parse(email).unwrap(),
    }
}

#[must_use]
pub fn category(id: i32, name: &str) -> Category {
    Category {
        id: CategoryId::new(id),
        name: name.to_owned(),
        image_url: Some(format!("/uploads/category-{id}.jpg")),
    }
}

#[must_use]
pub fn product(id: i32, name: &str, price: &str) -> Product {
    Product {
        id: ProductId::new(id),
        name: name.to_owned(),
        description: Some(format!("{name} fresco")),
        price: Price::parse(price).unwrap(),
        image_url: None,
        active: true,
        created_at: at(2),
        updated_at: at(3),
    }
}

#[must_use]
pub fn image(id: i32, product_id: i32, order: i32) -> ProductImage {
    ProductImage {
        id: ProductImageId::new(id),
        product_id: ProductId::new(product_id),
        image_url: format!("/uploads/product-{product_id}-{order}.jpg"),
        order,
    }
}

#[must_use]
pub fn cart(id: i32, uid: &str) -> Cart {
    Cart {
        id: CartId::new(id),
        uid: CartUid::parse(uid).unwrap(),
        customer_name: Some("Maria".to_owned()),
        phone: Some("+55 11 99999-0000".to_owned()),
        note: None,
        delivery_method: Some("entrega".to_owned()),
        address: Some("Rua das Flores, 12".to_owned()),
        payment_method: Some("dinheiro".to_owned()),
        needs_change: true,
        change_for: Some("100".parse().unwrap()),
        recipient_name: None,
        recipient_phone: None,
        created_at: at(5),
        updated_at: at(5),
    }
}

#[must_use]
pub fn item(id: i32, cart_id: i32, product_id: i32, qty: i32, price: &str) -> CartItem {
    CartItem {
        id: CartItemId::new(id),
        cart_id: CartId::new(cart_id),
        product_id: ProductId::new(product_id),
        qty: Quantity::new(qty).unwrap(),
        price: Price::parse(price).unwrap(),
    }
}

/// A store on the legacy schema holding:
///
/// - users 1 and 2
/// - categories 5 (Rosas) and 6 (Orquídeas)
/// - product 1 in category 5 at 20.00, product 2 uncategorised at 9.90,
///   product 3 in category 6 at 49.90
/// - two images of product 1
/// - cart 1 with an item for product 1 captured at 15.00 and one for
///   product 2, cart 2 with no items
/// - a site config row
pub async fn seed_legacy_store() -> MemoryStore {
    let store = MemoryStore::legacy();

    for record in [
        Record::User(user(1, "admin@flordemaio.com.br")),
        Record::User(user(2, "maria@example.com")),
        Record::Category(category(5, "Rosas")),
        Record::Category(category(6, "Orquídeas")),
    ] {
        store.upsert(&record).await.unwrap();
    }

    store
        .insert_legacy_product(product(1, "Buquê de rosas", "20.00"), Some(CategoryId::new(5)))
        .unwrap();
    store
        .insert_legacy_product(product(2, "Cartão", "9.90"), None)
        .unwrap();
    store
        .insert_legacy_product(product(3, "Orquídea branca", "49.90"), Some(CategoryId::new(6)))
        .unwrap();

    for record in [
        Record::ProductImage(image(1, 1, 0)),
        Record::ProductImage(image(2, 1, 2)),
        Record::Cart(cart(1, "abcd1234")),
        Record::Cart(cart(2, "k9x2m4p7")),
        Record::CartItem(item(1, 1, 1, 2, "15.00")),
        Record::CartItem(item(2, 1, 2, 1, "9.90")),
        Record::SiteConfig(SiteConfig {
            id: ConfigId::SINGLETON,
            hero_image_url: Some("/uploads/hero.jpg".to_owned()),
            updated_at: at(1),
        }),
    ] {
        store.upsert(&record).await.unwrap();
    }

    store
}

// =============================================================================
// Fault injection
// =============================================================================

/// Marker message for injected failures.
pub const INJECTED: &str = "injected failure";

/// Failures and stop requests to trigger, shared by every handle a
/// [`FlakyBinder`] produces.
#[derive(Debug, Default)]
pub struct Faults {
    upsert: Mutex<Option<EntityKind>>,
    export: AtomicBool,
    reset: AtomicBool,
    bind: AtomicBool,
    stop_on_export: Mutex<Option<StopSignal>>,
    stop_on_reset: Mutex<Option<StopSignal>>,
}

impl Faults {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next upsert of `kind`, once.
    pub fn fail_next_upsert(&self, kind: EntityKind) {
        *self.upsert.lock().unwrap() = Some(kind);
    }

    /// Fail every export.
    pub fn fail_export(&self) {
        self.export.store(true, Ordering::SeqCst);
    }

    /// Fail every schema reset.
    pub fn fail_reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    /// Fail the next bind, once.
    pub fn fail_next_bind(&self) {
        self.bind.store(true, Ordering::SeqCst);
    }

    /// Request a stop while the export runs.
    pub fn stop_on_export(&self, stop: StopSignal) {
        *self.stop_on_export.lock().unwrap() = Some(stop);
    }

    /// Request a stop while the schema reset runs.
    pub fn stop_on_reset(&self, stop: StopSignal) {
        *self.stop_on_reset.lock().unwrap() = Some(stop);
    }

    fn take_upsert(&self, kind: EntityKind) -> bool {
        let mut pending = self.upsert.lock().unwrap();
        if *pending == Some(kind) {
            *pending = None;
            return true;
        }
        false
    }

    fn injected() -> StoreError {
        StoreError::Schema(INJECTED.to_owned())
    }
}

/// A store that fails on demand.
#[derive(Debug, Clone)]
pub struct FlakyStore<S> {
    inner: S,
    faults: Arc<Faults>,
}

impl<S: Store> FlakyStore<S> {
    #[must_use]
    pub const fn new(inner: S, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl<S: Store> Store for FlakyStore<S> {
    fn shape(&self) -> SchemaShape {
        self.inner.shape()
    }

    fn max_concurrency(&self) -> Option<usize> {
        self.inner.max_concurrency()
    }

    async fn find_by_id(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        self.inner.find_by_id(key).await
    }

    async fn upsert(&self, record: &Record) -> Result<Record, StoreError> {
        if self.faults.take_upsert(record.kind()) {
            return Err(Faults::injected());
        }
        self.inner.upsert(record).await
    }

    async fn delete_many(&self, kind: EntityKind) -> Result<u64, StoreError> {
        self.inner.delete_many(kind).await
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        self.inner.count(kind).await
    }

    async fn site_config(&self) -> Result<Option<SiteConfig>, StoreError> {
        self.inner.site_config().await
    }

    async fn export(&self) -> Result<Dataset, StoreError> {
        if let Some(stop) = self.faults.stop_on_export.lock().unwrap().take() {
            stop.request();
        }
        if self.faults.export.load(Ordering::SeqCst) {
            return Err(Faults::injected());
        }
        self.inner.export().await
    }

    async fn reset_schema(&self) -> Result<(), StoreError> {
        if let Some(stop) = self.faults.stop_on_reset.lock().unwrap().take() {
            stop.request();
        }
        if self.faults.reset.load(Ordering::SeqCst) {
            return Err(Faults::injected());
        }
        self.inner.reset_schema().await
    }

    async fn apply_migration(&self, name: &str) -> Result<(), StoreError> {
        self.inner.apply_migration(name).await
    }

    async fn reseed_identities(&self) -> Result<(), StoreError> {
        self.inner.reseed_identities().await
    }
}

/// Wraps another binder's handles in [`FlakyStore`].
#[derive(Debug, Clone)]
pub struct FlakyBinder<B> {
    inner: B,
    faults: Arc<Faults>,
}

impl<B: Binder> FlakyBinder<B> {
    #[must_use]
    pub const fn new(inner: B, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl<B: Binder> Binder for FlakyBinder<B> {
    type Store = FlakyStore<B::Store>;

    async fn bind(&self) -> Result<Self::Store, StoreError> {
        if self.faults.bind.swap(false, Ordering::SeqCst) {
            return Err(Faults::injected());
        }
        let store = self.inner.bind().await?;
        Ok(FlakyStore::new(store, Arc::clone(&self.faults)))
    }
}
