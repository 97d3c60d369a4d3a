//! In-process store.
//!
//! Holds every table in ordered maps behind a mutex and enforces the same
//! rules as the `PostgreSQL` schema: unique emails and cart codes, foreign
//! keys, one row per `(product, category)` pair and a single config row.
//! `flor-cli verify` replays snapshots into it without touching a database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use flor_core::{
    Cart, CartId, CartItem, CartItemId, Category, CategoryId, Product, ProductCategory, ProductId,
    ProductImage, ProductImageId, SiteConfig, User, UserId,
};

use super::{
    ADD_MULTIPLE_CATEGORIES, Binder, Dataset, EntityKind, INITIAL_SCHEMA, MIGRATION_NAMES, Record,
    RecordKey, SchemaShape, Store, StoreError,
};

#[derive(Debug, Default)]
struct Tables {
    history: Vec<String>,
    users: BTreeMap<UserId, User>,
    categories: BTreeMap<CategoryId, Category>,
    products: BTreeMap<ProductId, Product>,
    legacy_categories: BTreeMap<ProductId, CategoryId>,
    product_categories: BTreeSet<ProductCategory>,
    product_images: BTreeMap<ProductImageId, ProductImage>,
    carts: BTreeMap<CartId, Cart>,
    cart_items: BTreeMap<CartItemId, CartItem>,
    config: Option<SiteConfig>,
}

impl Tables {
    fn shape(&self) -> SchemaShape {
        SchemaShape::from_history(&self.history)
    }

    fn clear_data(&mut self) {
        let history = std::mem::take(&mut self.history);
        *self = Self {
            history,
            ..Self::default()
        };
    }

    fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::User => self.users.len(),
            EntityKind::Category => self.categories.len(),
            EntityKind::Product => self.products.len(),
            EntityKind::ProductCategory => match self.shape() {
                SchemaShape::Legacy => self.legacy_categories.len(),
                SchemaShape::MultiCategory => self.product_categories.len(),
            },
            EntityKind::ProductImage => self.product_images.len(),
            EntityKind::Cart => self.carts.len(),
            EntityKind::CartItem => self.cart_items.len(),
            EntityKind::SiteConfig => usize::from(self.config.is_some()),
        }
    }

    fn find(&self, key: &RecordKey) -> Option<Record> {
        match key {
            RecordKey::User(id) => self.users.get(id).cloned().map(Record::User),
            RecordKey::Category(id) => self.categories.get(id).cloned().map(Record::Category),
            RecordKey::Product(id) => self.products.get(id).cloned().map(Record::Product),
            RecordKey::ProductCategory(product_id, category_id) => {
                let link = ProductCategory {
                    product_id: *product_id,
                    category_id: *category_id,
                };
                self.product_categories
                    .contains(&link)
                    .then_some(Record::ProductCategory(link))
            }
            RecordKey::ProductImage(id) => {
                self.product_images.get(id).cloned().map(Record::ProductImage)
            }
            RecordKey::Cart(id) => self.carts.get(id).cloned().map(Record::Cart),
            RecordKey::CartItem(id) => self.cart_items.get(id).cloned().map(Record::CartItem),
            RecordKey::SiteConfig(id) => self
                .config
                .as_ref()
                .filter(|config| config.id == *id)
                .cloned()
                .map(Record::SiteConfig),
        }
    }

    fn upsert(&mut self, record: &Record) -> Result<Record, StoreError> {
        let key = record.key();
        let violation = |message: String| StoreError::ConstraintViolation { key, message };

        match record {
            Record::User(user) => {
                if self
                    .users
                    .values()
                    .any(|other| other.id != user.id && other.email == user.email)
                {
                    return Err(violation(format!("email {} already exists", user.email)));
                }
                self.users.insert(user.id, user.clone());
            }
            Record::Category(category) => {
                self.categories.insert(category.id, category.clone());
            }
            Record::Product(product) => {
                self.products.insert(product.id, product.clone());
            }
            Record::ProductCategory(link) => {
                if self.shape() == SchemaShape::Legacy {
                    return Err(StoreError::Schema(
                        "product_category does not exist on the legacy schema".to_owned(),
                    ));
                }
                if !self.products.contains_key(&link.product_id) {
                    return Err(violation(format!("product {} does not exist", link.product_id)));
                }
                if !self.categories.contains_key(&link.category_id) {
                    return Err(violation(format!(
                        "category {} does not exist",
                        link.category_id
                    )));
                }
                self.product_categories.insert(*link);
            }
            Record::ProductImage(image) => {
                if !self.products.contains_key(&image.product_id) {
                    return Err(violation(format!(
                        "product {} does not exist",
                        image.product_id
                    )));
                }
                self.product_images.insert(image.id, image.clone());
            }
            Record::Cart(cart) => {
                if self
                    .carts
                    .values()
                    .any(|other| other.id != cart.id && other.uid == cart.uid)
                {
                    return Err(violation(format!("cart uid {} already exists", cart.uid)));
                }
                self.carts.insert(cart.id, cart.clone());
            }
            Record::CartItem(item) => {
                if !self.carts.contains_key(&item.cart_id) {
                    return Err(violation(format!("cart {} does not exist", item.cart_id)));
                }
                if !self.products.contains_key(&item.product_id) {
                    return Err(violation(format!(
                        "product {} does not exist",
                        item.product_id
                    )));
                }
                self.cart_items.insert(item.id, item.clone());
            }
            Record::SiteConfig(config) => {
                if let Some(existing) = &self.config
                    && existing.id != config.id
                {
                    return Err(violation(format!(
                        "config {} already exists, only one row is allowed",
                        existing.id
                    )));
                }
                self.config = Some(config.clone());
            }
        }

        Ok(record.clone())
    }

    fn delete_all(&mut self, kind: EntityKind) -> Result<u64, StoreError> {
        let removed = self.count(kind);
        match kind {
            EntityKind::User => self.users.clear(),
            EntityKind::Category => {
                self.categories.clear();
                self.legacy_categories.clear();
                self.product_categories.clear();
            }
            EntityKind::Product => {
                if let Some(item) = self.cart_items.values().next() {
                    return Err(StoreError::ConstraintViolation {
                        key: RecordKey::CartItem(item.id),
                        message: "cart items still reference products".to_owned(),
                    });
                }
                self.products.clear();
                self.legacy_categories.clear();
                self.product_categories.clear();
                self.product_images.clear();
            }
            EntityKind::ProductCategory => self.product_categories.clear(),
            EntityKind::ProductImage => self.product_images.clear(),
            EntityKind::Cart => {
                self.carts.clear();
                self.cart_items.clear();
            }
            EntityKind::CartItem => self.cart_items.clear(),
            EntityKind::SiteConfig => self.config = None,
        }
        Ok(removed as u64)
    }

    fn apply(&mut self, name: &str) -> Result<(), StoreError> {
        if !MIGRATION_NAMES.contains(&name) {
            return Err(StoreError::Schema(format!("unknown migration: {name}")));
        }
        if self.history.iter().any(|applied| applied == name) {
            return Ok(());
        }
        if name == ADD_MULTIPLE_CATEGORIES {
            let legacy = std::mem::take(&mut self.legacy_categories);
            self.product_categories
                .extend(legacy.into_iter().map(|(product_id, category_id)| {
                    ProductCategory {
                        product_id,
                        category_id,
                    }
                }));
        }
        self.history.push(name.to_owned());
        Ok(())
    }

    fn export(&self) -> Dataset {
        let shape = self.shape();
        let product_categories = match shape {
            SchemaShape::Legacy => self
                .legacy_categories
                .iter()
                .map(|(product_id, category_id)| ProductCategory {
                    product_id: *product_id,
                    category_id: *category_id,
                })
                .collect(),
            SchemaShape::MultiCategory => self.product_categories.iter().copied().collect(),
        };

        Dataset {
            shape,
            users: self.users.values().cloned().collect(),
            categories: self.categories.values().cloned().collect(),
            products: self.products.values().cloned().collect(),
            product_categories,
            product_images: self.product_images.values().cloned().collect(),
            carts: self.carts.values().cloned().collect(),
            cart_items: self.cart_items.values().cloned().collect(),
            config: self.config.clone(),
        }
    }
}

/// Shared in-memory tables plus the shape this handle was bound against.
///
/// Clones share the same tables. Use [`MemoryStore::rebind`] (or a
/// [`MemoryBinder`]) after a schema change to get a handle that sees the
/// new shape.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    bound_shape: SchemaShape,
}

impl MemoryStore {
    /// An empty store on the legacy single-category schema.
    #[must_use]
    pub fn legacy() -> Self {
        Self::with_history(&[INITIAL_SCHEMA])
    }

    /// An empty store with every migration applied.
    #[must_use]
    pub fn multi_category() -> Self {
        Self::with_history(MIGRATION_NAMES)
    }

    fn with_history(history: &[&str]) -> Self {
        let tables = Tables {
            history: history.iter().map(|name| (*name).to_owned()).collect(),
            ..Tables::default()
        };
        let bound_shape = tables.shape();
        Self {
            tables: Arc::new(Mutex::new(tables)),
            bound_shape,
        }
    }

    /// A new handle on the same tables, bound to their current shape.
    #[must_use]
    pub fn rebind(&self) -> Self {
        let bound_shape = self.lock().shape();
        Self {
            tables: Arc::clone(&self.tables),
            bound_shape,
        }
    }

    /// Insert a product together with its legacy `category_id` column.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` if the tables have already been migrated
    /// and `StoreError::ConstraintViolation` if the category does not exist.
    pub fn insert_legacy_product(
        &self,
        product: Product,
        category_id: Option<CategoryId>,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if tables.shape() != SchemaShape::Legacy {
            return Err(StoreError::Schema(
                "product.category_id was dropped by add_multiple_categories".to_owned(),
            ));
        }
        if let Some(category_id) = category_id {
            if !tables.categories.contains_key(&category_id) {
                return Err(StoreError::ConstraintViolation {
                    key: RecordKey::Product(product.id),
                    message: format!("category {category_id} does not exist"),
                });
            }
            tables.legacy_categories.insert(product.id, category_id);
        }
        tables.products.insert(product.id, product);
        Ok(())
    }

    /// Names of the migrations applied so far.
    #[must_use]
    pub fn applied_migrations(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock cannot leave a half-written row,
        // every mutation is a single insert or clear.
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn shape(&self) -> SchemaShape {
        self.bound_shape
    }

    async fn find_by_id(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        Ok(self.lock().find(key))
    }

    async fn upsert(&self, record: &Record) -> Result<Record, StoreError> {
        self.lock().upsert(record)
    }

    async fn delete_many(&self, kind: EntityKind) -> Result<u64, StoreError> {
        self.lock().delete_all(kind)
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        Ok(self.lock().count(kind) as u64)
    }

    async fn site_config(&self) -> Result<Option<SiteConfig>, StoreError> {
        Ok(self.lock().config.clone())
    }

    async fn export(&self) -> Result<Dataset, StoreError> {
        Ok(self.lock().export())
    }

    async fn reset_schema(&self) -> Result<(), StoreError> {
        let mut tables = self.lock();
        tables.clear_data();
        if tables.history.is_empty() {
            tables.history.push(INITIAL_SCHEMA.to_owned());
        }
        Ok(())
    }

    async fn apply_migration(&self, name: &str) -> Result<(), StoreError> {
        self.lock().apply(name)
    }

    async fn reseed_identities(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Binds [`MemoryStore`] handles to a shared set of tables.
#[derive(Debug, Clone)]
pub struct MemoryBinder {
    store: MemoryStore,
}

impl MemoryBinder {
    /// Create a binder over the given store's tables.
    #[must_use]
    pub const fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl Binder for MemoryBinder {
    type Store = MemoryStore;

    async fn bind(&self) -> Result<MemoryStore, StoreError> {
        Ok(self.store.rebind())
    }
}
