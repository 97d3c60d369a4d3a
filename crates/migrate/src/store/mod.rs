//! Store capability used by the pipeline.
//!
//! The pipeline never talks to a database directly. It needs a handful of
//! verbs - find by primary key, upsert, delete, count, a consistent export,
//! and the schema-migration pair - and everything else stays behind the
//! [`Store`] trait.
//!
//! Handles are produced by a [`Binder`]. A handle is bound to the schema as
//! it existed when it was created; after a schema change the caller binds a
//! new one instead of reusing the old handle.
//!
//! # Implementations
//!
//! - [`PgStore`] - `PostgreSQL` via sqlx, schema `shop`
//! - [`MemoryStore`] - in-process tables with the same constraint checks,
//!   used for dry-run replays and tests

pub mod memory;
pub mod postgres;

use core::fmt;
use std::future::Future;

use thiserror::Error;

use flor_core::{
    Cart, CartId, CartItem, CartItemId, Category, CategoryId, ConfigId, Product, ProductCategory,
    ProductId, ProductImage, ProductImageId, SiteConfig, User, UserId,
};

pub use memory::{MemoryBinder, MemoryStore};
pub use postgres::{PgBinder, PgStore};

/// Name of the migration that introduces the product/category join table.
pub const ADD_MULTIPLE_CATEGORIES: &str = "add_multiple_categories";

/// Name of the baseline migration.
pub const INITIAL_SCHEMA: &str = "initial_schema";

/// Ordered migration history known to every store implementation.
pub const MIGRATION_NAMES: &[&str] = &[INITIAL_SCHEMA, ADD_MULTIPLE_CATEGORIES];

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected a single write (unique, foreign-key or check rule).
    #[error("constraint violation on {key}: {message}")]
    ConstraintViolation {
        /// Identity of the rejected record.
        key: RecordKey,
        /// Store-reported reason.
        message: String,
    },

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema reset or migration failed, or the schema cannot hold the record.
    #[error("schema error: {0}")]
    Schema(String),

    /// Data in the store is invalid for the domain types.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl StoreError {
    /// Returns `true` for a rejected single-row write.
    #[must_use]
    pub const fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }
}

/// Which product/category layout the schema has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaShape {
    /// `product.category_id`, at most one category per product.
    Legacy,
    /// `product_category` join table.
    MultiCategory,
}

impl SchemaShape {
    /// Derive the shape from an applied migration history.
    #[must_use]
    pub fn from_history<S: AsRef<str>>(history: &[S]) -> Self {
        if history
            .iter()
            .any(|name| name.as_ref() == ADD_MULTIPLE_CATEGORIES)
        {
            Self::MultiCategory
        } else {
            Self::Legacy
        }
    }
}

impl fmt::Display for SchemaShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy single-category"),
            Self::MultiCategory => f.write_str("multi-category"),
        }
    }
}

/// Kinds of records the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    User,
    Category,
    Product,
    ProductCategory,
    ProductImage,
    Cart,
    CartItem,
    SiteConfig,
}

impl EntityKind {
    /// All kinds, in replay dependency order.
    pub const ALL: [Self; 8] = [
        Self::User,
        Self::Category,
        Self::Product,
        Self::ProductCategory,
        Self::ProductImage,
        Self::Cart,
        Self::CartItem,
        Self::SiteConfig,
    ];

    /// Table name in the `shop` schema.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Category => "category",
            Self::Product => "product",
            Self::ProductCategory => "product_category",
            Self::ProductImage => "product_image",
            Self::Cart => "cart",
            Self::CartItem => "cart_item",
            Self::SiteConfig => "config",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Primary key of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    User(UserId),
    Category(CategoryId),
    Product(ProductId),
    ProductCategory(ProductId, CategoryId),
    ProductImage(ProductImageId),
    Cart(CartId),
    CartItem(CartItemId),
    SiteConfig(ConfigId),
}

impl RecordKey {
    /// The kind of record this key identifies.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::User(_) => EntityKind::User,
            Self::Category(_) => EntityKind::Category,
            Self::Product(_) => EntityKind::Product,
            Self::ProductCategory(..) => EntityKind::ProductCategory,
            Self::ProductImage(_) => EntityKind::ProductImage,
            Self::Cart(_) => EntityKind::Cart,
            Self::CartItem(_) => EntityKind::CartItem,
            Self::SiteConfig(_) => EntityKind::SiteConfig,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user {id}"),
            Self::Category(id) => write!(f, "category {id}"),
            Self::Product(id) => write!(f, "product {id}"),
            Self::ProductCategory(product, category) => {
                write!(f, "product_category ({product}, {category})")
            }
            Self::ProductImage(id) => write!(f, "product_image {id}"),
            Self::Cart(id) => write!(f, "cart {id}"),
            Self::CartItem(id) => write!(f, "cart_item {id}"),
            Self::SiteConfig(id) => write!(f, "config {id}"),
        }
    }
}

/// A single row of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    User(User),
    Category(Category),
    Product(Product),
    ProductCategory(ProductCategory),
    ProductImage(ProductImage),
    Cart(Cart),
    CartItem(CartItem),
    SiteConfig(SiteConfig),
}

impl Record {
    /// Primary key of the record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        match self {
            Self::User(r) => RecordKey::User(r.id),
            Self::Category(r) => RecordKey::Category(r.id),
            Self::Product(r) => RecordKey::Product(r.id),
            Self::ProductCategory(r) => RecordKey::ProductCategory(r.product_id, r.category_id),
            Self::ProductImage(r) => RecordKey::ProductImage(r.id),
            Self::Cart(r) => RecordKey::Cart(r.id),
            Self::CartItem(r) => RecordKey::CartItem(r.id),
            Self::SiteConfig(r) => RecordKey::SiteConfig(r.id),
        }
    }

    /// Kind of the record.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }
}

macro_rules! record_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Record {
                fn from(record: $variant) -> Self {
                    Self::$variant(record)
                }
            }
        )*
    };
}

record_from!(
    User,
    Category,
    Product,
    ProductCategory,
    ProductImage,
    Cart,
    CartItem,
    SiteConfig
);

/// Everything in the store, read at a single point in time.
///
/// `product_categories` holds the category links whatever the shape: rows of
/// the join table, or the non-null `product.category_id` values on the
/// legacy schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub shape: SchemaShape,
    pub users: Vec<User>,
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
    pub product_categories: Vec<ProductCategory>,
    pub product_images: Vec<ProductImage>,
    pub carts: Vec<Cart>,
    pub cart_items: Vec<CartItem>,
    pub config: Option<SiteConfig>,
}

/// Record-level access to a relational store.
///
/// Upserts carry their primary key and replace every field of an existing
/// row; missing rows are inserted with the given identity. Each call is a
/// complete single-row write, so a pass of upserts can be re-run from the
/// top after an interruption.
pub trait Store: Send + Sync {
    /// Shape of the schema this handle was bound against.
    fn shape(&self) -> SchemaShape;

    /// Upper bound on useful concurrent calls (e.g. pool size).
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    /// Fetch a record by primary key.
    fn find_by_id(
        &self,
        key: &RecordKey,
    ) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Insert or replace a record by primary key, returning the stored row.
    fn upsert(&self, record: &Record) -> impl Future<Output = Result<Record, StoreError>> + Send;

    /// Delete every row of a kind, returning the number removed.
    fn delete_many(&self, kind: EntityKind) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Count rows of a kind.
    fn count(&self, kind: EntityKind) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// The site configuration row, if one exists.
    fn site_config(&self) -> impl Future<Output = Result<Option<SiteConfig>, StoreError>> + Send;

    /// Read every table in one consistent pass.
    fn export(&self) -> impl Future<Output = Result<Dataset, StoreError>> + Send;

    /// Drop all data and recreate the schema from the applied migration history.
    fn reset_schema(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply a named migration. Already-applied migrations are a no-op.
    fn apply_migration(&self, name: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Move identity generators past the highest replayed primary keys.
    fn reseed_identities(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Creates store handles bound to the current schema.
pub trait Binder: Send + Sync {
    type Store: Store;

    /// Bind a fresh handle.
    fn bind(&self) -> impl Future<Output = Result<Self::Store, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_from_history() {
        assert_eq!(
            SchemaShape::from_history(&[INITIAL_SCHEMA]),
            SchemaShape::Legacy
        );
        assert_eq!(
            SchemaShape::from_history(MIGRATION_NAMES),
            SchemaShape::MultiCategory
        );
        assert_eq!(
            SchemaShape::from_history::<&str>(&[]),
            SchemaShape::Legacy
        );
    }

    #[test]
    fn test_record_key_display() {
        let key = RecordKey::ProductCategory(ProductId::new(1), CategoryId::new(5));
        assert_eq!(key.to_string(), "product_category (1, 5)");
        assert_eq!(key.kind(), EntityKind::ProductCategory);
    }

    #[test]
    fn test_replay_order_puts_products_before_carts() {
        let position = |kind| EntityKind::ALL.iter().position(|k| *k == kind);
        assert!(position(EntityKind::Product) < position(EntityKind::Cart));
        assert!(position(EntityKind::Cart) < position(EntityKind::CartItem));
    }
}
