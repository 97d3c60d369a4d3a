//! `PostgreSQL` store.
//!
//! # Database schema: `shop`
//!
//! ## Tables
//!
//! - `user`, `category`, `product`, `product_image`
//! - `product_category` - join table (after `add_multiple_categories`)
//! - `cart`, `cart_item`
//! - `config` - singleton site settings
//! - `_migrations` - names of applied migrations
//!
//! # Migrations
//!
//! Migration files live in `crates/migrate/migrations/` and are embedded at
//! compile time. They are applied by name through [`Store::apply_migration`]
//! and re-applied by [`Store::reset_schema`], which replays the recorded
//! history after dropping the schema.
//!
//! Queries are built at runtime (`sqlx::query_as`) rather than with the
//! checked macros: the product columns differ between the two schema shapes
//! and the same binary has to run against both.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use flor_core::{
    Cart, CartId, CartItem, CartItemId, CartUid, Category, CategoryId, ConfigId, Email, Price,
    Product, ProductCategory, ProductId, ProductImage, ProductImageId, Quantity, SiteConfig, User,
    UserId,
};

use super::{
    Binder, Dataset, EntityKind, INITIAL_SCHEMA, Record, RecordKey, SchemaShape, Store,
    StoreError,
};

/// Embedded migration files, in application order.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        INITIAL_SCHEMA,
        include_str!("../../migrations/0001_initial_schema.sql"),
    ),
    (
        super::ADD_MULTIPLE_CATEGORIES,
        include_str!("../../migrations/0002_add_multiple_categories.sql"),
    ),
];

/// Tables with a `SERIAL` primary key.
const SERIAL_TABLES: &[EntityKind] = &[
    EntityKind::User,
    EntityKind::Category,
    EntityKind::Product,
    EntityKind::ProductImage,
    EntityKind::Cart,
    EntityKind::CartItem,
    EntityKind::SiteConfig,
];

fn migration_sql(name: &str) -> Result<&'static str, StoreError> {
    MIGRATIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, sql)| *sql)
        .ok_or_else(|| StoreError::Schema(format!("unknown migration: {name}")))
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    name: String,
    email: String,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            StoreError::DataCorruption(format!("invalid email for user {}: {e}", row.id))
        })?;
        Ok(Self {
            id: UserId::new(row.id),
            name: row.name,
            email,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CategoryRow {
    id: i32,
    name: String,
    image_url: Option<String>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: CategoryId::new(row.id),
            name: row.name,
            image_url: row.image_url,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i32,
    name: String,
    description: Option<String>,
    price: Decimal,
    image_url: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let price = Price::new(row.price).map_err(|e| {
            StoreError::DataCorruption(format!("invalid price for product {}: {e}", row.id))
        })?;
        Ok(Self {
            id: ProductId::new(row.id),
            name: row.name,
            description: row.description,
            price,
            image_url: row.image_url,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductCategoryRow {
    product_id: i32,
    category_id: i32,
}

impl From<ProductCategoryRow> for ProductCategory {
    fn from(row: ProductCategoryRow) -> Self {
        Self {
            product_id: ProductId::new(row.product_id),
            category_id: CategoryId::new(row.category_id),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductImageRow {
    id: i32,
    product_id: i32,
    image_url: String,
    sort_order: i32,
}

impl From<ProductImageRow> for ProductImage {
    fn from(row: ProductImageRow) -> Self {
        Self {
            id: ProductImageId::new(row.id),
            product_id: ProductId::new(row.product_id),
            image_url: row.image_url,
            order: row.sort_order,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: i32,
    uid: String,
    customer_name: Option<String>,
    phone: Option<String>,
    note: Option<String>,
    delivery_method: Option<String>,
    address: Option<String>,
    payment_method: Option<String>,
    needs_change: bool,
    change_for: Option<Decimal>,
    recipient_name: Option<String>,
    recipient_phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = StoreError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        let uid = CartUid::parse(&row.uid).map_err(|e| {
            StoreError::DataCorruption(format!("invalid uid for cart {}: {e}", row.id))
        })?;
        Ok(Self {
            id: CartId::new(row.id),
            uid,
            customer_name: row.customer_name,
            phone: row.phone,
            note: row.note,
            delivery_method: row.delivery_method,
            address: row.address,
            payment_method: row.payment_method,
            needs_change: row.needs_change,
            change_for: row.change_for,
            recipient_name: row.recipient_name,
            recipient_phone: row.recipient_phone,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CartItemRow {
    id: i32,
    cart_id: i32,
    product_id: i32,
    qty: i32,
    price: Decimal,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = StoreError;

    fn try_from(row: CartItemRow) -> Result<Self, Self::Error> {
        let qty = Quantity::new(row.qty).map_err(|e| {
            StoreError::DataCorruption(format!("invalid qty for cart item {}: {e}", row.id))
        })?;
        let price = Price::new(row.price).map_err(|e| {
            StoreError::DataCorruption(format!("invalid price for cart item {}: {e}", row.id))
        })?;
        Ok(Self {
            id: CartItemId::new(row.id),
            cart_id: CartId::new(row.cart_id),
            product_id: ProductId::new(row.product_id),
            qty,
            price,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConfigRow {
    id: i32,
    hero_image_url: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<ConfigRow> for SiteConfig {
    fn from(row: ConfigRow) -> Self {
        Self {
            id: ConfigId::new(row.id),
            hero_image_url: row.hero_image_url,
            updated_at: row.updated_at,
        }
    }
}

const USER_COLUMNS: &str = "id, name, email";
const CATEGORY_COLUMNS: &str = "id, name, image_url";
const PRODUCT_COLUMNS: &str =
    "id, name, description, price, image_url, active, created_at, updated_at";
const PRODUCT_IMAGE_COLUMNS: &str = "id, product_id, image_url, sort_order";
const CART_COLUMNS: &str = "id, uid, customer_name, phone, note, delivery_method, address, \
     payment_method, needs_change, change_for, recipient_name, recipient_phone, \
     created_at, updated_at";
const CART_ITEM_COLUMNS: &str = "id, cart_id, product_id, qty, price";
const CONFIG_COLUMNS: &str = "id, hero_image_url, updated_at";

/// Map a write failure to `ConstraintViolation` when the database rejected
/// the row itself.
fn map_write_error(key: RecordKey, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && (db_err.is_unique_violation()
            || db_err.is_foreign_key_violation()
            || db_err.is_check_violation())
    {
        return StoreError::ConstraintViolation {
            key,
            message: db_err.message().to_owned(),
        };
    }
    StoreError::Database(e)
}

// =============================================================================
// Store
// =============================================================================

/// A store handle over a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    shape: SchemaShape,
    max_connections: u32,
}

impl PgStore {
    /// Wrap an existing pool, probing the schema shape.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the probe query fails.
    pub async fn from_pool(pool: PgPool, max_connections: u32) -> Result<Self, StoreError> {
        let shape = probe_shape(&pool).await?;
        Ok(Self {
            pool,
            shape,
            max_connections,
        })
    }

    async fn applied_history(&self) -> Result<Vec<String>, StoreError> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT to_regclass('shop._migrations')::text")
                .fetch_one(&self.pool)
                .await?;
        if exists.is_none() {
            return Ok(Vec::new());
        }

        let names = sqlx::query_scalar("SELECT name FROM shop._migrations ORDER BY applied_at, name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn export_in(
        tx: &mut Transaction<'_, Postgres>,
        shape: SchemaShape,
    ) -> Result<Dataset, StoreError> {
        let users = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM shop.user ORDER BY id"
        ))
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<User>, _>>()?;

        let categories = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM shop.category ORDER BY id"
        ))
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        let products = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM shop.product ORDER BY id"
        ))
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<Product>, _>>()?;

        let links_sql = match shape {
            SchemaShape::Legacy => {
                "SELECT id AS product_id, category_id FROM shop.product \
                 WHERE category_id IS NOT NULL ORDER BY id"
            }
            SchemaShape::MultiCategory => {
                "SELECT product_id, category_id FROM shop.product_category \
                 ORDER BY product_id, category_id"
            }
        };
        let product_categories = sqlx::query_as::<_, ProductCategoryRow>(links_sql)
            .fetch_all(&mut **tx)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        let product_images = sqlx::query_as::<_, ProductImageRow>(&format!(
            "SELECT {PRODUCT_IMAGE_COLUMNS} FROM shop.product_image ORDER BY product_id, sort_order, id"
        ))
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        let carts = sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM shop.cart ORDER BY id"
        ))
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<Cart>, _>>()?;

        let cart_items = sqlx::query_as::<_, CartItemRow>(&format!(
            "SELECT {CART_ITEM_COLUMNS} FROM shop.cart_item ORDER BY cart_id, id"
        ))
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<CartItem>, _>>()?;

        let config = sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM shop.config ORDER BY id LIMIT 1"
        ))
        .fetch_optional(&mut **tx)
        .await?
        .map(Into::into);

        Ok(Dataset {
            shape,
            users,
            categories,
            products,
            product_categories,
            product_images,
            carts,
            cart_items,
            config,
        })
    }
}

async fn probe_shape(pool: &PgPool) -> Result<SchemaShape, StoreError> {
    let has_join_table: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = 'shop' AND table_name = 'product_category'
        )
        ",
    )
    .fetch_one(pool)
    .await?;

    Ok(if has_join_table {
        SchemaShape::MultiCategory
    } else {
        SchemaShape::Legacy
    })
}

async fn apply_in(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<(), StoreError> {
    let sql = migration_sql(name)?;
    (&mut **tx)
        .execute(sqlx::raw_sql(sql))
        .await
        .map_err(|e| StoreError::Schema(format!("migration {name} failed: {e}")))?;
    sqlx::query("INSERT INTO shop._migrations (name) VALUES ($1)")
        .bind(name)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

const CREATE_BOOKKEEPING: &str = r"
    CREATE SCHEMA IF NOT EXISTS shop;
    CREATE TABLE IF NOT EXISTS shop._migrations (
        name TEXT PRIMARY KEY,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
    );
";

impl Store for PgStore {
    fn shape(&self) -> SchemaShape {
        self.shape
    }

    fn max_concurrency(&self) -> Option<usize> {
        usize::try_from(self.max_connections).ok()
    }

    async fn find_by_id(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        let record = match *key {
            RecordKey::User(id) => sqlx::query_as::<_, UserRow>(&format!(
                "SELECT {USER_COLUMNS} FROM shop.user WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()?
            .map(Record::User),
            RecordKey::Category(id) => sqlx::query_as::<_, CategoryRow>(&format!(
                "SELECT {CATEGORY_COLUMNS} FROM shop.category WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Record::Category(row.into())),
            RecordKey::Product(id) => sqlx::query_as::<_, ProductRow>(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM shop.product WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Product::try_from)
            .transpose()?
            .map(Record::Product),
            RecordKey::ProductCategory(product_id, category_id) => {
                if self.shape == SchemaShape::Legacy {
                    return Ok(None);
                }
                sqlx::query_as::<_, ProductCategoryRow>(
                    "SELECT product_id, category_id FROM shop.product_category \
                     WHERE product_id = $1 AND category_id = $2",
                )
                .bind(product_id)
                .bind(category_id)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| Record::ProductCategory(row.into()))
            }
            RecordKey::ProductImage(id) => sqlx::query_as::<_, ProductImageRow>(&format!(
                "SELECT {PRODUCT_IMAGE_COLUMNS} FROM shop.product_image WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Record::ProductImage(row.into())),
            RecordKey::Cart(id) => sqlx::query_as::<_, CartRow>(&format!(
                "SELECT {CART_COLUMNS} FROM shop.cart WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Cart::try_from)
            .transpose()?
            .map(Record::Cart),
            RecordKey::CartItem(id) => sqlx::query_as::<_, CartItemRow>(&format!(
                "SELECT {CART_ITEM_COLUMNS} FROM shop.cart_item WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(CartItem::try_from)
            .transpose()?
            .map(Record::CartItem),
            RecordKey::SiteConfig(id) => sqlx::query_as::<_, ConfigRow>(&format!(
                "SELECT {CONFIG_COLUMNS} FROM shop.config WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Record::SiteConfig(row.into())),
        };
        Ok(record)
    }

    async fn upsert(&self, record: &Record) -> Result<Record, StoreError> {
        let key = record.key();
        let stored = match record {
            Record::User(user) => {
                let row = sqlx::query_as::<_, UserRow>(&format!(
                    r"
                    INSERT INTO shop.user (id, name, email)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (id) DO UPDATE
                    SET name = EXCLUDED.name, email = EXCLUDED.email
                    RETURNING {USER_COLUMNS}
                    "
                ))
                .bind(user.id)
                .bind(&user.name)
                .bind(user.email.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::User(row.try_into()?)
            }
            Record::Category(category) => {
                let row = sqlx::query_as::<_, CategoryRow>(&format!(
                    r"
                    INSERT INTO shop.category (id, name, image_url)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (id) DO UPDATE
                    SET name = EXCLUDED.name, image_url = EXCLUDED.image_url
                    RETURNING {CATEGORY_COLUMNS}
                    "
                ))
                .bind(category.id)
                .bind(&category.name)
                .bind(category.image_url.as_deref())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::Category(row.into())
            }
            Record::Product(product) => {
                let row = sqlx::query_as::<_, ProductRow>(&format!(
                    r"
                    INSERT INTO shop.product
                        (id, name, description, price, image_url, active, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (id) DO UPDATE
                    SET name = EXCLUDED.name,
                        description = EXCLUDED.description,
                        price = EXCLUDED.price,
                        image_url = EXCLUDED.image_url,
                        active = EXCLUDED.active,
                        created_at = EXCLUDED.created_at,
                        updated_at = EXCLUDED.updated_at
                    RETURNING {PRODUCT_COLUMNS}
                    "
                ))
                .bind(product.id)
                .bind(&product.name)
                .bind(product.description.as_deref())
                .bind(product.price.amount())
                .bind(product.image_url.as_deref())
                .bind(product.active)
                .bind(product.created_at)
                .bind(product.updated_at)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::Product(row.try_into()?)
            }
            Record::ProductCategory(link) => {
                if self.shape == SchemaShape::Legacy {
                    return Err(StoreError::Schema(
                        "product_category does not exist on the legacy schema".to_owned(),
                    ));
                }
                sqlx::query(
                    r"
                    INSERT INTO shop.product_category (product_id, category_id)
                    VALUES ($1, $2)
                    ON CONFLICT (product_id, category_id) DO NOTHING
                    ",
                )
                .bind(link.product_id)
                .bind(link.category_id)
                .execute(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::ProductCategory(*link)
            }
            Record::ProductImage(image) => {
                let row = sqlx::query_as::<_, ProductImageRow>(&format!(
                    r"
                    INSERT INTO shop.product_image (id, product_id, image_url, sort_order)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (id) DO UPDATE
                    SET product_id = EXCLUDED.product_id,
                        image_url = EXCLUDED.image_url,
                        sort_order = EXCLUDED.sort_order
                    RETURNING {PRODUCT_IMAGE_COLUMNS}
                    "
                ))
                .bind(image.id)
                .bind(image.product_id)
                .bind(&image.image_url)
                .bind(image.order)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::ProductImage(row.into())
            }
            Record::Cart(cart) => {
                let row = sqlx::query_as::<_, CartRow>(&format!(
                    r"
                    INSERT INTO shop.cart
                        (id, uid, customer_name, phone, note, delivery_method, address,
                         payment_method, needs_change, change_for, recipient_name,
                         recipient_phone, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    ON CONFLICT (id) DO UPDATE
                    SET uid = EXCLUDED.uid,
                        customer_name = EXCLUDED.customer_name,
                        phone = EXCLUDED.phone,
                        note = EXCLUDED.note,
                        delivery_method = EXCLUDED.delivery_method,
                        address = EXCLUDED.address,
                        payment_method = EXCLUDED.payment_method,
                        needs_change = EXCLUDED.needs_change,
                        change_for = EXCLUDED.change_for,
                        recipient_name = EXCLUDED.recipient_name,
                        recipient_phone = EXCLUDED.recipient_phone,
                        created_at = EXCLUDED.created_at,
                        updated_at = EXCLUDED.updated_at
                    RETURNING {CART_COLUMNS}
                    "
                ))
                .bind(cart.id)
                .bind(cart.uid.as_str())
                .bind(cart.customer_name.as_deref())
                .bind(cart.phone.as_deref())
                .bind(cart.note.as_deref())
                .bind(cart.delivery_method.as_deref())
                .bind(cart.address.as_deref())
                .bind(cart.payment_method.as_deref())
                .bind(cart.needs_change)
                .bind(cart.change_for)
                .bind(cart.recipient_name.as_deref())
                .bind(cart.recipient_phone.as_deref())
                .bind(cart.created_at)
                .bind(cart.updated_at)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::Cart(row.try_into()?)
            }
            Record::CartItem(item) => {
                let row = sqlx::query_as::<_, CartItemRow>(&format!(
                    r"
                    INSERT INTO shop.cart_item (id, cart_id, product_id, qty, price)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (id) DO UPDATE
                    SET cart_id = EXCLUDED.cart_id,
                        product_id = EXCLUDED.product_id,
                        qty = EXCLUDED.qty,
                        price = EXCLUDED.price
                    RETURNING {CART_ITEM_COLUMNS}
                    "
                ))
                .bind(item.id)
                .bind(item.cart_id)
                .bind(item.product_id)
                .bind(item.qty.get())
                .bind(item.price.amount())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::CartItem(row.try_into()?)
            }
            Record::SiteConfig(config) => {
                let row = sqlx::query_as::<_, ConfigRow>(&format!(
                    r"
                    INSERT INTO shop.config (id, hero_image_url, updated_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (id) DO UPDATE
                    SET hero_image_url = EXCLUDED.hero_image_url,
                        updated_at = EXCLUDED.updated_at
                    RETURNING {CONFIG_COLUMNS}
                    "
                ))
                .bind(config.id)
                .bind(config.hero_image_url.as_deref())
                .bind(config.updated_at)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_write_error(key, e))?;
                Record::SiteConfig(row.into())
            }
        };

        debug!(%key, "Upserted record");
        Ok(stored)
    }

    async fn delete_many(&self, kind: EntityKind) -> Result<u64, StoreError> {
        if kind == EntityKind::ProductCategory && self.shape == SchemaShape::Legacy {
            let result = sqlx::query(
                "UPDATE shop.product SET category_id = NULL WHERE category_id IS NOT NULL",
            )
            .execute(&self.pool)
            .await?;
            return Ok(result.rows_affected());
        }

        let result = sqlx::query(&format!("DELETE FROM shop.{}", kind.table()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let sql = if kind == EntityKind::ProductCategory && self.shape == SchemaShape::Legacy {
            "SELECT COUNT(*) FROM shop.product WHERE category_id IS NOT NULL".to_owned()
        } else {
            format!("SELECT COUNT(*) FROM shop.{}", kind.table())
        };
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        u64::try_from(count)
            .map_err(|_| StoreError::DataCorruption(format!("negative count for {kind}")))
    }

    async fn site_config(&self) -> Result<Option<SiteConfig>, StoreError> {
        let row = sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM shop.config ORDER BY id LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(shape = %self.shape))]
    async fn export(&self) -> Result<Dataset, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let dataset = Self::export_in(&mut tx, self.shape).await?;
        tx.commit().await?;
        Ok(dataset)
    }

    #[instrument(skip(self))]
    async fn reset_schema(&self) -> Result<(), StoreError> {
        let mut history = self.applied_history().await?;
        if history.is_empty() {
            history.push(INITIAL_SCHEMA.to_owned());
        }
        warn!(migrations = ?history, "Dropping schema shop and all of its data");

        let mut tx = self.pool.begin().await?;
        (&mut *tx)
            .execute(sqlx::raw_sql(
                "DROP SCHEMA IF EXISTS shop CASCADE; CREATE SCHEMA shop;",
            ))
            .await
            .map_err(|e| StoreError::Schema(format!("schema reset failed: {e}")))?;
        (&mut *tx).execute(sqlx::raw_sql(CREATE_BOOKKEEPING)).await?;

        for name in &history {
            apply_in(&mut tx, name).await?;
            info!(migration = %name, "Re-applied migration");
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn apply_migration(&self, name: &str) -> Result<(), StoreError> {
        migration_sql(name)?;

        let history = self.applied_history().await?;
        if history.iter().any(|applied| applied == name) {
            info!(migration = %name, "Migration already applied");
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        (&mut *tx).execute(sqlx::raw_sql(CREATE_BOOKKEEPING)).await?;
        apply_in(&mut tx, name).await?;
        tx.commit().await?;

        info!(migration = %name, "Migration applied");
        Ok(())
    }

    async fn reseed_identities(&self) -> Result<(), StoreError> {
        for kind in SERIAL_TABLES {
            let table = kind.table();
            sqlx::query(&format!(
                "SELECT setval(pg_get_serial_sequence('shop.{table}', 'id'), \
                 COALESCE((SELECT MAX(id) FROM shop.{table}), 0) + 1, false)"
            ))
            .execute(&self.pool)
            .await?;
        }
        debug!("Identity sequences reseeded");
        Ok(())
    }
}

// =============================================================================
// Binder
// =============================================================================

/// Connects a fresh pool per binding.
#[derive(Clone)]
pub struct PgBinder {
    database_url: SecretString,
    max_connections: u32,
}

impl std::fmt::Debug for PgBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgBinder")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl PgBinder {
    /// Create a binder for the given database.
    #[must_use]
    pub const fn new(database_url: SecretString, max_connections: u32) -> Self {
        Self {
            database_url,
            max_connections,
        }
    }
}

impl Binder for PgBinder {
    type Store = PgStore;

    async fn bind(&self) -> Result<PgStore, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(self.database_url.expose_secret())
            .await?;

        let store = PgStore::from_pool(pool, self.max_connections).await?;
        info!(shape = %store.shape(), "Bound store to database schema");
        Ok(store)
    }
}
