//! Catalog and order entities.
//!
//! Field names serialize in camelCase, matching the backup files written by
//! the previous backend so those files stay readable.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    CartId, CartItemId, CartUid, CategoryId, ConfigId, Email, Price, ProductId, ProductImageId,
    Quantity, UserId,
};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Email,
}

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A catalog product.
///
/// Category membership is not part of this record: it lives either in the
/// legacy `category_id` column or in [`ProductCategory`] rows, depending on
/// which schema the store is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Price,
    #[serde(default)]
    pub image_url: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Association between a product and one of its categories.
///
/// Identity is the `(product_id, category_id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCategory {
    pub product_id: ProductId,
    pub category_id: CategoryId,
}

/// An additional product image. `order` is a sort key, not an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub id: ProductImageId,
    pub product_id: ProductId,
    pub image_url: String,
    #[serde(default)]
    pub order: i32,
}

/// A customer cart, shared by link through its `uid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: CartId,
    pub uid: CartUid,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub delivery_method: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub needs_change: bool,
    #[serde(default)]
    pub change_for: Option<Decimal>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line in a cart.
///
/// `price` is the product's unit price when the item was added. It is never
/// recomputed from the product afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub qty: Quantity,
    pub price: Price,
}

/// Site-wide settings. At most one row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub id: ConfigId,
    #[serde(default)]
    pub hero_image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_item_reads_legacy_field_names() {
        let json = r#"{"id":9,"cartId":3,"productId":1,"qty":2,"price":"15.00"}"#;
        let item: CartItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.cart_id, CartId::new(3));
        assert_eq!(item.qty.get(), 2);
        assert_eq!(item.price, Price::parse("15").unwrap());
    }

    #[test]
    fn test_cart_defaults_optional_metadata() {
        let json = r#"{
            "id": 1,
            "uid": "abcd1234",
            "createdAt": "2025-01-10T12:00:00.000Z",
            "updatedAt": "2025-01-10T12:00:00.000Z"
        }"#;
        let cart: Cart = serde_json::from_str(json).unwrap();
        assert!(!cart.needs_change);
        assert!(cart.customer_name.is_none());
    }

    #[test]
    fn test_product_rejects_negative_price() {
        let json = r#"{
            "id": 1, "name": "Rosa", "price": "-1.00", "active": true,
            "createdAt": "2025-01-10T12:00:00Z", "updatedAt": "2025-01-10T12:00:00Z"
        }"#;
        assert!(serde_json::from_str::<Product>(json).is_err());
    }
}
