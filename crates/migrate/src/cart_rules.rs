//! Cart item pricing and replay ordering.
//!
//! A cart item's `price` is the product's unit price at the moment the item
//! was added. Replays write it back verbatim, even if the product has been
//! repriced since.

use flor_core::{CartId, CartItem, CartItemId, Product, Quantity};

use crate::replay::ReplayError;
use crate::snapshot::SnapshotCart;
use crate::store::Record;

/// Build a new cart item, freezing the product's current price.
#[must_use]
pub fn capture_item(cart_id: CartId, id: CartItemId, product: &Product, qty: Quantity) -> CartItem {
    CartItem {
        id,
        cart_id,
        product_id: product.id,
        qty,
        price: product.price,
    }
}

/// Split snapshot carts into the cart pass and the item pass.
///
/// Item records are copied unchanged, price included. Every cart row lands
/// in the first pass, so no item is written before its cart exists.
///
/// # Errors
///
/// Returns `ReplayError::MisplacedItem` if an item nested under one cart
/// names another.
pub fn cart_pass_records(carts: &[SnapshotCart]) -> Result<(Vec<Record>, Vec<Record>), ReplayError> {
    let mut cart_records = Vec::with_capacity(carts.len());
    let mut item_records = Vec::new();

    for entry in carts {
        for item in &entry.items {
            if item.cart_id != entry.cart.id {
                return Err(ReplayError::MisplacedItem {
                    item: item.id,
                    nested_under: entry.cart.id,
                    cart_id: item.cart_id,
                });
            }
            item_records.push(Record::CartItem(item.clone()));
        }
        cart_records.push(Record::Cart(entry.cart.clone()));
    }

    Ok((cart_records, item_records))
}
