//! Value types for the catalog and order domain.
//!
//! Each type validates its invariant when parsed or deserialized, so a
//! snapshot that violates one fails to load instead of being replayed.

pub mod cart_uid;
pub mod email;
pub mod id;
pub mod price;
pub mod quantity;

pub use cart_uid::{CartUid, CartUidError};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Price, PriceError};
pub use quantity::{Quantity, QuantityError};
