//! Cart item quantity.

use serde::{Deserialize, Serialize};

/// Error returned for a zero or negative quantity.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("quantity must be positive, got {0}")]
pub struct QuantityError(pub i32);

/// A strictly positive item count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Quantity(i32);

impl Quantity {
    /// Create a quantity.
    ///
    /// # Errors
    ///
    /// Returns `QuantityError` if `qty` is zero or negative.
    pub const fn new(qty: i32) -> Result<Self, QuantityError> {
        if qty <= 0 {
            return Err(QuantityError(qty));
        }
        Ok(Self(qty))
    }

    /// The count as an `i32`.
    #[must_use]
    pub const fn get(&self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Quantity {
    type Error = QuantityError;

    fn try_from(qty: i32) -> Result<Self, Self::Error> {
        Self::new(qty)
    }
}

impl From<Quantity> for i32 {
    fn from(qty: Quantity) -> Self {
        qty.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_only() {
        assert!(Quantity::new(1).is_ok());
        assert_eq!(Quantity::new(0), Err(QuantityError(0)));
        assert_eq!(Quantity::new(-2), Err(QuantityError(-2)));
    }

    #[test]
    fn test_deserialize_rejects_zero() {
        assert!(serde_json::from_str::<Quantity>("0").is_err());
        assert_eq!(serde_json::from_str::<Quantity>("3").unwrap().get(), 3);
    }
}
