//! Type-safe price representation using decimal arithmetic.
//!
//! Prices are stored in the currency's standard unit (reais, not centavos)
//! and serialize as decimal strings (`"12.50"`), which is also how existing
//! backup files encode them. Numeric JSON values are accepted on read.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount is below zero.
    #[error("price cannot be negative: {0}")]
    Negative(Decimal),
    /// The input is not a decimal number.
    #[error("invalid price: {0}")]
    Invalid(String),
}

/// A non-negative monetary amount.
///
/// ```
/// use flor_core::Price;
/// use rust_decimal::Decimal;
///
/// let price = Price::new(Decimal::new(1250, 2)).unwrap();
/// assert_eq!(price.to_string(), "12.50");
/// assert!(Price::parse("-1").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Zero, the lowest valid price.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price from a decimal amount.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Negative` if the amount is below zero.
    pub fn new(amount: Decimal) -> Result<Self, PriceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative(amount));
        }
        Ok(Self(amount))
    }

    /// Parse a price from its decimal string form.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Invalid` if the string is not a decimal number and
    /// `PriceError::Negative` if it is below zero.
    pub fn parse(s: &str) -> Result<Self, PriceError> {
        let amount = s
            .trim()
            .parse::<Decimal>()
            .map_err(|e| PriceError::Invalid(format!("{s}: {e}")))?;
        Self::new(amount)
    }

    /// The amount in the currency's standard unit.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = PriceError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl std::str::FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_negative() {
        assert!(matches!(
            Price::new(Decimal::new(-1, 2)),
            Err(PriceError::Negative(_))
        ));
        assert!(Price::new(Decimal::ZERO).is_ok());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(Price::parse("abc"), Err(PriceError::Invalid(_))));
    }

    #[test]
    fn test_deserialize_from_string_and_number() {
        let from_str: Price = serde_json::from_str("\"19.90\"").unwrap();
        assert_eq!(from_str.amount(), Decimal::new(1990, 2));

        let from_num: Price = serde_json::from_str("7").unwrap();
        assert_eq!(from_num.amount(), Decimal::new(7, 0));
    }

    #[test]
    fn test_deserialize_negative_fails() {
        assert!(serde_json::from_str::<Price>("\"-3.00\"").is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let price = Price::parse("12.50").unwrap();
        assert_eq!(serde_json::to_string(&price).unwrap(), "\"12.50\"");
    }

    #[test]
    fn test_display_uses_two_places() {
        assert_eq!(Price::parse("3").unwrap().to_string(), "3.00");
    }
}
