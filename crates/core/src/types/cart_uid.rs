//! Shareable cart code.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`CartUid`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CartUidError {
    /// The code does not have exactly [`CartUid::LENGTH`] characters.
    #[error("cart uid must be exactly {expected} characters, got {actual}")]
    WrongLength {
        /// Required length.
        expected: usize,
        /// Length of the input.
        actual: usize,
    },
    /// The code contains something other than `0-9` / `a-z`.
    #[error("cart uid may only contain lowercase letters and digits: {0:?}")]
    InvalidCharacter(String),
}

/// The short public code used in cart links (`/carrinho/<uid>`).
///
/// ## Constraints
///
/// - Exactly 8 characters
/// - Alphabet `0123456789abcdefghijklmnopqrstuvwxyz`
///
/// ```
/// use flor_core::CartUid;
///
/// assert!(CartUid::parse("a1b2c3d4").is_ok());
/// assert!(CartUid::parse("A1B2C3D4").is_err());
/// assert!(CartUid::parse("short").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CartUid(String);

impl CartUid {
    /// Required length of a cart code.
    pub const LENGTH: usize = 8;

    /// Parse a cart code.
    ///
    /// # Errors
    ///
    /// Returns an error if the input has the wrong length or characters
    /// outside the lowercase alphanumeric alphabet.
    pub fn parse(s: &str) -> Result<Self, CartUidError> {
        let actual = s.chars().count();
        if actual != Self::LENGTH {
            return Err(CartUidError::WrongLength {
                expected: Self::LENGTH,
                actual,
            });
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        {
            return Err(CartUidError::InvalidCharacter(s.to_owned()));
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CartUid {
    type Error = CartUidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CartUid> for String {
    fn from(uid: CartUid) -> Self {
        uid.0
    }
}

impl fmt::Display for CartUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_length() {
        assert!(matches!(
            CartUid::parse("abc"),
            Err(CartUidError::WrongLength {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_rejects_uppercase_and_symbols() {
        assert!(matches!(
            CartUid::parse("abcd-123"),
            Err(CartUidError::InvalidCharacter(_))
        ));
        assert!(CartUid::parse("ABCD1234").is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        assert!(serde_json::from_str::<CartUid>("\"k3j9x0qa\"").is_ok());
        assert!(serde_json::from_str::<CartUid>("\"k3j9\"").is_err());
    }
}
