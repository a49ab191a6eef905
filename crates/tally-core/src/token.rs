//! Application tokens.
//!
//! An application is identified externally by an opaque 36-character token
//! drawn from the base58 alphabet. Tokens are issued once at creation and
//! never change. Uniqueness is probabilistic at generation time; the
//! storage-level `UNIQUE` constraint is the final authority.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Length of every issued token.
pub const TOKEN_LENGTH: usize = 36;

/// Base58 alphabet (no `0`, `O`, `I`, `l`).
pub const TOKEN_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Opaque application token.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationToken(String);

impl ApplicationToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let token = (0..TOKEN_LENGTH)
            .map(|_| char::from(TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())]))
            .collect();
        Self(token)
    }

    /// Wrap a raw string without validation.
    ///
    /// Event payloads carry whatever the producer sent; lookups by such a
    /// token simply miss when it is malformed.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Strictly parse a well-formed token.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.len() == TOKEN_LENGTH && s.bytes().all(|b| TOKEN_ALPHABET.contains(&b)) {
            Ok(Self(s.to_owned()))
        } else {
            Err(CoreError::InvalidToken(s.to_owned()))
        }
    }

    /// Whether the token has the issued shape.
    pub fn is_well_formed(&self) -> bool {
        Self::parse(&self.0).is_ok()
    }

    /// Borrow the raw token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ApplicationToken {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ApplicationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
