//! Identifier types for auction entities
//!
//! `AuctionId` is the opaque content identifier assigned at creation.
//! `Address` is a validated bidder/seller identity on the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque auction identifier (content identifier of the metadata blob)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuctionId(String);

impl AuctionId {
    /// Create a new AuctionId
    ///
    /// # Panics
    /// Panics if the identifier is empty
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        assert!(!s.trim().is_empty(), "AuctionId must not be empty");
        Self(s)
    }

    /// Try to create an AuctionId, returning None if empty
    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuctionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Why an address string was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address contains whitespace")]
    Whitespace,

    #[error("malformed address: {0}")]
    Malformed(String),
}

/// Lisk base32 alphabet used in `lsk...` addresses
const LISK_ALPHABET: &str = "zxvcpmbn3465o978uyrtkqew2adsjhfg";
const LISK_PREFIX: &str = "lsk";
const LISK_BODY_LEN: usize = 38;
const EVM_BODY_LEN: usize = 40;

/// Ledger account address
///
/// Accepts EVM style (`0x` + 40 hex digits) and Lisk style
/// (`lsk` + 38 base32 characters). Comparison through [`Address::same_as`]
/// ignores hex digit case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an address string
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        if raw.is_empty() {
            return Err(AddressError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(AddressError::Whitespace);
        }

        if let Some(body) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            if body.len() == EVM_BODY_LEN && body.chars().all(|c| c.is_ascii_hexdigit()) {
                return Ok(Self(raw.to_string()));
            }
            return Err(AddressError::Malformed(raw.to_string()));
        }

        if let Some(body) = raw.strip_prefix(LISK_PREFIX) {
            if body.len() == LISK_BODY_LEN && body.chars().all(|c| LISK_ALPHABET.contains(c)) {
                return Ok(Self(raw.to_string()));
            }
        }

        Err(AddressError::Malformed(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for identity comparison
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Whether two addresses denote the same account
    pub fn same_as(&self, other: &Address) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}
