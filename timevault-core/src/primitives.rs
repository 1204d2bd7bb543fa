//! Identifier newtypes shared by every component.
//!
//! Vault and token identifiers are `uint256` values on chain. They are wrapped so a
//! vault id can never be handed to `burn` by mistake.

use std::{fmt, str::FromStr};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::TimeVaultError;

/// Identifier of a vault, assigned by the ledger at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VaultId(pub U256);

/// Identifier of the lock NFT minted alongside a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub U256);

macro_rules! impl_id {
    ($name:ident, $attribute:literal) => {
        impl $name {
            /// Returns the identifier as a 32-byte big-endian word.
            #[must_use]
            pub const fn to_be_bytes(self) -> [u8; 32] {
                self.0.to_be_bytes::<32>()
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(U256::from(value))
            }
        }

        impl From<U256> for $name {
            fn from(value: U256) -> Self {
                Self(value)
            }
        }

        impl From<$name> for U256 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        /// Parses a decimal or `0x`-prefixed hexadecimal identifier.
        impl FromStr for $name {
            type Err = TimeVaultError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                let parsed = s.strip_prefix("0x").map_or_else(
                    || U256::from_str_radix(s, 10),
                    |hex| U256::from_str_radix(hex, 16),
                );
                parsed.map(Self).map_err(|_| TimeVaultError::Validation {
                    attribute: $attribute.to_string(),
                    reason: format!("`{s}` is not a valid uint256"),
                })
            }
        }
    };
}

impl_id!(VaultId, "vault_id");
impl_id!(TokenId, "token_id");

/// Content address of a blob in the external content store (an IPFS CID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wraps a content hash, stripping an `ipfs://` scheme if present.
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        let hash = hash.into();
        Self(hash.strip_prefix("ipfs://").unwrap_or(&hash).to_string())
    }

    /// Returns the bare hash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the `ipfs://` URI used for token metadata and images.
    #[must_use]
    pub fn to_uri(&self) -> String {
        format!("ipfs://{}", self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
