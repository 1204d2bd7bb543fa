//! Reveal key derivation.
//!
//! The key that opens a vault's hidden content is a pure function of public
//! on-chain values:
//!
//! ```text
//! reveal_key = SHA256("timevault:reveal-key:v1" || vault_id (32 bytes BE) || unlock_time (8 bytes BE))
//! ```
//!
//! Both fields are fixed-width, so no two distinct `(vault_id, unlock_time)` pairs
//! share an encoding. Anyone who knows the vault id and its unlock time can derive
//! the key; pre-unlock secrecy comes from keeping the ciphertext's content hash
//! private until the vault is withdrawn.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::primitives::VaultId;

/// Label for deriving reveal keys.
const LABEL_REVEAL_KEY: &[u8] = b"timevault:reveal-key:v1";

/// Symmetric key (256-bit) that opens a vault's hidden content.
///
/// # Security
///
/// - The key is zeroized on drop.
/// - `Debug` never prints the key material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RevealKey([u8; 32]);

impl RevealKey {
    /// Creates a reveal key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding of the key, for handing to a recipient out of band.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl PartialEq for RevealKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for RevealKey {}

impl std::fmt::Debug for RevealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derives the reveal key for a vault.
///
/// `unlock_time` may be in the past; that is the normal case when revealing
/// content after withdrawal.
#[must_use]
pub fn derive_reveal_key(vault_id: VaultId, unlock_time: u64) -> RevealKey {
    let mut hasher = Sha256::new();
    hasher.update(LABEL_REVEAL_KEY);
    hasher.update(vault_id.to_be_bytes());
    hasher.update(unlock_time.to_be_bytes());
    let hash = hasher.finalize();

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hash);
    RevealKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let first = derive_reveal_key(VaultId::from(42), 1_700_000_000);
        let second = derive_reveal_key(VaultId::from(42), 1_700_000_000);
        assert_eq!(first, second);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_known_vector() {
        let key = derive_reveal_key(VaultId::from(42), 1_700_000_000);
        assert_eq!(
            key.to_hex(),
            "b5fdd0986f0211548b7a6402d4db2ff83f9ee3655b4784ae7fe0765a923efbb2"
        );
    }

    #[test_case((1, 100), (11, 0) ; "naive concatenation 1100")]
    #[test_case((1, 23), (12, 3) ; "naive concatenation 123")]
    #[test_case((0, 1), (1, 0) ; "swapped fields")]
    fn test_field_boundaries_do_not_collide(a: (u64, u64), b: (u64, u64)) {
        let key_a = derive_reveal_key(VaultId::from(a.0), a.1);
        let key_b = derive_reveal_key(VaultId::from(b.0), b.1);
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn test_boundary_regression_vectors() {
        assert_eq!(
            derive_reveal_key(VaultId::from(1), 100).to_hex(),
            "b03794a01cb3541af69ab6b09b25a2b6e03b3a758c7f117a15c48849cac0fb16"
        );
        assert_eq!(
            derive_reveal_key(VaultId::from(11), 0).to_hex(),
            "66bcd024973b3fac4ad9a2fba6042eb72c194a08479fef98ba7ee3e859c85256"
        );
    }

    #[test]
    fn test_full_width_vault_id() {
        let max = derive_reveal_key(VaultId(U256::MAX), u64::MAX);
        let zero = derive_reveal_key(VaultId::from(0), 0);
        assert_ne!(max, zero);
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = derive_reveal_key(VaultId::from(7), 1);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&key.to_hex()));
    }
}
