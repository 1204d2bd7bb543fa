//! Foreign bindings for the recipient-side reveal surface.

use crate::{derivation::derive_reveal_key, error::TimeVaultError, reveal};

/// Decrypts hidden vault content. `vault_id` is a decimal or `0x` hex uint256.
///
/// # Errors
///
/// [`TimeVaultError::Validation`] for an unparsable id,
/// [`TimeVaultError::Decryption`] if the ciphertext does not open.
#[uniffi::export]
pub fn decrypt_vault_content(
    vault_id: &str,
    unlock_time: u64,
    ciphertext: Vec<u8>,
) -> Result<Vec<u8>, TimeVaultError> {
    Ok(reveal::decrypt_content(vault_id.parse()?, unlock_time, &ciphertext)?)
}

/// Hex-encoded reveal key of a vault.
///
/// # Errors
///
/// [`TimeVaultError::Validation`] for an unparsable id.
#[uniffi::export]
pub fn reveal_key_hex(vault_id: &str, unlock_time: u64) -> Result<String, TimeVaultError> {
    Ok(derive_reveal_key(vault_id.parse()?, unlock_time).to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_vault_content() {
        let sealed = reveal::seal_content(42u64.into(), 1_700_000_000, b"stub").unwrap();
        assert_eq!(
            decrypt_vault_content("0x2a", 1_700_000_000, sealed).unwrap(),
            b"stub"
        );
        assert!(matches!(
            decrypt_vault_content("not-a-number", 1, vec![]),
            Err(TimeVaultError::Validation { .. })
        ));
    }
}
