//! Reveal protocol surface: seal content for a vault and open it after
//! withdrawal.

use std::sync::Arc;

use crate::{
    codec::{self, DecryptionError},
    derivation::derive_reveal_key,
    error::{TimeVaultError, TimeVaultResult},
    ledger::Ledger,
    primitives::{ContentHash, VaultId},
    reader::VaultStateReader,
    store::ContentStore,
};

/// Decrypts hidden content of `vault_id` with the key derived from its unlock
/// time.
///
/// # Errors
///
/// Returns a [`DecryptionError`] if the ciphertext is malformed or was not sealed
/// for `(vault_id, unlock_time)`. Never retried: the same inputs fail the same way.
pub fn decrypt_content(
    vault_id: VaultId,
    unlock_time: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, DecryptionError> {
    let key = derive_reveal_key(vault_id, unlock_time);
    codec::decrypt(ciphertext, &key)
}

/// Encrypts `plaintext` so that only [`decrypt_content`] with the same
/// `(vault_id, unlock_time)` opens it.
///
/// # Errors
///
/// Returns [`DecryptionError::Encryption`] if the cipher refuses the input.
pub fn seal_content(
    vault_id: VaultId,
    unlock_time: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, DecryptionError> {
    let key = derive_reveal_key(vault_id, unlock_time);
    codec::encrypt(plaintext, &key)
}

/// Seals content against live vault state and reveals it once the vault is
/// settled. The unlock time always comes from the ledger, never from the caller.
pub struct RevealClient<L, S> {
    reader: VaultStateReader<L>,
    store: Arc<S>,
}

impl<L: Ledger, S: ContentStore> RevealClient<L, S> {
    /// Creates a client reading vaults through `reader` and blobs from `store`.
    #[must_use]
    pub const fn new(reader: VaultStateReader<L>, store: Arc<S>) -> Self {
        Self { reader, store }
    }

    /// Encrypts `plaintext` for an existing vault and uploads the ciphertext.
    ///
    /// The returned hash is what the recipient needs to reveal; keeping it private
    /// until withdrawal is what keeps the content hidden.
    ///
    /// # Errors
    ///
    /// - [`TimeVaultError::NotFound`] for an unknown vault.
    /// - [`TimeVaultError::Validation`] if the vault is already withdrawn.
    /// - [`TimeVaultError::ContentStore`] / [`TimeVaultError::NetworkError`] if the
    ///   upload fails.
    pub async fn seal(&self, vault_id: VaultId, plaintext: &[u8]) -> TimeVaultResult<ContentHash> {
        let snapshot = self.reader.read(vault_id).await?;
        if snapshot.withdrawn {
            return Err(TimeVaultError::Validation {
                attribute: "vault_id".to_string(),
                reason: format!("vault {vault_id} is already withdrawn"),
            });
        }

        let ciphertext = seal_content(vault_id, snapshot.unlock_time, plaintext)?;
        let hash = self.store.upload(ciphertext).await?;
        log::info!("sealed {} bytes for vault {vault_id} as {hash}", plaintext.len());
        Ok(hash)
    }

    /// Fetches and decrypts hidden content of a withdrawn vault.
    ///
    /// # Errors
    ///
    /// - [`TimeVaultError::NotFound`] for an unknown vault.
    /// - [`TimeVaultError::Validation`] if the vault has not been withdrawn yet.
    /// - [`TimeVaultError::ContentStore`] if the ciphertext cannot be fetched.
    /// - [`TimeVaultError::Decryption`] if the ciphertext does not belong to this
    ///   vault or is corrupted.
    pub async fn reveal(&self, vault_id: VaultId, hash: &ContentHash) -> TimeVaultResult<Vec<u8>> {
        let snapshot = self.reader.read(vault_id).await?;
        if !snapshot.withdrawn {
            return Err(TimeVaultError::Validation {
                attribute: "vault_id".to_string(),
                reason: format!("vault {vault_id} must be withdrawn before its content is revealed"),
            });
        }

        let ciphertext = self.store.fetch(hash).await?;
        let plaintext = decrypt_content(vault_id, snapshot.unlock_time, &ciphertext)?;
        log::info!("revealed {} bytes of vault {vault_id}", plaintext.len());
        Ok(plaintext)
    }
}
