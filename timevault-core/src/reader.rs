//! Read-only view of a vault with `unlocked` derived at read time.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::{
    clock::Clock,
    error::{TimeVaultError, TimeVaultResult},
    ledger::Ledger,
    primitives::{TokenId, VaultId},
};

/// A vault as observed at `read_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSnapshot {
    /// Vault identifier.
    pub vault_id: VaultId,
    /// Current owner.
    pub owner: Address,
    /// Locked amount in wei.
    pub amount: U256,
    /// Unix timestamp after which withdrawal is allowed.
    pub unlock_time: u64,
    /// Whether the funds have been released.
    pub withdrawn: bool,
    /// `read_at >= unlock_time`.
    pub unlocked: bool,
    /// Lock NFT, absent once burned.
    pub token_id: Option<TokenId>,
    /// Clock reading used to derive `unlocked`.
    pub read_at: u64,
}

impl VaultSnapshot {
    /// Whether a withdrawal may be started.
    #[must_use]
    pub const fn can_withdraw(&self) -> bool {
        self.unlocked && !self.withdrawn
    }

    /// Seconds until unlock, zero once unlocked.
    #[must_use]
    pub const fn seconds_remaining(&self) -> u64 {
        self.unlock_time.saturating_sub(self.read_at)
    }
}

/// Reads vaults from a [`Ledger`]. Never caches: every call goes to the ledger.
pub struct VaultStateReader<L> {
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
}

impl<L> Clone for VaultStateReader<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<L: Ledger> VaultStateReader<L> {
    /// Creates a reader over `ledger`, deriving `unlocked` from `clock`.
    pub fn new(ledger: Arc<L>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Returns the current snapshot of `vault_id`.
    ///
    /// # Errors
    ///
    /// - [`TimeVaultError::NotFound`] if the ledger has no such vault.
    /// - [`TimeVaultError::Ledger`] if the ledger cannot be reached.
    pub async fn read(&self, vault_id: VaultId) -> TimeVaultResult<VaultSnapshot> {
        let record = self
            .ledger
            .vault(vault_id)
            .await?
            .ok_or(TimeVaultError::NotFound(vault_id))?;

        let read_at = self.clock.now();
        log::debug!("read vault {vault_id} at {read_at}");
        Ok(VaultSnapshot {
            vault_id: record.vault_id,
            owner: record.owner,
            amount: record.amount,
            unlock_time: record.unlock_time,
            withdrawn: record.withdrawn,
            unlocked: read_at >= record.unlock_time,
            token_id: record.token_id,
            read_at,
        })
    }
}
