//! Ledger interface: the vault contract as an authoritative state source and
//! mutator.
//!
//! Submission and finalization are separate steps. A [`TxHandle`] only says the
//! transaction was accepted for inclusion; callers must go through
//! [`Ledger::await_finalized`] before acting on its outcome.

use std::{fmt, future::Future, time::Duration};

use alloy_primitives::{Address, TxHash, U256};
use thiserror::Error;

use crate::primitives::{TokenId, VaultId};

mod evm;
mod memory;

pub use evm::{EvmLedger, ITimeVault};
pub use memory::{InMemoryLedger, LedgerEvent};

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// The kind of state-changing transaction a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    /// Vault creation (`deposit` / `depositFor`).
    Create,
    /// Fund release (`withdraw`).
    Withdraw,
    /// Lock NFT destruction (`burn`).
    Burn,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Withdraw => "withdraw",
            Self::Burn => "burn",
        };
        f.write_str(label)
    }
}

/// Errors raised by ledger adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger refused the transaction at submission or reverted it.
    #[error("{kind} rejected: {reason}")]
    Rejected {
        /// Which transaction was rejected.
        kind: TxKind,
        /// Reason reported by the ledger.
        reason: String,
    },
    /// Finalization was not observed in time.
    #[error("{kind} finalization timed out")]
    Timeout {
        /// Which transaction timed out.
        kind: TxKind,
    },
    /// The handle does not refer to a transaction this ledger knows about.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxHash),
    /// The ledger answered with data that does not fit the vault model.
    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
    /// Transport failure talking to the ledger.
    #[error("ledger transport error: {0}")]
    Transport(String),
}

/// A vault as stored by the ledger. `unlocked` is deliberately absent: it is
/// derived by the reader at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRecord {
    /// Vault identifier.
    pub vault_id: VaultId,
    /// Account the vault belongs to (the recipient for gifted vaults).
    pub owner: Address,
    /// Locked amount in wei.
    pub amount: U256,
    /// Unix timestamp after which withdrawal is allowed.
    pub unlock_time: u64,
    /// Whether the funds have been released.
    pub withdrawn: bool,
    /// Lock NFT, absent once burned.
    pub token_id: Option<TokenId>,
}

/// Arguments of a vault creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateCall {
    /// `deposit(unlockTime, tokenURI, false)`: the submitter owns the vault.
    SelfMint {
        /// Unlock timestamp.
        unlock_time: u64,
        /// Token metadata URI.
        token_uri: String,
        /// Value sent with the transaction, in wei.
        value: U256,
    },
    /// `depositFor(recipient, unlockTime, tokenURI, includeGasReserve)`.
    Gift {
        /// Vault owner.
        recipient: Address,
        /// Unlock timestamp.
        unlock_time: u64,
        /// Token metadata URI.
        token_uri: String,
        /// Whether `value` includes the recipient's withdrawal gas reserve.
        include_gas_reserve: bool,
        /// Value sent with the transaction, in wei.
        value: U256,
    },
}

impl CreateCall {
    /// Value attached to the transaction.
    #[must_use]
    pub const fn value(&self) -> U256 {
        match self {
            Self::SelfMint { value, .. } | Self::Gift { value, .. } => *value,
        }
    }

    /// Unlock timestamp of the vault being created.
    #[must_use]
    pub const fn unlock_time(&self) -> u64 {
        match self {
            Self::SelfMint { unlock_time, .. } | Self::Gift { unlock_time, .. } => {
                *unlock_time
            }
        }
    }

    /// Token metadata URI.
    #[must_use]
    pub fn token_uri(&self) -> &str {
        match self {
            Self::SelfMint { token_uri, .. } | Self::Gift { token_uri, .. } => token_uri,
        }
    }
}

/// Reference to a submitted, not necessarily finalized, transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// What the transaction does.
    pub kind: TxKind,
}

/// Final status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Executed successfully.
    Success,
    /// Included but reverted.
    Reverted {
        /// Revert reason, when the ledger exposes one.
        reason: String,
    },
}

/// Authoritative outcome of a finalized transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// What the transaction did.
    pub kind: TxKind,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
    /// Execution status.
    pub status: TxStatus,
    /// Vault created by a successful [`TxKind::Create`] transaction.
    pub created_vault: Option<VaultId>,
}

impl TxReceipt {
    /// Whether the transaction executed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, TxStatus::Success)
    }
}

/// The vault contract as seen by this crate.
///
/// Implementations must report only finalized state from [`Ledger::vault`] and
/// must never resolve [`Ledger::await_finalized`] before the outcome is final.
pub trait Ledger: Send + Sync {
    /// Account that signs submitted transactions.
    fn submitter(&self) -> Address;

    /// Reads a vault. `Ok(None)` when the id is unknown.
    fn vault(
        &self,
        vault_id: VaultId,
    ) -> impl Future<Output = LedgerResult<Option<VaultRecord>>> + Send;

    /// Submits a vault creation transaction.
    fn submit_create(
        &self,
        call: CreateCall,
    ) -> impl Future<Output = LedgerResult<TxHandle>> + Send;

    /// Submits `withdraw(vault_id)`.
    fn submit_withdraw(
        &self,
        vault_id: VaultId,
    ) -> impl Future<Output = LedgerResult<TxHandle>> + Send;

    /// Submits `burn(token_id)`.
    fn submit_burn(
        &self,
        token_id: TokenId,
    ) -> impl Future<Output = LedgerResult<TxHandle>> + Send;

    /// Waits until the transaction is final or `timeout` elapses.
    ///
    /// A reverted transaction is `Ok` with [`TxStatus::Reverted`]; only a missing
    /// outcome is an error.
    fn await_finalized(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> impl Future<Output = LedgerResult<TxReceipt>> + Send;
}
