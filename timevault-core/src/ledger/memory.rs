//! In-memory implementation of the vault contract.
//!
//! **NOT a real ledger.** It exists for tests, simulations and offline demos. It
//! enforces the same rules as the deployed contract (locked vaults cannot be
//! withdrawn, a vault is withdrawn at most once, only live tokens can be burned,
//! only the owner may act) and keeps a causal log of submissions and
//! finalizations so ordering guarantees can be asserted.

#![allow(clippy::significant_drop_tightening)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use alloy_primitives::{keccak256, Address, TxHash, U256};

use super::{
    CreateCall, Ledger, LedgerError, LedgerResult, TxHandle, TxKind, TxReceipt, TxStatus,
    VaultRecord,
};
use crate::{
    clock::Clock,
    primitives::{TokenId, VaultId},
};

/// Entry of the in-memory ledger's causal log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// A transaction was accepted for inclusion.
    Submitted {
        /// Transaction kind.
        kind: TxKind,
        /// Transaction hash.
        tx_hash: TxHash,
        /// Vault id (create: none yet, so zero), vault id (withdraw) or token id (burn).
        target: U256,
    },
    /// A transaction's outcome became final.
    Finalized {
        /// Transaction kind.
        kind: TxKind,
        /// Transaction hash.
        tx_hash: TxHash,
        /// Whether it executed successfully.
        success: bool,
    },
}

#[derive(Debug, Clone)]
enum PendingTx {
    Create(CreateCall),
    Withdraw(VaultId),
    Burn(TokenId),
}

impl PendingTx {
    const fn kind(&self) -> TxKind {
        match self {
            Self::Create(_) => TxKind::Create,
            Self::Withdraw(_) => TxKind::Withdraw,
            Self::Burn(_) => TxKind::Burn,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    vaults: BTreeMap<VaultId, VaultRecord>,
    live_tokens: HashMap<TokenId, VaultId>,
    pending: HashMap<TxHash, PendingTx>,
    receipts: HashMap<TxHash, TxReceipt>,
    events: Vec<LedgerEvent>,
    next_vault_id: u64,
    next_token_id: u64,
    nonce: u64,
    block_number: u64,
}

#[derive(Debug, Default)]
struct FaultPlan {
    finalization_delay: Duration,
    stalled: HashSet<TxKind>,
    reject_on_submit: HashMap<TxKind, String>,
    revert_on_finalize: HashMap<TxKind, String>,
    read_failure: Option<String>,
}

/// In-memory vault contract.
pub struct InMemoryLedger {
    submitter: Address,
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
    faults: Mutex<FaultPlan>,
}

impl InMemoryLedger {
    /// Creates an empty ledger whose transactions are signed by `submitter`.
    #[must_use]
    pub fn new(submitter: Address, clock: Arc<dyn Clock>) -> Self {
        Self {
            submitter,
            clock,
            state: Mutex::new(LedgerState {
                next_vault_id: 1,
                next_token_id: 1,
                ..LedgerState::default()
            }),
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Inserts a vault directly, bypassing creation. Returns its id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_vault(&self, record: VaultRecord) -> VaultId {
        let mut state = self.state.lock().expect("ledger state poisoned");
        if let Some(token_id) = record.token_id {
            state.live_tokens.insert(token_id, record.vault_id);
            if let Ok(id) = u64::try_from(token_id.0) {
                state.next_token_id = state.next_token_id.max(id.saturating_add(1));
            }
        }
        // Keep ledger-assigned ids clear of inserted ones.
        if let Ok(id) = u64::try_from(record.vault_id.0) {
            state.next_vault_id = state.next_vault_id.max(id.saturating_add(1));
        }
        let vault_id = record.vault_id;
        state.vaults.insert(vault_id, record);
        vault_id
    }

    /// Delays every finalization by `delay` (simulated block time).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn set_finalization_delay(&self, delay: Duration) {
        self.faults.lock().expect("faults poisoned").finalization_delay = delay;
    }

    /// Transactions of `kind` never finalize.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn stall_finalization(&self, kind: TxKind) {
        self.faults.lock().expect("faults poisoned").stalled.insert(kind);
    }

    /// The next submission of `kind` is refused with `reason`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn reject_next(&self, kind: TxKind, reason: impl Into<String>) {
        self.faults
            .lock()
            .expect("faults poisoned")
            .reject_on_submit
            .insert(kind, reason.into());
    }

    /// The next transaction of `kind` is included but reverts with `reason`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn revert_next(&self, kind: TxKind, reason: impl Into<String>) {
        self.faults
            .lock()
            .expect("faults poisoned")
            .revert_on_finalize
            .insert(kind, reason.into());
    }

    /// Every read fails with a transport error until cleared with `None`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_reads(&self, reason: Option<String>) {
        self.faults.lock().expect("faults poisoned").read_failure = reason;
    }

    /// Snapshot of the causal log.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.state.lock().expect("ledger state poisoned").events.clone()
    }

    /// Number of submitted transactions of `kind`.
    #[must_use]
    pub fn submissions(&self, kind: TxKind) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, LedgerEvent::Submitted { kind: k, .. } if *k == kind))
            .count()
    }

    fn lock_state(&self) -> LedgerResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Transport("ledger state poisoned".to_string()))
    }

    fn lock_faults(&self) -> LedgerResult<MutexGuard<'_, FaultPlan>> {
        self.faults
            .lock()
            .map_err(|_| LedgerError::Transport("fault plan poisoned".to_string()))
    }

    fn submit(&self, tx: PendingTx, target: U256) -> LedgerResult<TxHandle> {
        let kind = tx.kind();
        let rejection = self.lock_faults()?.reject_on_submit.remove(&kind);
        if let Some(reason) = rejection {
            return Err(LedgerError::Rejected { kind, reason });
        }

        let mut state = self.lock_state()?;
        // Gas estimation runs the call against current state.
        check(&state, &tx, self.submitter, self.clock.now())
            .map_err(|reason| LedgerError::Rejected { kind, reason })?;

        state.nonce += 1;
        let tx_hash = keccak256(state.nonce.to_be_bytes());
        state.pending.insert(tx_hash, tx);
        state.events.push(LedgerEvent::Submitted {
            kind,
            tx_hash,
            target,
        });
        Ok(TxHandle { tx_hash, kind })
    }

    async fn finalize(&self, handle: &TxHandle) -> LedgerResult<TxReceipt> {
        let (delay, stalled) = {
            let faults = self.lock_faults()?;
            (
                faults.finalization_delay,
                faults.stalled.contains(&handle.kind),
            )
        };

        if stalled {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let forced_revert = self.lock_faults()?.revert_on_finalize.remove(&handle.kind);
        let mut state = self.lock_state()?;
        if let Some(receipt) = state.receipts.get(&handle.tx_hash) {
            return Ok(receipt.clone());
        }
        let tx = state
            .pending
            .remove(&handle.tx_hash)
            .ok_or(LedgerError::UnknownTransaction(handle.tx_hash))?;

        let now = self.clock.now();
        let outcome = forced_revert.map_or_else(
            || check(&state, &tx, self.submitter, now).map(|()| execute(&mut state, tx, self.submitter)),
            Err,
        );

        state.block_number += 1;
        let (status, created_vault) = match outcome {
            Ok(created_vault) => (TxStatus::Success, created_vault),
            Err(reason) => (TxStatus::Reverted { reason }, None),
        };
        let receipt = TxReceipt {
            tx_hash: handle.tx_hash,
            kind: handle.kind,
            block_number: Some(state.block_number),
            status,
            created_vault,
        };
        state.events.push(LedgerEvent::Finalized {
            kind: handle.kind,
            tx_hash: handle.tx_hash,
            success: receipt.is_success(),
        });
        state.receipts.insert(handle.tx_hash, receipt.clone());
        Ok(receipt)
    }
}

/// Contract preconditions. `Err` carries the revert reason.
fn check(state: &LedgerState, tx: &PendingTx, caller: Address, now: u64) -> Result<(), String> {
    match tx {
        PendingTx::Create(call) => {
            if call.unlock_time() <= now {
                return Err("unlock time must be in the future".to_string());
            }
            if call.value().is_zero() {
                return Err("must lock a positive amount".to_string());
            }
            if let CreateCall::Gift { recipient, .. } = call {
                if recipient.is_zero() {
                    return Err("invalid recipient".to_string());
                }
            }
            Ok(())
        }
        PendingTx::Withdraw(vault_id) => {
            let vault = state
                .vaults
                .get(vault_id)
                .ok_or_else(|| "vault does not exist".to_string())?;
            if vault.owner != caller {
                return Err("caller is not the vault owner".to_string());
            }
            if vault.withdrawn {
                return Err("vault already withdrawn".to_string());
            }
            if now < vault.unlock_time {
                return Err("vault is still locked".to_string());
            }
            Ok(())
        }
        PendingTx::Burn(token_id) => {
            let vault_id = state
                .live_tokens
                .get(token_id)
                .ok_or_else(|| "token does not exist".to_string())?;
            let vault = state
                .vaults
                .get(vault_id)
                .ok_or_else(|| "token has no vault".to_string())?;
            if vault.owner != caller {
                return Err("caller is not the token owner".to_string());
            }
            Ok(())
        }
    }
}

/// Applies a transaction that passed [`check`]. Returns the created vault, if any.
fn execute(state: &mut LedgerState, tx: PendingTx, caller: Address) -> Option<VaultId> {
    match tx {
        PendingTx::Create(call) => {
            let vault_id = VaultId::from(state.next_vault_id);
            let token_id = TokenId::from(state.next_token_id);
            state.next_vault_id += 1;
            state.next_token_id += 1;

            let owner = match &call {
                CreateCall::SelfMint { .. } => caller,
                CreateCall::Gift { recipient, .. } => *recipient,
            };
            state.live_tokens.insert(token_id, vault_id);
            state.vaults.insert(
                vault_id,
                VaultRecord {
                    vault_id,
                    owner,
                    amount: call.value(),
                    unlock_time: call.unlock_time(),
                    withdrawn: false,
                    token_id: Some(token_id),
                },
            );
            Some(vault_id)
        }
        PendingTx::Withdraw(vault_id) => {
            if let Some(vault) = state.vaults.get_mut(&vault_id) {
                vault.withdrawn = true;
            }
            None
        }
        PendingTx::Burn(token_id) => {
            if let Some(vault_id) = state.live_tokens.remove(&token_id) {
                if let Some(vault) = state.vaults.get_mut(&vault_id) {
                    vault.token_id = None;
                }
            }
            None
        }
    }
}

impl Ledger for InMemoryLedger {
    fn submitter(&self) -> Address {
        self.submitter
    }

    async fn vault(&self, vault_id: VaultId) -> LedgerResult<Option<VaultRecord>> {
        let read_failure = self.lock_faults()?.read_failure.clone();
        if let Some(reason) = read_failure {
            return Err(LedgerError::Transport(reason));
        }
        Ok(self.lock_state()?.vaults.get(&vault_id).cloned())
    }

    async fn submit_create(&self, call: CreateCall) -> LedgerResult<TxHandle> {
        self.submit(PendingTx::Create(call), U256::ZERO)
    }

    async fn submit_withdraw(&self, vault_id: VaultId) -> LedgerResult<TxHandle> {
        self.submit(PendingTx::Withdraw(vault_id), vault_id.into())
    }

    async fn submit_burn(&self, token_id: TokenId) -> LedgerResult<TxHandle> {
        self.submit(PendingTx::Burn(token_id), token_id.into())
    }

    async fn await_finalized(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> LedgerResult<TxReceipt> {
        tokio::time::timeout(timeout, self.finalize(handle))
            .await
            .map_err(|_| LedgerError::Timeout { kind: handle.kind })?
    }
}
