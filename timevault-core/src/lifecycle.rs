//! Withdraw-then-burn state machine for a single vault.
//!
//! ```text
//! AwaitingWithdraw --withdraw finalized OK-------> AwaitingBurn
//! AwaitingWithdraw --rejected / reverted / timeout-> Failed(withdraw)
//! AwaitingBurn     --no token---------------------> Done
//! AwaitingBurn     --burn finalized OK------------> Done
//! AwaitingBurn     --rejected / reverted / timeout-> Failed(burn)
//! ```
//!
//! `Done` and `Failed` are absorbing. A session never caches `withdrawn` or the
//! token id across awaits: the burn phase re-reads the vault before acting.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use alloy_primitives::TxHash;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::{
    error::{TimeVaultError, TimeVaultResult},
    ledger::{Ledger, LedgerError, LedgerResult, TxHandle, TxKind, TxReceipt, TxStatus},
    primitives::VaultId,
    reader::VaultStateReader,
};

/// Why a session ended in [`LifecycleState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The ledger refused the transaction or it reverted.
    Rejected(String),
    /// The vault had already been withdrawn by someone else or an earlier session.
    AlreadyWithdrawn,
    /// Finalization was not observed within the session timeout. The transaction
    /// may still land; re-read the vault to find out.
    Timeout,
    /// The ledger could not be reached.
    Ledger(String),
    /// The ledger reported a state that contradicts a finalized outcome.
    InvariantViolation(String),
}

/// Terminal failure of a lifecycle session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleFailure {
    /// Phase that failed.
    pub phase: TxKind,
    /// What went wrong.
    pub reason: FailureReason,
}

impl fmt::Display for LifecycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::Rejected(reason) => write!(f, "{}-error: {reason}", self.phase),
            FailureReason::AlreadyWithdrawn => f.write_str("already-withdrawn"),
            FailureReason::Timeout => write!(f, "{}-timeout", self.phase),
            FailureReason::Ledger(reason) => write!(f, "{}-ledger-error: {reason}", self.phase),
            FailureReason::InvariantViolation(reason) => {
                write!(f, "{}-invariant-violation: {reason}", self.phase)
            }
        }
    }
}

/// State of a withdrawal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// Withdraw not yet finalized.
    AwaitingWithdraw,
    /// Funds released; the lock NFT still has to be burned.
    AwaitingBurn,
    /// Funds released and token burned (or there was no token).
    Done,
    /// The session stopped.
    Failed(LifecycleFailure),
}

impl LifecycleState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingWithdraw => f.write_str("awaiting-withdraw"),
            Self::AwaitingBurn => f.write_str("awaiting-burn"),
            Self::Done => f.write_str("done"),
            Self::Failed(failure) => write!(f, "failed({failure})"),
        }
    }
}

/// A state change together with the transaction that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State entered.
    pub state: LifecycleState,
    /// Transaction behind the transition, if one was submitted. On a finalization
    /// timeout this is the transaction whose outcome is still unknown.
    pub tx_hash: Option<TxHash>,
}

/// What allows the session to burn.
#[derive(Debug, Clone, Copy)]
enum WithdrawEvidence {
    /// This session's withdraw finalized successfully.
    Finalized(TxHash),
    /// The session was resumed and the ledger already shows the vault withdrawn.
    LedgerObserved,
}

impl fmt::Display for WithdrawEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finalized(tx_hash) => write!(f, "withdraw {tx_hash}"),
            Self::LedgerObserved => f.write_str("ledger state"),
        }
    }
}

/// One withdrawal session for one vault.
pub struct WithdrawalLifecycle<L> {
    ledger: Arc<L>,
    reader: VaultStateReader<L>,
    vault_id: VaultId,
    timeout: Duration,
    state: LifecycleState,
    evidence: Option<WithdrawEvidence>,
    history: Vec<Transition>,
    progress: Option<mpsc::UnboundedSender<Transition>>,
}

impl<L: Ledger> WithdrawalLifecycle<L> {
    /// Starts a session in [`LifecycleState::AwaitingWithdraw`].
    ///
    /// The caller is expected to have checked eligibility (see [`Self::prepare`]);
    /// a premature withdraw is left to the ledger to reject.
    #[must_use]
    pub const fn new(
        ledger: Arc<L>,
        reader: VaultStateReader<L>,
        vault_id: VaultId,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            reader,
            vault_id,
            timeout,
            state: LifecycleState::AwaitingWithdraw,
            evidence: None,
            history: Vec::new(),
            progress: None,
        }
    }

    /// Reads the vault and starts a session only if it is unlocked and not yet
    /// withdrawn.
    ///
    /// # Errors
    ///
    /// - [`TimeVaultError::NotFound`] for an unknown vault.
    /// - [`TimeVaultError::Validation`] if the vault is locked or already withdrawn.
    pub async fn prepare(
        ledger: Arc<L>,
        reader: VaultStateReader<L>,
        vault_id: VaultId,
        timeout: Duration,
    ) -> TimeVaultResult<Self> {
        let snapshot = reader.read(vault_id).await?;
        if snapshot.withdrawn {
            return Err(TimeVaultError::Validation {
                attribute: "vault_id".to_string(),
                reason: format!("vault {vault_id} is already withdrawn"),
            });
        }
        if !snapshot.unlocked {
            return Err(TimeVaultError::Validation {
                attribute: "vault_id".to_string(),
                reason: format!(
                    "vault {vault_id} is locked for another {} seconds",
                    snapshot.seconds_remaining()
                ),
            });
        }
        Ok(Self::new(ledger, reader, vault_id, timeout))
    }

    /// Rebuilds a session abandoned mid-way from ledger state.
    ///
    /// A vault that is already withdrawn resumes in
    /// [`LifecycleState::AwaitingBurn`]; the token id is re-read when the burn
    /// phase runs.
    ///
    /// # Errors
    ///
    /// Returns [`TimeVaultError::NotFound`] for an unknown vault.
    pub async fn resume(
        ledger: Arc<L>,
        reader: VaultStateReader<L>,
        vault_id: VaultId,
        timeout: Duration,
    ) -> TimeVaultResult<Self> {
        let snapshot = reader.read(vault_id).await?;
        let mut session = Self::new(ledger, reader, vault_id, timeout);
        if snapshot.withdrawn {
            info!("resuming vault {vault_id} at the burn phase");
            session.state = LifecycleState::AwaitingBurn;
            session.evidence = Some(WithdrawEvidence::LedgerObserved);
        }
        Ok(session)
    }

    /// Streams every transition to `sender` as it happens.
    #[must_use]
    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<Transition>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Vault this session works on.
    #[must_use]
    pub const fn vault_id(&self) -> VaultId {
        self.vault_id
    }

    /// Every transition taken so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Performs the next step.
    ///
    /// # Errors
    ///
    /// Returns [`TimeVaultError::LifecycleFinished`] once the session is terminal.
    /// Ledger failures are not errors here: they become [`LifecycleState::Failed`].
    pub async fn advance(&mut self) -> TimeVaultResult<Transition> {
        let transition = match self.state {
            LifecycleState::AwaitingWithdraw => self.withdraw().await,
            LifecycleState::AwaitingBurn => self.burn().await,
            LifecycleState::Done | LifecycleState::Failed(_) => {
                return Err(TimeVaultError::LifecycleFinished)
            }
        };
        self.record(transition.clone());
        Ok(transition)
    }

    /// Advances until the session is terminal and returns the final state.
    pub async fn run(&mut self) -> LifecycleState {
        while !self.state.is_terminal() {
            if self.advance().await.is_err() {
                break;
            }
        }
        self.state.clone()
    }

    async fn withdraw(&mut self) -> Transition {
        let handle = match self.bounded(TxKind::Withdraw, self.ledger.submit_withdraw(self.vault_id)).await {
            Ok(handle) => handle,
            Err(error) => {
                let reason = self.withdraw_failure(failure_reason(error)).await;
                return failed(TxKind::Withdraw, reason, None);
            }
        };

        match self.finalize(&handle).await {
            Ok(receipt) => match receipt.status {
                TxStatus::Success => {
                    self.evidence = Some(WithdrawEvidence::Finalized(receipt.tx_hash));
                    Transition {
                        state: LifecycleState::AwaitingBurn,
                        tx_hash: Some(receipt.tx_hash),
                    }
                }
                TxStatus::Reverted { reason } => {
                    let reason = self.withdraw_failure(FailureReason::Rejected(reason)).await;
                    failed(TxKind::Withdraw, reason, Some(receipt.tx_hash))
                }
            },
            Err(error) => failed(TxKind::Withdraw, failure_reason(error), Some(handle.tx_hash)),
        }
    }

    /// A rejected withdraw on a vault the ledger shows as withdrawn is a
    /// double-withdraw attempt.
    async fn withdraw_failure(&self, reason: FailureReason) -> FailureReason {
        if !matches!(reason, FailureReason::Rejected(_)) {
            return reason;
        }
        match self.reader.read(self.vault_id).await {
            Ok(snapshot) if snapshot.withdrawn => FailureReason::AlreadyWithdrawn,
            _ => reason,
        }
    }

    async fn burn(&self) -> Transition {
        let Some(evidence) = self.evidence else {
            return failed(
                TxKind::Burn,
                FailureReason::InvariantViolation("burn phase entered without a withdraw".to_string()),
                None,
            );
        };

        let snapshot = match self.reader.read(self.vault_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => return failed(TxKind::Burn, FailureReason::Ledger(error.to_string()), None),
        };
        if !snapshot.withdrawn {
            return failed(
                TxKind::Burn,
                FailureReason::InvariantViolation(format!(
                    "{evidence} finalized but vault {} is not withdrawn",
                    self.vault_id
                )),
                None,
            );
        }
        let Some(token_id) = snapshot.token_id else {
            info!("vault {} has no lock token, nothing to burn", self.vault_id);
            return Transition {
                state: LifecycleState::Done,
                tx_hash: None,
            };
        };

        info!("burning token {token_id} of vault {} after {evidence}", self.vault_id);
        let handle = match self.bounded(TxKind::Burn, self.ledger.submit_burn(token_id)).await {
            Ok(handle) => handle,
            Err(error) => return failed(TxKind::Burn, failure_reason(error), None),
        };

        match self.finalize(&handle).await {
            Ok(receipt) => match receipt.status {
                TxStatus::Success => Transition {
                    state: LifecycleState::Done,
                    tx_hash: Some(receipt.tx_hash),
                },
                TxStatus::Reverted { reason } => {
                    failed(TxKind::Burn, FailureReason::Rejected(reason), Some(receipt.tx_hash))
                }
            },
            Err(error) => failed(TxKind::Burn, failure_reason(error), Some(handle.tx_hash)),
        }
    }

    async fn finalize(&self, handle: &TxHandle) -> LedgerResult<TxReceipt> {
        self.bounded(handle.kind, self.ledger.await_finalized(handle, self.timeout))
            .await
    }

    /// Bounds a ledger call by the session timeout, whatever the adapter does.
    async fn bounded<T>(
        &self,
        kind: TxKind,
        call: impl Future<Output = LedgerResult<T>>,
    ) -> LedgerResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(LedgerError::Timeout { kind }))
    }

    fn record(&mut self, transition: Transition) {
        match &transition.state {
            LifecycleState::Failed(failure) => {
                warn!("vault {}: {failure}", self.vault_id);
            }
            state => info!(
                "vault {} -> {state} (tx: {:?})",
                self.vault_id, transition.tx_hash
            ),
        }
        self.state = transition.state.clone();
        if let Some(progress) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = progress.send(transition.clone());
        }
        self.history.push(transition);
    }
}

fn failure_reason(error: LedgerError) -> FailureReason {
    match error {
        LedgerError::Rejected { reason, .. } => FailureReason::Rejected(reason),
        LedgerError::Timeout { .. } => FailureReason::Timeout,
        other => FailureReason::Ledger(other.to_string()),
    }
}

const fn failed(phase: TxKind, reason: FailureReason, tx_hash: Option<TxHash>) -> Transition {
    Transition {
        state: LifecycleState::Failed(LifecycleFailure { phase, reason }),
        tx_hash,
    }
}
