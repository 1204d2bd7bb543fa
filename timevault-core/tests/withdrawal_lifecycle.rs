//! Withdraw-then-burn sessions against the in-memory ledger.

mod common;

use std::time::Duration;

use alloy_primitives::{TxHash, U256};
use common::{harness, vault};
use timevault_core::{
    ledger::{LedgerEvent, TxKind},
    lifecycle::{FailureReason, LifecycleFailure, LifecycleState, WithdrawalLifecycle},
    TimeVaultError, VaultId,
};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(30);
const NOW: u64 = 2_000;
const UNLOCK: u64 = 1_000;

fn failed(phase: TxKind, reason: FailureReason) -> LifecycleState {
    LifecycleState::Failed(LifecycleFailure { phase, reason })
}

fn submitted_hash(events: &[LedgerEvent], wanted: TxKind) -> TxHash {
    events
        .iter()
        .find_map(|event| match event {
            LedgerEvent::Submitted { kind, tx_hash, .. } if *kind == wanted => Some(*tx_hash),
            _ => None,
        })
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_withdraw_then_burn_token() {
    let h = harness(NOW);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(7)));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(session.state(), &LifecycleState::AwaitingWithdraw);

    let final_state = session.run().await;
    assert_eq!(final_state, LifecycleState::Done);

    let states: Vec<_> = session.history().iter().map(|t| t.state.clone()).collect();
    assert_eq!(states, vec![LifecycleState::AwaitingBurn, LifecycleState::Done]);
    assert!(session.history().iter().all(|t| t.tx_hash.is_some()));

    assert_eq!(h.ledger.submissions(TxKind::Withdraw), 1);
    assert_eq!(h.ledger.submissions(TxKind::Burn), 1);
    assert!(h.ledger.events().iter().any(|event| matches!(
        event,
        LedgerEvent::Submitted { kind: TxKind::Burn, target, .. } if *target == U256::from(7)
    )));

    let snapshot = h.reader.read(vault_id).await.unwrap();
    assert!(snapshot.withdrawn);
    assert_eq!(snapshot.token_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_burn_is_submitted_after_withdraw_finalizes() {
    let h = harness(NOW);
    h.ledger.set_finalization_delay(Duration::from_secs(12));
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(1)));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(session.run().await, LifecycleState::Done);

    let events = h.ledger.events();
    let withdraw_finalized = events
        .iter()
        .position(|e| matches!(e, LedgerEvent::Finalized { kind: TxKind::Withdraw, success: true, .. }))
        .unwrap();
    let burn_submitted = events
        .iter()
        .position(|e| matches!(e, LedgerEvent::Submitted { kind: TxKind::Burn, .. }))
        .unwrap();
    assert!(withdraw_finalized < burn_submitted);
}

#[tokio::test(start_paused = true)]
async fn test_vault_without_token_finishes_without_burn() {
    let h = harness(NOW);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, None));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(session.run().await, LifecycleState::Done);

    assert_eq!(h.ledger.submissions(TxKind::Burn), 0);
    let last = session.history().last().unwrap();
    assert_eq!(last.state, LifecycleState::Done);
    assert_eq!(last.tx_hash, None);
}

#[tokio::test(start_paused = true)]
async fn test_premature_withdraw_is_rejected_by_ledger() {
    let h = harness(500);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(1)));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(
        session.run().await,
        failed(
            TxKind::Withdraw,
            FailureReason::Rejected("vault is still locked".to_string())
        )
    );
    assert_eq!(h.ledger.submissions(TxKind::Burn), 0);
    assert!(!h.reader.read(vault_id).await.unwrap().withdrawn);
}

#[tokio::test(start_paused = true)]
async fn test_reverted_withdraw_never_burns() {
    let h = harness(NOW);
    h.ledger.revert_next(TxKind::Withdraw, "not yet unlocked");
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(1)));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    let final_state = session.run().await;

    assert_eq!(
        final_state,
        failed(
            TxKind::Withdraw,
            FailureReason::Rejected("not yet unlocked".to_string())
        )
    );
    assert_eq!(final_state.to_string(), "failed(withdraw-error: not yet unlocked)");
    // The reverted transaction finalized, so its hash is reported.
    assert!(session.history()[0].tx_hash.is_some());
    assert_eq!(h.ledger.submissions(TxKind::Burn), 0);
}

#[tokio::test(start_paused = true)]
async fn test_double_withdraw_is_reported_as_already_withdrawn() {
    let h = harness(NOW);
    let mut record = vault(1, UNLOCK, Some(1));
    record.withdrawn = true;
    let vault_id = h.ledger.insert_vault(record);

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(
        session.run().await,
        failed(TxKind::Withdraw, FailureReason::AlreadyWithdrawn)
    );
    assert_eq!(h.ledger.submissions(TxKind::Burn), 0);
}

#[tokio::test(start_paused = true)]
async fn test_withdraw_finalization_timeout() {
    let h = harness(NOW);
    h.ledger.stall_finalization(TxKind::Withdraw);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(1)));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(
        session.run().await,
        failed(TxKind::Withdraw, FailureReason::Timeout)
    );
    assert_eq!(h.ledger.submissions(TxKind::Withdraw), 1);
    assert_eq!(h.ledger.submissions(TxKind::Burn), 0);

    // The outcome is unknown, so the caller gets the hash to look it up.
    let last = session.history().last().unwrap();
    assert_eq!(last.tx_hash, Some(submitted_hash(&h.ledger.events(), TxKind::Withdraw)));
}

#[tokio::test(start_paused = true)]
async fn test_burn_rejection_fails_burn_phase() {
    let h = harness(NOW);
    h.ledger.reject_next(TxKind::Burn, "token transfers paused");
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(4)));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(
        session.run().await,
        failed(
            TxKind::Burn,
            FailureReason::Rejected("token transfers paused".to_string())
        )
    );

    // Funds stay released; only the token is left behind.
    let snapshot = h.reader.read(vault_id).await.unwrap();
    assert!(snapshot.withdrawn);
    assert!(snapshot.token_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_burn_finalization_timeout() {
    let h = harness(NOW);
    h.ledger.stall_finalization(TxKind::Burn);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(4)));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    assert_eq!(session.run().await, failed(TxKind::Burn, FailureReason::Timeout));
    assert_eq!(h.ledger.submissions(TxKind::Burn), 1);

    let last = session.history().last().unwrap();
    assert_eq!(last.tx_hash, Some(submitted_hash(&h.ledger.events(), TxKind::Burn)));
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_interrupted_session() {
    let h = harness(NOW);
    let mut record = vault(1, UNLOCK, Some(9));
    record.withdrawn = true;
    let vault_id = h.ledger.insert_vault(record);

    let mut session =
        WithdrawalLifecycle::resume(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT)
            .await
            .unwrap();
    assert_eq!(session.state(), &LifecycleState::AwaitingBurn);
    assert_eq!(session.run().await, LifecycleState::Done);

    assert_eq!(h.ledger.submissions(TxKind::Withdraw), 0);
    assert_eq!(h.ledger.submissions(TxKind::Burn), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_of_unwithdrawn_vault_starts_at_withdraw() {
    let h = harness(NOW);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(9)));

    let session = WithdrawalLifecycle::resume(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(session.state(), &LifecycleState::AwaitingWithdraw);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_states_are_absorbing() {
    let h = harness(NOW);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, None));

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT);
    session.run().await;

    assert!(matches!(
        session.advance().await,
        Err(TimeVaultError::LifecycleFinished)
    ));
    assert_eq!(h.ledger.submissions(TxKind::Withdraw), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_channel_streams_transitions() {
    let h = harness(NOW);
    let vault_id = h.ledger.insert_vault(vault(1, UNLOCK, Some(2)));
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let mut session = WithdrawalLifecycle::new(h.ledger.clone(), h.reader.clone(), vault_id, TIMEOUT)
        .with_progress(sender);
    session.run().await;

    let mut streamed = Vec::new();
    while let Ok(transition) = receiver.try_recv() {
        streamed.push(transition);
    }
    assert_eq!(streamed, session.history());
}

#[tokio::test(start_paused = true)]
async fn test_prepare_checks_eligibility() {
    let h = harness(500);
    let locked = h.ledger.insert_vault(vault(1, UNLOCK, Some(1)));
    let mut withdrawn = vault(2, 100, Some(2));
    withdrawn.withdrawn = true;
    let withdrawn = h.ledger.insert_vault(withdrawn);

    let locked_err = WithdrawalLifecycle::prepare(h.ledger.clone(), h.reader.clone(), locked, TIMEOUT)
        .await
        .err()
        .unwrap();
    assert!(matches!(locked_err, TimeVaultError::Validation { reason, .. } if reason.contains("locked for another 500 seconds")));

    assert!(matches!(
        WithdrawalLifecycle::prepare(h.ledger.clone(), h.reader.clone(), withdrawn, TIMEOUT).await,
        Err(TimeVaultError::Validation { .. })
    ));
    assert!(matches!(
        WithdrawalLifecycle::prepare(h.ledger.clone(), h.reader.clone(), VaultId::from(99), TIMEOUT).await,
        Err(TimeVaultError::NotFound(_))
    ));

    h.clock.set(UNLOCK);
    let session = WithdrawalLifecycle::prepare(h.ledger.clone(), h.reader.clone(), locked, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(session.vault_id(), locked);
}
