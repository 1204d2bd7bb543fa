#![allow(dead_code)]

//! Ledger, clock and vault fixtures shared by the integration tests.

use std::sync::Arc;

use alloy_primitives::{address, Address, U256};
use timevault_core::{
    clock::ManualClock,
    ledger::{InMemoryLedger, VaultRecord},
    reader::VaultStateReader,
    TokenId, VaultId,
};

/// Account signing every transaction in the tests.
pub const OWNER: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");

/// Somebody else.
pub const FRIEND: Address = address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

/// Clock, ledger and reader wired together for a test.
pub struct Harness {
    /// Manually advanced clock.
    pub clock: Arc<ManualClock>,
    /// In-memory ledger.
    pub ledger: Arc<InMemoryLedger>,
    /// Reader over the ledger.
    pub reader: VaultStateReader<InMemoryLedger>,
}

/// Builds a harness at `now`.
#[must_use]
pub fn harness(now: u64) -> Harness {
    let clock = Arc::new(ManualClock::new(now));
    let ledger = Arc::new(InMemoryLedger::new(OWNER, clock.clone()));
    let reader = VaultStateReader::new(ledger.clone(), clock.clone());
    Harness {
        clock,
        ledger,
        reader,
    }
}

/// Builds a vault record fixture.
#[must_use]
pub fn vault(id: u64, unlock_time: u64, token_id: Option<u64>) -> VaultRecord {
    VaultRecord {
        vault_id: VaultId::from(id),
        owner: OWNER,
        amount: U256::from(100_000_000_000_000_000u64),
        unlock_time,
        withdrawn: false,
        token_id: token_id.map(TokenId::from),
    }
}
