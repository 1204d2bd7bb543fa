//! Ledger adapter for the deployed `TimeVault` contract on an EVM chain.

use std::time::Duration;

use alloy::{
    network::{EthereumWallet, ReceiptResponse},
    providers::{
        DynProvider, PendingTransactionBuilder, PendingTransactionError, Provider,
        ProviderBuilder, WatchTxError,
    },
    rpc::types::TransactionReceipt,
    signers::local::PrivateKeySigner,
    sol,
    transports::{http::reqwest::Url, RpcError},
};
use alloy_primitives::{Address, U256};
use log::{debug, info};

use super::{
    CreateCall, Ledger, LedgerError, LedgerResult, TxHandle, TxKind, TxReceipt, TxStatus,
    VaultRecord,
};
use crate::primitives::{TokenId, VaultId};

sol! {
    /// The `TimeVault` contract: ETH vaults with an ERC-721 lock token per vault.
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface ITimeVault {
        event VaultCreated(
            uint256 indexed vaultId,
            address indexed owner,
            uint256 indexed tokenId,
            uint256 amount,
            uint256 unlockTime
        );

        function deposit(uint256 unlockTime, string tokenURI, bool includeGasReserve)
            external payable returns (uint256 vaultId);

        function depositFor(
            address recipient,
            uint256 unlockTime,
            string tokenURI,
            bool includeGasReserve
        ) external payable returns (uint256 vaultId);

        function withdraw(uint256 vaultId) external;

        function burn(uint256 tokenId) external;

        function getVaultInfo(uint256 vaultId) external view returns (
            address owner,
            uint256 amount,
            uint256 unlockTime,
            bool withdrawn,
            bool unlocked
        );

        function getTokenIdByVault(uint256 vaultId) external view returns (uint256 tokenId);
    }
}

/// JSON-RPC error code for `execution reverted`.
const EXECUTION_REVERTED: i64 = 3;

/// [`Ledger`] backed by a JSON-RPC endpoint and a local signing key.
pub struct EvmLedger {
    provider: DynProvider,
    contract: ITimeVault::ITimeVaultInstance<DynProvider>,
    submitter: Address,
    confirmations: u64,
}

impl EvmLedger {
    /// Connects to `rpc_url` and binds the contract at `contract_address`.
    ///
    /// Transactions are signed by `signer`; finalization waits for
    /// `confirmations` blocks.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Transport`] if the RPC URL cannot be parsed.
    pub fn connect(
        rpc_url: &str,
        contract_address: Address,
        signer: PrivateKeySigner,
        confirmations: u64,
    ) -> LedgerResult<Self> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| LedgerError::Transport(format!("invalid RPC URL: {e}")))?;
        let submitter = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();
        Ok(Self::new(provider, contract_address, submitter, confirmations))
    }

    /// Binds the contract at `contract_address` on an already configured
    /// provider. `submitter` must be the account the provider signs with.
    #[must_use]
    pub fn new(
        provider: DynProvider,
        contract_address: Address,
        submitter: Address,
        confirmations: u64,
    ) -> Self {
        let contract = ITimeVault::new(contract_address, provider.clone());
        Self {
            provider,
            contract,
            submitter,
            confirmations: confirmations.max(1),
        }
    }

    /// Address of the bound contract.
    #[must_use]
    pub const fn contract_address(&self) -> Address {
        *self.contract.address()
    }

    fn handle(kind: TxKind, tx_hash: alloy_primitives::TxHash) -> TxHandle {
        info!("{kind} transaction submitted: {tx_hash}");
        TxHandle { tx_hash, kind }
    }

}

/// Outcome of a mined transaction. Only a successful create carries a vault id,
/// taken from the first `VaultCreated` log emitted by `contract`.
fn tx_receipt(kind: TxKind, contract: Address, receipt: &TransactionReceipt) -> TxReceipt {
    let block_number = receipt.block_number;
    let status = if receipt.status() {
        TxStatus::Success
    } else {
        TxStatus::Reverted {
            reason: format!("reverted in block {}", block_number.unwrap_or_default()),
        }
    };
    let created_vault = match (kind, &status) {
        (TxKind::Create, TxStatus::Success) => receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == contract)
            .find_map(|log| log.log_decode::<ITimeVault::VaultCreated>().ok())
            .map(|decoded| VaultId(decoded.inner.data.vaultId)),
        _ => None,
    };

    TxReceipt {
        tx_hash: receipt.transaction_hash(),
        kind,
        block_number,
        status,
        created_vault,
    }
}

/// Maps a send-time failure. A revert during gas estimation is the ledger
/// refusing the call, everything else is transport.
fn submit_error(kind: TxKind, error: alloy::contract::Error) -> LedgerError {
    match error {
        alloy::contract::Error::TransportError(RpcError::ErrorResp(payload)) => {
            LedgerError::Rejected {
                kind,
                reason: payload.message.to_string(),
            }
        }
        other => LedgerError::Transport(other.to_string()),
    }
}

/// Whether a read failed because the contract reverted (unknown vault).
fn is_read_revert(error: &alloy::contract::Error) -> bool {
    matches!(
        error,
        alloy::contract::Error::TransportError(RpcError::ErrorResp(payload))
            if payload.code == EXECUTION_REVERTED || payload.message.contains("revert")
    )
}

impl Ledger for EvmLedger {
    fn submitter(&self) -> Address {
        self.submitter
    }

    async fn vault(&self, vault_id: VaultId) -> LedgerResult<Option<VaultRecord>> {
        let info = match self.contract.getVaultInfo(vault_id.into()).call().await {
            Ok(info) => info,
            Err(error) if is_read_revert(&error) => {
                debug!("getVaultInfo({vault_id}) reverted: {error}");
                return Ok(None);
            }
            Err(error) => return Err(LedgerError::Transport(error.to_string())),
        };

        // The contract returns a zeroed struct for ids it never assigned.
        if info.owner.is_zero() {
            return Ok(None);
        }

        let token_id = self
            .contract
            .getTokenIdByVault(vault_id.into())
            .call()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let unlock_time = u64::try_from(info.unlockTime).map_err(|_| {
            LedgerError::InvalidResponse(format!(
                "unlock time {} of vault {vault_id} exceeds u64",
                info.unlockTime
            ))
        })?;

        Ok(Some(VaultRecord {
            vault_id,
            owner: info.owner,
            amount: info.amount,
            unlock_time,
            withdrawn: info.withdrawn,
            // Token ids start at 1; 0 means the token was burned or never minted.
            token_id: (!token_id.is_zero()).then_some(TokenId(token_id)),
        }))
    }

    async fn submit_create(&self, call: CreateCall) -> LedgerResult<TxHandle> {
        let pending = match call {
            CreateCall::SelfMint {
                unlock_time,
                token_uri,
                value,
            } => {
                self.contract
                    .deposit(U256::from(unlock_time), token_uri, false)
                    .value(value)
                    .send()
                    .await
            }
            CreateCall::Gift {
                recipient,
                unlock_time,
                token_uri,
                include_gas_reserve,
                value,
            } => {
                self.contract
                    .depositFor(recipient, U256::from(unlock_time), token_uri, include_gas_reserve)
                    .value(value)
                    .send()
                    .await
            }
        }
        .map_err(|e| submit_error(TxKind::Create, e))?;

        Ok(Self::handle(TxKind::Create, *pending.tx_hash()))
    }

    async fn submit_withdraw(&self, vault_id: VaultId) -> LedgerResult<TxHandle> {
        let pending = self
            .contract
            .withdraw(vault_id.into())
            .send()
            .await
            .map_err(|e| submit_error(TxKind::Withdraw, e))?;
        Ok(Self::handle(TxKind::Withdraw, *pending.tx_hash()))
    }

    async fn submit_burn(&self, token_id: TokenId) -> LedgerResult<TxHandle> {
        let pending = self
            .contract
            .burn(token_id.into())
            .send()
            .await
            .map_err(|e| submit_error(TxKind::Burn, e))?;
        Ok(Self::handle(TxKind::Burn, *pending.tx_hash()))
    }

    async fn await_finalized(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> LedgerResult<TxReceipt> {
        let kind = handle.kind;
        let watch = PendingTransactionBuilder::new(self.provider.root().clone(), handle.tx_hash)
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(timeout))
            .get_receipt();

        // The watcher's own timeout does not cover the final receipt fetch.
        let receipt = tokio::time::timeout(timeout, watch)
            .await
            .map_err(|_| LedgerError::Timeout { kind })?
            .map_err(|error| match error {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                    LedgerError::Timeout { kind }
                }
                other => LedgerError::Transport(other.to_string()),
            })?;

        info!(
            "{kind} transaction {} finalized in block {:?} (success: {})",
            handle.tx_hash,
            receipt.block_number,
            receipt.status()
        );
        Ok(tx_receipt(kind, self.contract_address(), &receipt))
    }
}
