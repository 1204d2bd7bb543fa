//! Vault creation: lock NFT metadata assembly and the creation transaction.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{utils::format_ether, Address, TxHash, U256};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    config::Network,
    error::{TimeVaultError, TimeVaultResult},
    ledger::{CreateCall, Ledger, TxHandle, TxKind, TxStatus},
    primitives::{ContentHash, VaultId},
    store::ContentStore,
};

/// Extra value (0.001 ETH) sent with a gift so the recipient can pay for the
/// withdrawal.
pub const GAS_RESERVE_WEI: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);

const TOKEN_NAME: &str = "TimeVault Lock NFT";
const HIDDEN_CONTENT_NOTE: &str = " 🔒 Contains encrypted surprise!";

/// Inputs of a single creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationParams {
    /// Unix timestamp; must be strictly in the future.
    pub unlock_time: u64,
    /// Token metadata, already persisted in the content store.
    pub content: ContentHash,
    /// Vault owner when gifting. `None` or the submitter itself means self-mint.
    pub recipient: Option<Address>,
    /// Amount to lock, in wei.
    pub value: U256,
    /// Whether a gift should carry [`GAS_RESERVE_WEI`] for the recipient.
    pub gas_reserve: bool,
}

/// Everything needed to create a vault from scratch: image upload, metadata and
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRequest {
    /// Lock NFT image bytes.
    pub image: Vec<u8>,
    /// Amount to lock, in wei.
    pub amount: U256,
    /// Unix timestamp; must be strictly in the future.
    pub unlock_time: u64,
    /// Vault owner when gifting.
    pub recipient: Option<Address>,
    /// Whether a gift should carry [`GAS_RESERVE_WEI`].
    pub gas_reserve: bool,
    /// Whether hidden content will be sealed for this vault.
    pub hidden_content: bool,
}

/// A finalized vault creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedVault {
    /// Creation transaction.
    pub tx_hash: TxHash,
    /// Id from the `VaultCreated` event, when the ledger emitted one.
    pub vault_id: Option<VaultId>,
    /// `ipfs://` URI of the token metadata.
    pub token_uri: String,
}

/// One `trait_type`/`value` pair of the token metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub trait_type: String,
    /// Attribute value.
    pub value: String,
}

/// ERC-721 metadata document for the lock NFT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Token name.
    pub name: String,
    /// Human-readable lock summary.
    pub description: String,
    /// `ipfs://` URI of the image.
    pub image: String,
    /// Unlock date, amount and network.
    pub attributes: Vec<Attribute>,
}

impl TokenMetadata {
    /// Builds the metadata for a vault locking `amount` until `unlock_time`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeVaultError::Validation`] if `unlock_time` is not a
    /// representable date.
    pub fn new(
        image: &ContentHash,
        amount: U256,
        unlock_time: u64,
        network: Network,
        hidden_content: bool,
    ) -> TimeVaultResult<Self> {
        let date = format_date(unlock_time)?;
        let amount = format_eth(amount);
        let note = if hidden_content { HIDDEN_CONTENT_NOTE } else { "" };

        Ok(Self {
            name: TOKEN_NAME.to_string(),
            description: format!("Proof of {amount} ETH locked until {date}{note}"),
            image: image.to_uri(),
            attributes: vec![
                Attribute {
                    trait_type: "Unlock Date".to_string(),
                    value: date,
                },
                Attribute {
                    trait_type: "Amount".to_string(),
                    value: format!("{amount} ETH"),
                },
                Attribute {
                    trait_type: "Network".to_string(),
                    value: network.label().to_string(),
                },
            ],
        })
    }
}

fn format_date(unlock_time: u64) -> TimeVaultResult<String> {
    i64::try_from(unlock_time)
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| TimeVaultError::Validation {
            attribute: "unlock_time".to_string(),
            reason: format!("{unlock_time} is not a valid date"),
        })
}

/// Ether amount without trailing zeros: `0.1`, `2`.
fn format_eth(amount: U256) -> String {
    let formatted = format_ether(amount);
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => formatted,
    }
}

/// Builds and submits vault creation transactions.
pub struct CreationAssembler<L, S> {
    ledger: Arc<L>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    network: Network,
}

impl<L: Ledger, S: ContentStore> CreationAssembler<L, S> {
    /// Creates an assembler. `timeout` bounds the wait for the creation
    /// transaction to finalize.
    pub fn new(
        ledger: Arc<L>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        network: Network,
    ) -> Self {
        Self {
            ledger,
            store,
            clock,
            timeout,
            network,
        }
    }

    fn validate(
        &self,
        unlock_time: u64,
        value: U256,
        recipient: Option<Address>,
    ) -> TimeVaultResult<()> {
        let now = self.clock.now();
        if unlock_time <= now {
            return Err(TimeVaultError::Validation {
                attribute: "unlock_time".to_string(),
                reason: format!("{unlock_time} is not after the current time {now}"),
            });
        }
        if value.is_zero() {
            return Err(TimeVaultError::Validation {
                attribute: "value".to_string(),
                reason: "must lock a positive amount".to_string(),
            });
        }
        if recipient.is_some_and(|recipient| recipient.is_zero()) {
            return Err(TimeVaultError::Validation {
                attribute: "recipient".to_string(),
                reason: "recipient must not be the zero address".to_string(),
            });
        }
        Ok(())
    }

    /// Builds the creation call for `params` without submitting it.
    ///
    /// # Errors
    ///
    /// Returns [`TimeVaultError::Validation`] if the unlock time is not strictly in
    /// the future, the value is zero or the recipient is the zero address.
    pub fn assemble(&self, params: &CreationParams) -> TimeVaultResult<CreateCall> {
        self.validate(params.unlock_time, params.value, params.recipient)?;
        let token_uri = params.content.to_uri();

        let call = match params.recipient {
            Some(recipient) if recipient != self.ledger.submitter() => {
                let value = if params.gas_reserve {
                    params
                        .value
                        .checked_add(GAS_RESERVE_WEI)
                        .ok_or_else(|| TimeVaultError::Validation {
                            attribute: "value".to_string(),
                            reason: "value plus gas reserve overflows".to_string(),
                        })?
                } else {
                    params.value
                };
                CreateCall::Gift {
                    recipient,
                    unlock_time: params.unlock_time,
                    token_uri,
                    include_gas_reserve: params.gas_reserve,
                    value,
                }
            }
            _ => CreateCall::SelfMint {
                unlock_time: params.unlock_time,
                token_uri,
                value: params.value,
            },
        };
        Ok(call)
    }

    /// Validates, assembles and submits a creation transaction.
    ///
    /// # Errors
    ///
    /// See [`Self::assemble`]; ledger refusals surface as
    /// [`TimeVaultError::TransactionRejected`].
    pub async fn submit(&self, params: &CreationParams) -> TimeVaultResult<TxHandle> {
        let call = self.assemble(params)?;
        log::info!(
            "submitting vault creation: unlock {} value {} wei",
            call.unlock_time(),
            call.value()
        );
        Ok(self.ledger.submit_create(call).await?)
    }

    /// Uploads the image and metadata, creates the vault and waits for it to
    /// finalize.
    ///
    /// Nothing is submitted unless both uploads succeed.
    ///
    /// # Errors
    ///
    /// - [`TimeVaultError::Validation`] for bad inputs, before any upload.
    /// - [`TimeVaultError::ContentStore`] / [`TimeVaultError::NetworkError`] if an
    ///   upload fails.
    /// - [`TimeVaultError::TransactionRejected`] if the ledger refuses or reverts
    ///   the creation.
    /// - [`TimeVaultError::Timeout`] if finalization is not observed in time.
    pub async fn create_with_content(&self, request: VaultRequest) -> TimeVaultResult<CreatedVault> {
        self.validate(request.unlock_time, request.amount, request.recipient)?;

        let image = self.store.upload(request.image).await?;
        let metadata = TokenMetadata::new(
            &image,
            request.amount,
            request.unlock_time,
            self.network,
            request.hidden_content,
        )?;
        let content = self.store.upload(serde_json::to_vec(&metadata)?).await?;
        log::info!("uploaded lock NFT image {image} and metadata {content}");

        let params = CreationParams {
            unlock_time: request.unlock_time,
            content,
            recipient: request.recipient,
            value: request.amount,
            gas_reserve: request.gas_reserve,
        };
        let token_uri = params.content.to_uri();
        let handle = self.submit(&params).await?;

        let receipt = tokio::time::timeout(self.timeout, self.ledger.await_finalized(&handle, self.timeout))
            .await
            .map_err(|_| TimeVaultError::Timeout {
                phase: TxKind::Create,
            })??;

        match receipt.status {
            TxStatus::Success => {
                log::info!(
                    "vault {:?} created in transaction {}",
                    receipt.created_vault.map(|id| id.to_string()),
                    receipt.tx_hash
                );
                Ok(CreatedVault {
                    tx_hash: receipt.tx_hash,
                    vault_id: receipt.created_vault,
                    token_uri,
                })
            }
            TxStatus::Reverted { reason } => Err(TimeVaultError::TransactionRejected {
                phase: TxKind::Create,
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(U256::from(100_000_000_000_000_000u64), "0.1" ; "fraction")]
    #[test_case(U256::from(2_000_000_000_000_000_000u64), "2" ; "whole")]
    #[test_case(U256::from(1_500_000_000_000_000u64), "0.0015" ; "small")]
    fn test_format_eth(amount: U256, expected: &str) {
        assert_eq!(format_eth(amount), expected);
    }

    #[test]
    fn test_token_metadata() {
        let metadata = TokenMetadata::new(
            &ContentHash::new("QmImage"),
            U256::from(100_000_000_000_000_000u64),
            1_767_225_600, // 2026-01-01T00:00:00Z
            Network::Base,
            false,
        )
        .unwrap();

        assert_eq!(metadata.name, "TimeVault Lock NFT");
        assert_eq!(
            metadata.description,
            "Proof of 0.1 ETH locked until 2026-01-01"
        );
        assert_eq!(metadata.image, "ipfs://QmImage");
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["attributes"][0]["trait_type"], "Unlock Date");
        assert_eq!(json["attributes"][0]["value"], "2026-01-01");
        assert_eq!(json["attributes"][1]["value"], "0.1 ETH");
        assert_eq!(json["attributes"][2]["value"], "Base");
    }

    #[test]
    fn test_token_metadata_mentions_hidden_content() {
        let metadata = TokenMetadata::new(
            &ContentHash::new("QmImage"),
            U256::from(2_000_000_000_000_000_000u64),
            1_767_225_600,
            Network::BaseSepolia,
            true,
        )
        .unwrap();

        assert!(metadata
            .description
            .ends_with("until 2026-01-01 🔒 Contains encrypted surprise!"));
        assert_eq!(metadata.attributes[2].value, "Base Sepolia");
    }

    #[test]
    fn test_gas_reserve_constant() {
        assert_eq!(GAS_RESERVE_WEI, U256::from(10u64).pow(U256::from(15)));
    }
}
