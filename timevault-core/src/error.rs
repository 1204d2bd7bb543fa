use thiserror::Error;

use crate::{
    codec::DecryptionError,
    ledger::{LedgerError, TxKind},
    primitives::VaultId,
    store::StoreError,
};

/// Result type for `TimeVault` operations.
pub type TimeVaultResult<T> = Result<T, TimeVaultError>;

/// Error outputs from `TimeVault`
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum TimeVaultError {
    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    Validation {
        /// The attribute that is invalid
        attribute: String,
        /// The reason the input is invalid
        reason: String,
    },
    /// The vault does not exist on the ledger
    #[error("vault_not_found: {0}")]
    NotFound(VaultId),
    /// The ciphertext could not be opened with the derived reveal key
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
    /// The ledger refused or reverted a submitted transaction
    #[error("transaction_rejected ({phase}): {reason}")]
    TransactionRejected {
        /// Which transaction was rejected
        phase: TxKind,
        /// Reason reported by the ledger
        reason: String,
    },
    /// Finalization was not observed within the caller-supplied bound
    #[error("timeout waiting for {phase} finalization")]
    Timeout {
        /// Which transaction timed out
        phase: TxKind,
    },
    /// Transport or decoding failure talking to the ledger
    #[error("ledger_error: {0}")]
    Ledger(String),
    /// Failure in the external content store
    #[error(transparent)]
    ContentStore(StoreError),
    /// Network connection error with details
    #[error("network_error: {url} (status: {status:?}): {error}")]
    NetworkError {
        /// The URL that was requested
        url: String,
        /// HTTP status, if one was received
        status: Option<u16>,
        /// Error description
        error: String,
    },
    /// Unexpected error serializing information
    #[error("serialization_error: {0}")]
    SerializationError(String),
    /// The configuration is not usable
    #[error("invalid_config: {0}")]
    InvalidConfig(String),
    /// A lifecycle session already reached `Done` or `Failed`
    #[error("lifecycle_finished")]
    LifecycleFinished,
}

impl From<LedgerError> for TimeVaultError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Rejected { kind, reason } => Self::TransactionRejected {
                phase: kind,
                reason,
            },
            LedgerError::Timeout { kind } => Self::Timeout { phase: kind },
            other => Self::Ledger(other.to_string()),
        }
    }
}

impl From<StoreError> for TimeVaultError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Http { url, status, error } => Self::NetworkError { url, status, error },
            other => Self::ContentStore(other),
        }
    }
}

impl From<serde_json::Error> for TimeVaultError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError(error.to_string())
    }
}
