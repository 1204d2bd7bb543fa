//! Content-addressed blob storage for lock NFT images, token metadata and sealed
//! hidden content.
//!
//! The store is blind: it never sees plaintext hidden content, only armored
//! ciphertext produced by [`crate::codec::encrypt`].

use std::{collections::HashMap, future::Future, sync::Mutex};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::primitives::ContentHash;

mod pinata;

pub use pinata::{PinataCredentials, PinataStore, PINATA_API_URL};

/// Result type for content store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by content stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No blob is stored under the requested hash.
    #[error("content_not_found: {0}")]
    NotFound(ContentHash),
    /// HTTP failure that survived retries.
    #[error("content_store_http_error: {url} (status: {status:?}): {error}")]
    Http {
        /// The URL that was requested
        url: String,
        /// HTTP status, if one was received
        status: Option<u16>,
        /// Error description
        error: String,
    },
    /// The store answered but refused the request.
    #[error("content_store_rejected: {0}")]
    Rejected(String),
    /// The store answered with something that is not a valid response.
    #[error("content_store_invalid_response: {0}")]
    InvalidResponse(String),
    /// The store is offline or refusing all traffic.
    #[error("content_store_unavailable: {0}")]
    Unavailable(String),
}

/// A content-addressed blob store.
pub trait ContentStore: Send + Sync {
    /// Stores `bytes` and returns their content hash.
    fn upload(&self, bytes: Vec<u8>) -> impl Future<Output = StoreResult<ContentHash>> + Send;

    /// Fetches the blob stored under `hash`.
    fn fetch(&self, hash: &ContentHash) -> impl Future<Output = StoreResult<Vec<u8>>> + Send;
}

#[derive(Default)]
struct MemoryState {
    blobs: HashMap<ContentHash, Vec<u8>>,
    offline: Option<String>,
    uploads: usize,
}

/// Process-local [`ContentStore`] addressed by the hex SHA-256 of each blob.
#[derive(Default)]
pub struct MemoryContentStore {
    state: Mutex<MemoryState>,
}

impl MemoryContentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`], or
    /// brings the store back with `None`.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn set_offline(&self, reason: Option<String>) {
        self.state.lock().expect("store state poisoned").offline = reason;
    }

    /// Number of successful uploads so far.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn uploads(&self) -> usize {
        self.state.lock().expect("store state poisoned").uploads
    }

    /// Returns a stored blob without going through the async interface.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn get(&self, hash: &ContentHash) -> Option<Vec<u8>> {
        self.state
            .lock()
            .expect("store state poisoned")
            .blobs
            .get(hash)
            .cloned()
    }

    #[allow(clippy::significant_drop_tightening)]
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("store state poisoned".to_string()))?;
        if let Some(reason) = &state.offline {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        f(&mut state)
    }
}

impl ContentStore for MemoryContentStore {
    async fn upload(&self, bytes: Vec<u8>) -> StoreResult<ContentHash> {
        let hash = ContentHash::new(hex::encode(Sha256::digest(&bytes)));
        self.with_state(|state| {
            state.blobs.insert(hash.clone(), bytes);
            state.uploads += 1;
            Ok(())
        })?;
        log::debug!("stored blob {hash}");
        Ok(hash)
    }

    async fn fetch(&self, hash: &ContentHash) -> StoreResult<Vec<u8>> {
        self.with_state(|state| {
            state
                .blobs
                .get(hash)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(hash.clone()))
        })
    }
}
