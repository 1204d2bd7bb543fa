//! Time-locked ETH vaults with hidden content that opens on withdrawal.
//!
//! - [`derivation`] and [`codec`] form the reveal protocol: a key derived from
//!   `(vault_id, unlock_time)` seals content with XChaCha20-Poly1305.
//! - [`reader::VaultStateReader`] reads vaults from a [`ledger::Ledger`].
//! - [`lifecycle::WithdrawalLifecycle`] drives withdraw, then burn.
//! - [`creation::CreationAssembler`] uploads metadata and creates vaults.

pub mod clock;
pub mod codec;
pub mod config;
pub mod creation;
pub mod derivation;
pub mod ledger;
pub mod lifecycle;
pub mod logger;
pub mod reader;
pub mod reveal;
pub mod store;

mod error;
pub use error::*;

mod primitives;
pub use primitives::*;

#[cfg(feature = "ffi")]
mod ffi;
#[cfg(feature = "ffi")]
pub use ffi::*;

// private modules
mod http_request;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("timevault_core");
