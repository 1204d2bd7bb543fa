//! Reveal codec: authenticated encryption of hidden vault content.
//!
//! Ciphertext is stored in the content store as ASCII armor so it survives
//! gateways that treat blobs as text:
//!
//! ```text
//! "tvr1:" || base64(nonce (24 bytes) || XChaCha20-Poly1305(plaintext) || tag (16 bytes))
//! ```
//!
//! The armor header is authenticated as associated data, so a blob relabelled with
//! another version prefix fails to open.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::derivation::RevealKey;

/// Armor prefix of the current ciphertext format.
pub const ARMOR_PREFIX: &str = "tvr1:";

/// `XChaCha20` nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Reasons a ciphertext could not be opened.
///
/// Every variant is a hard failure; decryption never hands back unauthenticated
/// bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum DecryptionError {
    /// The blob does not start with a known armor prefix.
    #[error("decryption_failed: unsupported ciphertext encoding")]
    UnsupportedEncoding,
    /// The armor is recognised but the payload is not decodable.
    #[error("decryption_failed: malformed ciphertext ({0})")]
    Malformed(String),
    /// Authentication failed: wrong key (wrong vault id or unlock time) or
    /// corrupted data.
    #[error("decryption_failed: wrong key or corrupted ciphertext")]
    Authentication,
    /// The AEAD refused to encrypt.
    #[error("encryption_failed")]
    Encryption,
}

fn new_cipher(key: &RevealKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Encrypts `plaintext` under `key` and returns the armored ciphertext.
///
/// A fresh random nonce is drawn for every call, so encrypting the same content
/// twice yields different blobs.
///
/// # Errors
///
/// Returns [`DecryptionError::Encryption`] if the AEAD rejects the input, which
/// only happens for inputs larger than the cipher's limit.
pub fn encrypt(plaintext: &[u8], key: &RevealKey) -> Result<Vec<u8>, DecryptionError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let sealed = new_cipher(key)
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: ARMOR_PREFIX.as_bytes(),
            },
        )
        .map_err(|_| DecryptionError::Encryption)?;

    let mut raw = Vec::with_capacity(NONCE_SIZE + sealed.len());
    raw.extend_from_slice(&nonce_bytes);
    raw.extend_from_slice(&sealed);

    let mut armored = String::with_capacity(ARMOR_PREFIX.len() + raw.len() * 4 / 3 + 4);
    armored.push_str(ARMOR_PREFIX);
    STANDARD.encode_string(&raw, &mut armored);
    Ok(armored.into_bytes())
}

/// Decrypts an armored ciphertext produced by [`encrypt`].
///
/// Surrounding whitespace (trailing newlines added by gateways or editors) is
/// ignored.
///
/// # Errors
///
/// - [`DecryptionError::UnsupportedEncoding`] if the armor prefix is unknown.
/// - [`DecryptionError::Malformed`] if the payload is not base64 or is shorter
///   than a nonce plus tag.
/// - [`DecryptionError::Authentication`] if the key is wrong or the data was
///   tampered with.
pub fn decrypt(ciphertext: &[u8], key: &RevealKey) -> Result<Vec<u8>, DecryptionError> {
    let body = ciphertext
        .trim_ascii()
        .strip_prefix(ARMOR_PREFIX.as_bytes())
        .ok_or(DecryptionError::UnsupportedEncoding)?;

    let raw = STANDARD
        .decode(body)
        .map_err(|err| DecryptionError::Malformed(err.to_string()))?;

    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(DecryptionError::Malformed(format!(
            "expected at least {} bytes, got {}",
            NONCE_SIZE + TAG_SIZE,
            raw.len()
        )));
    }

    let (nonce_bytes, sealed) = raw.split_at(NONCE_SIZE);
    new_cipher(key)
        .decrypt(
            XNonce::from_slice(nonce_bytes),
            Payload {
                msg: sealed,
                aad: ARMOR_PREFIX.as_bytes(),
            },
        )
        .map_err(|_| DecryptionError::Authentication)
}
