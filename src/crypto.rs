//! Deterministic authenticated encryption for secret values.
//!
//! Exported secrets must decrypt with the user-supplied key while keeping
//! export CIDs stable, so the construction is deterministic: the AES-256-GCM
//! key is the SHA-256 of the passphrase and the nonce is derived from the
//! key and the plaintext. Identical (key, plaintext) pairs always produce
//! identical ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Identifier written into export payloads alongside encrypted secrets.
pub const SECRET_ENCRYPTION_SCHEME: &str = "aes-256-gcm-siv-det";

const NONCE_LENGTH: usize = 12;

/// Failures while sealing or opening secret values.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Ciphertext was not valid base64
    #[error("ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    /// Ciphertext too short to carry a nonce
    #[error("ciphertext is truncated: {0} bytes")]
    Truncated(usize),
    /// Authentication failed, usually a wrong key
    #[error("invalid decryption key for secrets")]
    InvalidKey,
    /// Decrypted bytes were not UTF-8 text
    #[error("decrypted secret is not UTF-8 text")]
    NotText,
}

fn derive_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

fn derive_nonce(key: &[u8; 32], plaintext: &[u8]) -> [u8; NONCE_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(plaintext);
    let digest = hasher.finalize();
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce.copy_from_slice(&digest[..NONCE_LENGTH]);
    nonce
}

/// Encrypt a secret value under the supplied passphrase.
///
/// Output is base64(nonce || ciphertext). Deterministic for a fixed
/// (passphrase, plaintext) pair.
pub fn encrypt_secret_value(plaintext: &str, passphrase: &str) -> String {
    let key_bytes = derive_key(passphrase);
    let nonce_bytes = derive_nonce(&key_bytes, plaintext.as_bytes());
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .expect("AES-GCM encryption is infallible for in-memory buffers");

    let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    STANDARD.encode(sealed)
}

/// Decrypt a sealed secret value with the supplied passphrase.
pub fn decrypt_secret_value(sealed: &str, passphrase: &str) -> Result<String, CryptoError> {
    let raw = STANDARD.decode(sealed.trim())?;
    if raw.len() <= NONCE_LENGTH {
        return Err(CryptoError::Truncated(raw.len()));
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LENGTH);

    let key_bytes = derive_key(passphrase);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::InvalidKey)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::NotText)
}
