//! # Symmetric Encryption
//!
//! AES-256-GCM, used wherever the core encrypts data with a symmetric key it
//! controls:
//!
//! - recovery payloads, under the recovery key handed to the user
//! - Shamir shares, under the exchange key shared with the notary
//!
//! ## Sealed Layout
//!
//! ```text
//! ┌──────────────────┬───────────────────────────────────────────────┐
//! │  nonce (12 B)    │  ciphertext ‖ tag (16 B)                      │
//! └──────────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! The additional authenticated data binds a ciphertext to its purpose (e.g.
//! the recovery data id), so a blob cannot be replayed in another context.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// A nonce for AES-GCM encryption
///
/// Random nonces are safe for up to 2^32 messages per key, far above what a
/// recovery key or an exchange key ever encrypts.
#[derive(Clone, Copy, Debug)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// An AES-256-GCM encryption key
///
/// Zeroized when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, which must be exactly [`KEY_SIZE`] bytes
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "AES key must be {} bytes, got {}",
                KEY_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// Encrypt with AES-256-GCM
///
/// ## Returns
///
/// Tuple of (nonce, ciphertext_with_tag)
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt with AES-256-GCM
///
/// ## Errors
///
/// Returns `DecryptionFailed` if the ciphertext, the AAD, the key or the
/// nonce do not match what was used for encryption.
pub fn decrypt(
    key: &EncryptionKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|_| {
            Error::DecryptionFailed("Decryption failed: authentication tag mismatch".into())
        })
}

/// Encrypt and prepend the nonce, producing a self-contained blob
pub fn seal(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = encrypt(key, plaintext, aad)?;
    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(nonce.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a blob produced by [`seal`]
pub fn open(key: &EncryptionKey, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed("Sealed data too short".into()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    decrypt(key, &Nonce::from_bytes(nonce), ciphertext, aad)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_basic() {
        let key = EncryptionKey::from_bytes([42u8; 32]);
        let plaintext = b"exchange key bytes";
        let aad = b"context";

        let (nonce, ciphertext) = encrypt(&key, plaintext, aad).unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext, aad).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = EncryptionKey::generate();
        let sealed = seal(&key, b"share", b"notary-1").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 5 + TAG_SIZE);
        assert_eq!(open(&key, &sealed, b"notary-1").unwrap(), b"share");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = EncryptionKey::from_bytes([42u8; 32]);
        let mut sealed = seal(&key, b"payload", b"").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        assert!(open(&key, &sealed, b"").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = EncryptionKey::from_bytes([42u8; 32]);
        let sealed = seal(&key, b"payload", b"recovery-1").unwrap();

        assert!(open(&key, &sealed, b"recovery-2").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&EncryptionKey::generate(), b"payload", b"").unwrap();
        assert!(open(&EncryptionKey::generate(), &sealed, b"").is_err());
    }

    #[test]
    fn test_short_blob_rejected() {
        let key = EncryptionKey::generate();
        assert!(matches!(
            open(&key, &[0u8; 10], b""),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_key_from_slice_length() {
        assert!(EncryptionKey::from_slice(&[1u8; 32]).is_ok());
        assert!(matches!(
            EncryptionKey::from_slice(&[1u8; 16]),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_redacts() {
        let key = EncryptionKey::from_bytes([7u8; 32]);
        assert!(format!("{:?}", key).contains("REDACTED"));
    }
}
