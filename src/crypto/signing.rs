//! # Shared Signatures
//!
//! HMAC-SHA256 signatures made with a key that both parties of an exchange
//! data can decrypt.
//!
//! ## Signature Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SHARED SIGNATURE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  DELEGATOR (creation)                                                  │
//! │  ────────────────────                                                   │
//! │  1. Generate a random 32-byte signature key                            │
//! │  2. RSA-encrypt it for every fingerprint of both parties               │
//! │  3. bincode(content) ──► HMAC-SHA256(signature key) ──► base64         │
//! │                                                                         │
//! │  DELEGATOR OR DELEGATE (verification)                                  │
//! │  ─────────────────────────────────────                                  │
//! │  1. Decrypt the signature key with any own private key                 │
//! │  2. Decrypt the content, recompute bincode(content)                    │
//! │  3. Constant-time compare against the stored signature                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A third party without one of the private keys can neither forge nor
//! re-sign, so any change to an encrypted field or to the participant ids is
//! detected.
//!
//! The content is encoded with bincode: field order is fixed by the struct
//! and maps must be `BTreeMap`/`BTreeSet` so the encoding is canonical.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Size of a shared signature key in bytes
pub const SIGNATURE_KEY_SIZE: usize = 32;

/// Size of a shared signature in bytes
pub const SIGNATURE_SIZE: usize = 32;

/// HMAC key shared by both parties of an exchange data
#[derive(Clone, ZeroizeOnDrop)]
pub struct SignatureKey([u8; SIGNATURE_KEY_SIZE]);

impl SignatureKey {
    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; SIGNATURE_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from a decrypted slice
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; SIGNATURE_KEY_SIZE] = slice.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "Signature key must be {} bytes, got {}",
                SIGNATURE_KEY_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignatureKey([REDACTED])")
    }
}

fn mac(key: &SignatureKey) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(&key.0)
        .map_err(|e| Error::Internal(format!("HMAC key rejected: {}", e)))
}

/// HMAC-SHA256 of a message
pub fn sign(key: &SignatureKey, message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = mac(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time check of an HMAC-SHA256 signature
pub fn verify(key: &SignatureKey, message: &[u8], signature: &[u8]) -> Result<bool> {
    let mut mac = mac(key)?;
    mac.update(message);
    Ok(mac.verify_slice(signature).is_ok())
}

/// Sign the canonical bincode encoding of some content
pub fn sign_canonical<T: Serialize>(key: &SignatureKey, content: &T) -> Result<Vec<u8>> {
    let encoded = bincode::serialize(content)?;
    sign(key, &encoded)
}

/// Verify a signature made by [`sign_canonical`]
pub fn verify_canonical<T: Serialize>(
    key: &SignatureKey,
    content: &T,
    signature: &[u8],
) -> Result<bool> {
    let encoded = bincode::serialize(content)?;
    verify(key, &encoded, signature)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[derive(Serialize)]
    struct Content {
        delegator: String,
        fingerprints: BTreeSet<String>,
    }

    #[test]
    fn test_sign_verify() {
        let key = SignatureKey::generate();
        let signature = sign(&key, b"payload").unwrap();

        assert_eq!(signature.len(), SIGNATURE_SIZE);
        assert!(verify(&key, b"payload", &signature).unwrap());
    }

    #[test]
    fn test_verify_wrong_message_fails() {
        let key = SignatureKey::generate();
        let signature = sign(&key, b"payload").unwrap();

        assert!(!verify(&key, b"payl0ad", &signature).unwrap());
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let signature = sign(&SignatureKey::generate(), b"payload").unwrap();
        assert!(!verify(&SignatureKey::generate(), b"payload", &signature).unwrap());
    }

    #[test]
    fn test_canonical_encoding_ignores_insertion_order() {
        let key = SignatureKey::from_slice(&[9u8; 32]).unwrap();
        let a = Content {
            delegator: "hcp-1".into(),
            fingerprints: ["b".to_string(), "a".to_string()].into_iter().collect(),
        };
        let b = Content {
            delegator: "hcp-1".into(),
            fingerprints: ["a".to_string(), "b".to_string()].into_iter().collect(),
        };

        let signature = sign_canonical(&key, &a).unwrap();
        assert!(verify_canonical(&key, &b, &signature).unwrap());
    }

    #[test]
    fn test_canonical_detects_changed_field() {
        let key = SignatureKey::generate();
        let content = Content {
            delegator: "hcp-1".into(),
            fingerprints: BTreeSet::new(),
        };
        let signature = sign_canonical(&key, &content).unwrap();

        let changed = Content {
            delegator: "hcp-2".into(),
            fingerprints: BTreeSet::new(),
        };
        assert!(!verify_canonical(&key, &changed, &signature).unwrap());
    }

    #[test]
    fn test_signature_key_length() {
        assert!(SignatureKey::from_slice(&[0u8; 31]).is_err());
        assert!(format!("{:?}", SignatureKey::generate()).contains("REDACTED"));
    }
}
