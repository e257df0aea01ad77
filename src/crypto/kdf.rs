//! # Key Derivation
//!
//! Hash-based derivations from a decrypted access control secret.
//!
//! ## Derivation Chain
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 ACCESS CONTROL SECRET → LOOKUP KEYS                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  accessControlSecret (decrypted from exchange data)                    │
//! │            │                                                            │
//! │            ▼                                                            │
//! │  accessControlKey = sha256(secret ‖ entityClass ‖ level)[..16]         │
//! │            │                                                            │
//! │            ├──► securityMetadataKey = hex(sha256(accessControlKey))    │
//! │            │      indexes anonymous delegations on an entity           │
//! │            │                                                            │
//! │            └──► exchange data map id = hex(sha256(accessControlKey))   │
//! │                   finds the exchange data without naming its owner     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The backend only ever sees the outputs of the last step, so it can not
//! link an entity to the data owners that can read it.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Length of an access control key in bytes (128 bits)
pub const ACCESS_CONTROL_KEY_LENGTH: usize = 16;

/// 128-bit key derived from an access control secret
pub type AccessControlKey = [u8; ACCESS_CONTROL_KEY_LENGTH];

/// Confidentiality level mixed into the access control key
///
/// Confidential entities get a different key, so sharing standard data
/// with a delegate never reveals where the confidential data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidentiality {
    /// Default level
    Standard,
    /// Restricted level
    Confidential,
}

impl Confidentiality {
    /// Wire tag hashed into the access control key
    pub fn as_str(self) -> &'static str {
        match self {
            Confidentiality::Standard => "standard",
            Confidentiality::Confidential => "confidential",
        }
    }
}

/// SHA-256 of some bytes
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-1 of some bytes (legacy key fingerprints only)
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// Derive the access control key for an entity class and level
pub fn access_control_key(
    access_control_secret: &[u8],
    entity_class: &str,
    confidentiality: Confidentiality,
) -> AccessControlKey {
    let mut hasher = Sha256::new();
    hasher.update(access_control_secret);
    hasher.update(entity_class.as_bytes());
    hasher.update(confidentiality.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; ACCESS_CONTROL_KEY_LENGTH];
    key.copy_from_slice(&digest[..ACCESS_CONTROL_KEY_LENGTH]);
    key
}

/// Key indexing anonymous delegation metadata on entities
pub fn security_metadata_key(access_control_key: &AccessControlKey) -> String {
    hex::encode(sha256_digest(access_control_key))
}

/// Id of the exchange data map entry for an access control key
///
/// Same value as [`security_metadata_key`]; both are content addressed.
pub fn exchange_data_map_id(access_control_key: &AccessControlKey) -> String {
    security_metadata_key(access_control_key)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_control_key_matches_manual_hash() {
        let secret = [7u8; 16];
        let key = access_control_key(&secret, "Patient", Confidentiality::Standard);

        let mut input = secret.to_vec();
        input.extend_from_slice(b"Patient");
        input.extend_from_slice(b"standard");
        assert_eq!(key, sha256_digest(&input)[..16]);
    }

    #[test]
    fn test_access_control_key_depends_on_class_and_level() {
        let secret = [7u8; 16];
        let standard = access_control_key(&secret, "Contact", Confidentiality::Standard);
        let confidential = access_control_key(&secret, "Contact", Confidentiality::Confidential);
        let other_class = access_control_key(&secret, "Patient", Confidentiality::Standard);

        assert_ne!(standard, confidential);
        assert_ne!(standard, other_class);
    }

    #[test]
    fn test_security_metadata_key_is_hex_sha256() {
        let key = [1u8; 16];
        let smk = security_metadata_key(&key);

        assert_eq!(smk.len(), 64);
        assert_eq!(smk, exchange_data_map_id(&key));
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hex::encode(sha256_digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(sha1_digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_confidentiality_wire_names() {
        assert_eq!(
            serde_json::to_string(&Confidentiality::Confidential).unwrap(),
            "\"confidential\""
        );
    }
}
