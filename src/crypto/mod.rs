//! # Cryptography Module
//!
//! All cryptographic primitives used by the core.
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    DATA OWNER KEYS                              │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  RSA key pair (2048 bits, sha-256; legacy sha-1 still read)    │   │
//! │  │     • OAEP: wraps exchange keys for each fingerprint           │   │
//! │  │     • PSS:  delegator signature over the shared signature key  │   │
//! │  │     • PKCS8/SPKI ⇄ JWK through a minimal ASN.1 codec           │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    EXCHANGE DATA SECRETS                        │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  exchange key (32 B)          AES key shared by both parties   │   │
//! │  │  access control secret (16 B) ──► access control key (SHA-256) │   │
//! │  │  shared signature key (32 B)  HMAC-SHA256 over the above       │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    RECOVERY                                     │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  AES-256-GCM: recovery payloads, wrapped Shamir shares         │   │
//! │  │  Shamir over GF(2^8): private key split between notaries       │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | RSA-OAEP (SHA-256, legacy SHA-1) | Key wrapping per fingerprint |
//! | RSA-PSS-SHA256 | Delegator signature |
//! | HMAC-SHA256 | Shared signature |
//! | AES-256-GCM | Recovery blobs, Shamir share wrapping |
//! | SHA-256 | Access control keys, fingerprints |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: symmetric secrets are zeroized when dropped
//! 2. **Secure Random**: `rand::rngs::OsRng` everywhere
//! 3. **No Key Logging**: `Debug` of every key type is redacted

pub mod asn1;
mod encryption;
mod jwk;
mod kdf;
mod keys;
mod shamir;
mod signing;

pub use asn1::{Asn1, Asn1Error, MAX_ASN1_DEPTH};
pub use encryption::{decrypt, encrypt, open, seal, EncryptionKey, Nonce, KEY_SIZE, NONCE_SIZE};
pub use jwk::{
    jwk_to_pkcs8, jwk_to_spki, jwk_to_spki_hex, pkcs8_to_jwk, spki_hex_to_jwk, spki_to_jwk, Jwk,
    KeyPair,
};
pub use kdf::{
    access_control_key, exchange_data_map_id, security_metadata_key, sha256_digest,
    AccessControlKey, Confidentiality, ACCESS_CONTROL_KEY_LENGTH,
};
pub use keys::{
    fingerprint_of_spki, Fingerprint, RsaEncryptionKey, RsaKeyPair, ShaVersion,
    FINGERPRINT_LENGTH,
};
pub use shamir::{combine as shamir_combine, share as shamir_share, ShamirError, MAX_SHARES};
pub use signing::{sign_canonical, verify_canonical, SignatureKey, SIGNATURE_KEY_SIZE};

/// Size of an access control secret in bytes
pub const ACCESS_CONTROL_SECRET_SIZE: usize = 16;

/// Generate `N` random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
