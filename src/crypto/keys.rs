//! # Data Owner Key Pairs
//!
//! RSA key pairs held by data owners, and the public keys of their
//! counterparts.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  RsaKeyPair                                                     │   │
//! │  │  ──────────                                                      │   │
//! │  │                                                                  │   │
//! │  │  • Decrypts exchange data ciphertexts (RSA-OAEP)                │   │
//! │  │  • Signs the shared signature key (RSA-PSS-SHA256)              │   │
//! │  │  • Stored as a JWK pair by the key storage facade               │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  RsaEncryptionKey                                               │   │
//! │  │  ────────────────                                                │   │
//! │  │                                                                  │   │
//! │  │  • Public half, published hex SPKI on the data owner            │   │
//! │  │  • Encrypts for its owner, verifies its owner's signatures      │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## SHA Versions
//!
//! | `shaVersion` | OAEP hash | JWK `alg` | Fingerprint |
//! |--------------|-----------|-----------|-------------|
//! | `sha-1` (legacy) | SHA-1 | `RSA-OAEP` | `hex(sha1(spki))[..32]` |
//! | `sha-256` | SHA-256 | `RSA-OAEP-256` | `hex(sha256(spki))[..32]` |
//!
//! New keys are always `sha-256`. Legacy keys stay usable for decryption and
//! are still encrypted for when a counterpart only has those.

use ::rsa::{
    traits::{PrivateKeyParts, PublicKeyParts},
    BigUint, Oaep, Pss, RsaPrivateKey, RsaPublicKey,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::jwk::{jwk_to_spki, spki_to_jwk, Jwk, KeyPair};
use super::kdf::{sha1_digest, sha256_digest};
use crate::error::{Error, Result};

/// Length of a fingerprint in hex characters
pub const FINGERPRINT_LENGTH: usize = 32;

/// Hex fingerprint of a public key
pub type Fingerprint = String;

/// Hash used by a key for OAEP and for its fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaVersion {
    /// Legacy keys
    #[serde(rename = "sha-1")]
    Sha1,
    /// Current keys
    #[serde(rename = "sha-256")]
    Sha256,
}

impl ShaVersion {
    /// JWK `alg` for keys of this version
    pub fn jwk_alg(self) -> &'static str {
        match self {
            ShaVersion::Sha1 => "RSA-OAEP",
            ShaVersion::Sha256 => "RSA-OAEP-256",
        }
    }

    /// Version from a JWK `alg`; keys without `alg` are legacy
    pub fn from_jwk_alg(alg: Option<&str>) -> Result<Self> {
        match alg {
            None | Some("RSA-OAEP") => Ok(ShaVersion::Sha1),
            Some("RSA-OAEP-256") => Ok(ShaVersion::Sha256),
            Some(other) => Err(Error::InvalidKey(format!("Unsupported JWK alg {}", other))),
        }
    }

    fn oaep(self) -> Oaep {
        match self {
            ShaVersion::Sha1 => Oaep::new::<sha1::Sha1>(),
            ShaVersion::Sha256 => Oaep::new::<Sha256>(),
        }
    }
}

impl std::fmt::Display for ShaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaVersion::Sha1 => write!(f, "sha-1"),
            ShaVersion::Sha256 => write!(f, "sha-256"),
        }
    }
}

/// Fingerprint of a DER SPKI public key
pub fn fingerprint_of_spki(spki: &[u8], sha_version: ShaVersion) -> Fingerprint {
    let digest = match sha_version {
        ShaVersion::Sha1 => hex::encode(sha1_digest(spki)),
        ShaVersion::Sha256 => hex::encode(sha256_digest(spki)),
    };
    digest[..FINGERPRINT_LENGTH].to_string()
}

// ============================================================================
// PUBLIC KEY
// ============================================================================

/// Public RSA key of a data owner
#[derive(Clone)]
pub struct RsaEncryptionKey {
    key: RsaPublicKey,
    sha_version: ShaVersion,
    spki: Vec<u8>,
}

impl RsaEncryptionKey {
    /// Load from DER SPKI
    pub fn from_spki(spki: &[u8], sha_version: ShaVersion) -> Result<Self> {
        let jwk = spki_to_jwk(spki)?;
        let key = RsaPublicKey::new(decode_uint(&jwk.n)?, decode_uint(&jwk.e)?)?;
        Ok(Self {
            key,
            sha_version,
            spki: spki.to_vec(),
        })
    }

    /// Load from hex SPKI, as published on data owners
    pub fn from_spki_hex(spki_hex: &str, sha_version: ShaVersion) -> Result<Self> {
        let spki = hex::decode(spki_hex)
            .map_err(|e| Error::MalformedKeyMaterial(format!("SPKI is not valid hex: {}", e)))?;
        Self::from_spki(&spki, sha_version)
    }

    /// Load from a JWK; the version comes from `alg`
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        let sha_version = ShaVersion::from_jwk_alg(jwk.alg.as_deref())?;
        Self::from_spki(&jwk_to_spki(jwk)?, sha_version)
    }

    fn from_rsa(key: RsaPublicKey, sha_version: ShaVersion) -> Result<Self> {
        let spki = jwk_to_spki(&public_jwk(&key, sha_version))?;
        Ok(Self {
            key,
            sha_version,
            spki,
        })
    }

    /// Fingerprint of this key
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_of_spki(&self.spki, self.sha_version)
    }

    /// Hash version of this key
    pub fn sha_version(&self) -> ShaVersion {
        self.sha_version
    }

    /// DER SPKI
    pub fn spki(&self) -> &[u8] {
        &self.spki
    }

    /// Hex SPKI
    pub fn spki_hex(&self) -> String {
        hex::encode(&self.spki)
    }

    /// JWK with `alg` set from the version
    pub fn to_jwk(&self) -> Jwk {
        public_jwk(&self.key, self.sha_version)
    }

    /// Underlying `rsa` public key
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.key
    }

    /// RSA-OAEP encrypt for the owner of this key
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.key
            .encrypt(&mut OsRng, self.sha_version.oaep(), plaintext)
            .map_err(|e| Error::EncryptionFailed(format!("RSA-OAEP: {}", e)))
    }

    /// Check an RSA-PSS-SHA256 signature made by the owner of this key
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        let hashed = sha256_digest(message);
        self.key
            .verify(Pss::new::<Sha256>(), &hashed, signature)
            .is_ok()
    }
}

impl PartialEq for RsaEncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.sha_version == other.sha_version && self.spki == other.spki
    }
}

impl Eq for RsaEncryptionKey {}

impl std::fmt::Debug for RsaEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaEncryptionKey")
            .field("fingerprint", &self.fingerprint())
            .field("sha_version", &self.sha_version)
            .finish()
    }
}

// ============================================================================
// KEY PAIR
// ============================================================================

/// RSA key pair of a data owner
///
/// ## Security
///
/// - The private key is zeroized by `rsa` when dropped
/// - `Debug` never prints private material
#[derive(Clone)]
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaEncryptionKey,
}

impl RsaKeyPair {
    /// Generate a new key pair
    pub fn generate(bits: usize, sha_version: ShaVersion) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::KeyGenerationFailed(e.to_string()))?;
        Self::from_rsa(private, sha_version)
    }

    fn from_rsa(private: RsaPrivateKey, sha_version: ShaVersion) -> Result<Self> {
        let public = RsaEncryptionKey::from_rsa(private.to_public_key(), sha_version)?;
        Ok(Self { private, public })
    }

    /// Load from a private JWK; the version comes from `alg`
    pub fn from_private_jwk(jwk: &Jwk) -> Result<Self> {
        let sha_version = ShaVersion::from_jwk_alg(jwk.alg.as_deref())?;
        let required = |name: &str, field: &Option<String>| -> Result<BigUint> {
            let encoded = field
                .as_deref()
                .ok_or_else(|| Error::MissingKeyMaterial(format!("JWK has no `{}`", name)))?;
            decode_uint(encoded)
        };

        let private = RsaPrivateKey::from_components(
            decode_uint(&jwk.n)?,
            decode_uint(&jwk.e)?,
            required("d", &jwk.d)?,
            vec![required("p", &jwk.p)?, required("q", &jwk.q)?],
        )?;
        private.validate()?;
        Self::from_rsa(private, sha_version)
    }

    /// Load from a stored JWK pair
    ///
    /// The public half must match the private one.
    pub fn from_jwk_pair(pair: &KeyPair<Jwk>) -> Result<Self> {
        let key_pair = Self::from_private_jwk(&pair.private_key)?;
        if pair.public_key.n != key_pair.public.to_jwk().n {
            return Err(Error::InvalidKey(
                "Public and private JWK do not belong together".into(),
            ));
        }
        Ok(key_pair)
    }

    /// Load from DER PKCS8
    pub fn from_pkcs8(der: &[u8], sha_version: ShaVersion) -> Result<Self> {
        let jwk = super::jwk::pkcs8_to_jwk(der)?.with_alg(sha_version.jwk_alg());
        Self::from_private_jwk(&jwk)
    }

    /// Export as a JWK pair for the key storage facade
    pub fn to_jwk_pair(&self) -> Result<KeyPair<Jwk>> {
        Ok(KeyPair {
            public_key: self.public.to_jwk(),
            private_key: self.private_jwk()?,
        })
    }

    /// Export the private key as DER PKCS8
    pub fn to_pkcs8(&self) -> Result<Vec<u8>> {
        super::jwk::jwk_to_pkcs8(&self.private_jwk()?)
    }

    fn private_jwk(&self) -> Result<Jwk> {
        let (p, q) = match self.private.primes() {
            [p, q] => (p, q),
            _ => {
                return Err(Error::InvalidKey(
                    "Only two-prime RSA keys are supported".into(),
                ))
            }
        };
        let d = self.private.d();
        let one = BigUint::from(1u8);
        let two = BigUint::from(2u8);
        let dp = d % &(p - &one);
        let dq = d % &(q - &one);
        let qi = q.modpow(&(p - &two), p);

        let mut jwk = self.public.to_jwk();
        jwk.d = Some(encode_uint(d));
        jwk.p = Some(encode_uint(p));
        jwk.q = Some(encode_uint(q));
        jwk.dp = Some(encode_uint(&dp));
        jwk.dq = Some(encode_uint(&dq));
        jwk.qi = Some(encode_uint(&qi));
        Ok(jwk)
    }

    /// Public half
    pub fn public(&self) -> &RsaEncryptionKey {
        &self.public
    }

    /// Fingerprint of the public half
    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    /// Hash version of this key pair
    pub fn sha_version(&self) -> ShaVersion {
        self.public.sha_version
    }

    /// Underlying `rsa` private key
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Underlying `rsa` public key
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public.key
    }

    /// RSA-OAEP decrypt a ciphertext made for this key
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.private
            .decrypt(self.public.sha_version.oaep(), ciphertext)
            .map_err(|e| Error::DecryptionFailed(format!("RSA-OAEP: {}", e)))
    }

    /// RSA-PSS-SHA256 sign a message
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let hashed = sha256_digest(message);
        self.private
            .sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &hashed)
            .map_err(|e| Error::SigningFailed(format!("RSA-PSS: {}", e)))
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public", &self.public)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

fn public_jwk(key: &RsaPublicKey, sha_version: ShaVersion) -> Jwk {
    Jwk {
        kty: "RSA".into(),
        alg: Some(sha_version.jwk_alg().into()),
        n: encode_uint(key.n()),
        e: encode_uint(key.e()),
        d: None,
        p: None,
        q: None,
        dp: None,
        dq: None,
        qi: None,
    }
}

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(encoded: &str) -> Result<BigUint> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| Error::MalformedKeyMaterial(format!("JWK field is not base64url: {}", e)))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

// ============================================================================
// TESTS
// ============================================================================
