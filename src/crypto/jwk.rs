//! # JWK Conversion
//!
//! Converts RSA keys between DER (PKCS8 private keys, SPKI public keys) and
//! JSON Web Keys, on top of the [`asn1`](super::asn1) codec.
//!
//! ## Structures
//!
//! ```text
//! PKCS8 PrivateKeyInfo                     SPKI SubjectPublicKeyInfo
//! ─────────────────────                    ─────────────────────────
//! SEQUENCE                                 SEQUENCE
//! ├── INTEGER 0                            ├── SEQUENCE
//! ├── SEQUENCE                             │   ├── OID rsaEncryption
//! │   ├── OID rsaEncryption                │   └── NULL
//! │   └── NULL                             └── BIT STRING
//! └── OCTET STRING                             └── SEQUENCE
//!     └── SEQUENCE                                 ├── INTEGER n
//!         ├── INTEGER 0                            └── INTEGER e
//!         ├── INTEGER n, e, d
//!         ├── INTEGER p, q
//!         └── INTEGER dp, dq, qi
//! ```
//!
//! JWK fields hold the minimal unsigned big-endian value of each integer,
//! base64url encoded without padding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use super::asn1::{self, pack, parse_asn1, tag, Asn1};
use crate::error::{Error, Result};

/// Encoded content of the rsaEncryption OID (1.2.840.113549.1.1.1)
pub const RSA_ENCRYPTION_OID: [u8; 9] = [0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];

/// An RSA JSON Web Key
///
/// Public keys only carry `n` and `e`; private keys carry every CRT
/// component as well.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `RSA`
    pub kty: String,
    /// Algorithm (`RSA-OAEP` or `RSA-OAEP-256`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Modulus
    pub n: String,
    /// Public exponent
    pub e: String,
    /// Private exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// First prime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// Second prime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// d mod (p - 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    /// d mod (q - 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    /// q^-1 mod p
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
}

impl Jwk {
    /// Whether this JWK carries private material
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// The public half of this key
    pub fn public_only(&self) -> Jwk {
        Jwk {
            kty: self.kty.clone(),
            alg: self.alg.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
        }
    }

    /// Same key with the given algorithm
    pub fn with_alg(mut self, alg: impl Into<String>) -> Self {
        self.alg = Some(alg.into());
        self
    }
}

impl std::fmt::Debug for Jwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("n", &self.n)
            .field("e", &self.e)
            .field("private", &if self.is_private() { "[REDACTED]" } else { "none" })
            .finish()
    }
}

/// A `{publicKey, privateKey}` pair in some exchangeable format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair<T> {
    /// Public half
    pub public_key: T,
    /// Private half
    pub private_key: T,
}

// ============================================================================
// DER → JWK
// ============================================================================

/// Convert a DER PKCS8 RSA private key to a JWK (without `alg`)
pub fn pkcs8_to_jwk(der: &[u8]) -> Result<Jwk> {
    let root = parse_asn1(der)?;
    let fields = match root.children() {
        Some([_version, algorithm, key]) => {
            expect_rsa_algorithm(algorithm)?;
            match key {
                Asn1::Constructed {
                    tag: tag::OCTET_STRING,
                    children,
                } => match children.as_slice() {
                    [rsa_key] => rsa_key
                        .children()
                        .ok_or_else(|| malformed("RSAPrivateKey is not a SEQUENCE"))?,
                    _ => return Err(malformed("PKCS8 key payload must hold one element")),
                },
                _ => return Err(malformed("PKCS8 key payload is not DER")),
            }
        }
        _ => return Err(malformed("PKCS8 must be a SEQUENCE of 3 elements")),
    };

    match fields {
        [_version, n, e, d, p, q, dp, dq, qi, ..] => Ok(Jwk {
            kty: "RSA".into(),
            alg: None,
            n: integer_field(n)?,
            e: integer_field(e)?,
            d: Some(integer_field(d)?),
            p: Some(integer_field(p)?),
            q: Some(integer_field(q)?),
            dp: Some(integer_field(dp)?),
            dq: Some(integer_field(dq)?),
            qi: Some(integer_field(qi)?),
        }),
        _ => Err(malformed("RSAPrivateKey must hold 9 integers")),
    }
}

/// Convert a DER SPKI RSA public key to a JWK (without `alg`)
pub fn spki_to_jwk(der: &[u8]) -> Result<Jwk> {
    let root = parse_asn1(der)?;
    let (n, e) = match root.children() {
        Some([algorithm, key]) => {
            expect_rsa_algorithm(algorithm)?;
            match key {
                Asn1::Constructed {
                    tag: tag::BIT_STRING,
                    children,
                } => match children.as_slice() {
                    [rsa_key] => match rsa_key.children() {
                        Some([n, e]) => (n, e),
                        _ => return Err(malformed("RSAPublicKey must hold 2 integers")),
                    },
                    _ => return Err(malformed("SPKI key payload must hold one element")),
                },
                _ => return Err(malformed("SPKI key payload is not DER")),
            }
        }
        _ => return Err(malformed("SPKI must be a SEQUENCE of 2 elements")),
    };

    Ok(Jwk {
        kty: "RSA".into(),
        alg: None,
        n: integer_field(n)?,
        e: integer_field(e)?,
        d: None,
        p: None,
        q: None,
        dp: None,
        dq: None,
        qi: None,
    })
}

/// Hex-encoded SPKI to JWK
pub fn spki_hex_to_jwk(spki_hex: &str) -> Result<Jwk> {
    let der = hex::decode(spki_hex)
        .map_err(|e| malformed(&format!("SPKI is not valid hex: {}", e)))?;
    spki_to_jwk(&der)
}

fn expect_rsa_algorithm(algorithm: &Asn1) -> Result<()> {
    match algorithm.children() {
        Some([oid, ..]) if oid.tag() == tag::OBJECT_IDENTIFIER => {
            if oid.value() == Some(&RSA_ENCRYPTION_OID[..]) {
                Ok(())
            } else {
                Err(malformed("algorithm is not rsaEncryption"))
            }
        }
        _ => Err(malformed("missing AlgorithmIdentifier")),
    }
}

fn integer_field(element: &Asn1) -> Result<String> {
    match element {
        Asn1::Primitive {
            tag: tag::INTEGER,
            value,
        } => {
            let minimal = asn1::strip_leading_zeros(value);
            if minimal.is_empty() {
                Ok(URL_SAFE_NO_PAD.encode([0u8]))
            } else {
                Ok(URL_SAFE_NO_PAD.encode(minimal))
            }
        }
        _ => Err(malformed("expected an INTEGER")),
    }
}

// ============================================================================
// JWK → DER
// ============================================================================

/// Convert a private JWK to DER PKCS8
pub fn jwk_to_pkcs8(jwk: &Jwk) -> Result<Vec<u8>> {
    let private = |name: &str, field: &Option<String>| -> Result<Asn1> {
        let encoded = field
            .as_deref()
            .ok_or_else(|| Error::MissingKeyMaterial(format!("JWK has no `{}`", name)))?;
        integer_from_base64(encoded)
    };

    let rsa_key = Asn1::sequence(vec![
        Asn1::integer(&[0]),
        integer_from_base64(&jwk.n)?,
        integer_from_base64(&jwk.e)?,
        private("d", &jwk.d)?,
        private("p", &jwk.p)?,
        private("q", &jwk.q)?,
        private("dp", &jwk.dp)?,
        private("dq", &jwk.dq)?,
        private("qi", &jwk.qi)?,
    ]);

    Ok(pack(&Asn1::sequence(vec![
        Asn1::integer(&[0]),
        rsa_algorithm(),
        Asn1::octet_string(vec![rsa_key]),
    ])))
}

/// Convert a JWK (public or private) to DER SPKI
pub fn jwk_to_spki(jwk: &Jwk) -> Result<Vec<u8>> {
    let rsa_key = Asn1::sequence(vec![
        integer_from_base64(&jwk.n)?,
        integer_from_base64(&jwk.e)?,
    ]);
    Ok(pack(&Asn1::sequence(vec![
        rsa_algorithm(),
        Asn1::bit_string(vec![rsa_key]),
    ])))
}

/// JWK to hex-encoded SPKI
pub fn jwk_to_spki_hex(jwk: &Jwk) -> Result<String> {
    Ok(hex::encode(jwk_to_spki(jwk)?))
}

fn rsa_algorithm() -> Asn1 {
    Asn1::sequence(vec![Asn1::oid(&RSA_ENCRYPTION_OID), Asn1::null()])
}

fn integer_from_base64(encoded: &str) -> Result<Asn1> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| malformed(&format!("JWK field is not base64url: {}", e)))?;
    Ok(Asn1::integer(&bytes))
}

fn malformed(reason: &str) -> Error {
    Error::MalformedKeyMaterial(reason.to_string())
}

// ============================================================================
// TESTS
// ============================================================================
