//! # Exchange Data Protocol
//!
//! Creation, verification and extension of exchange data.
//!
//! ## Record Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          EXCHANGE DATA                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  exchangeKey          { fp → RSA-OAEP(fp, exchange key) }              │
//! │  accessControlSecret  { fp → RSA-OAEP(fp, access control secret) }     │
//! │  sharedSignatureKey   { fp → RSA-OAEP(fp, HMAC key) }                  │
//! │                                                                         │
//! │  sharedSignature      HMAC(HMAC key, bincode(                          │
//! │                         exchange key, access control secret,           │
//! │                         delegator, delegate, every fingerprint))       │
//! │                                                                         │
//! │  delegatorSignature   { delegator fp → RSA-PSS(delegator, HMAC key) }  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One fingerprint of either party is enough to open the record. The shared
//! signature binds the secrets to the parties and to the set of fingerprints,
//! and the delegator signature binds the HMAC key to the delegator, so a third
//! party holding only public keys can not forge or alter a record.
//!
//! ## Fingerprint Lifecycle
//!
//! ```text
//! undisclosed ──extend_access──► encrypted for fp ──deletionDate──► revoked
//! ```
//!
//! Existing ciphertext entries are never rewritten.

use std::collections::{BTreeMap, BTreeSet};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{
    access_control_key, random_bytes, sign_canonical, verify_canonical, AccessControlKey,
    Confidentiality, EncryptionKey, Fingerprint, RsaEncryptionKey, RsaKeyPair, SignatureKey,
    ACCESS_CONTROL_SECRET_SIZE,
};
use crate::error::{Error, Result};
use crate::model::ExchangeData;

/// Secrets of an exchange data, as decrypted by one of its parties
#[derive(Clone)]
pub struct DecryptedExchangeData {
    /// Exchange data id
    pub exchange_data_id: String,
    /// Data owner sharing the keys
    pub delegator: String,
    /// Data owner receiving the keys
    pub delegate: String,
    /// AES key shared by both parties
    pub exchange_key: EncryptionKey,
    /// Secret behind the access control keys
    pub access_control_secret: Zeroizing<[u8; ACCESS_CONTROL_SECRET_SIZE]>,
    /// HMAC key of the shared signature
    pub signature_key: SignatureKey,
}

impl DecryptedExchangeData {
    /// Access control key for an entity class and confidentiality level
    pub fn access_control_key(
        &self,
        entity_class: &str,
        confidentiality: Confidentiality,
    ) -> AccessControlKey {
        access_control_key(&*self.access_control_secret, entity_class, confidentiality)
    }
}

impl std::fmt::Debug for DecryptedExchangeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedExchangeData")
            .field("exchange_data_id", &self.exchange_data_id)
            .field("delegator", &self.delegator)
            .field("delegate", &self.delegate)
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}

/// Exchange data whose signatures have been checked
///
/// Only [`verify`] builds one.
#[derive(Debug, Clone)]
pub struct VerifiedExchangeData {
    exchange_data: ExchangeData,
    content: DecryptedExchangeData,
}

impl VerifiedExchangeData {
    /// Exchange data this process created itself
    pub(crate) fn created(exchange_data: ExchangeData, content: DecryptedExchangeData) -> Self {
        Self {
            exchange_data,
            content,
        }
    }

    /// The checked record
    pub fn exchange_data(&self) -> &ExchangeData {
        &self.exchange_data
    }

    /// Its decrypted secrets
    pub fn content(&self) -> &DecryptedExchangeData {
        &self.content
    }

    /// Split into record and secrets
    pub fn into_parts(self) -> (ExchangeData, DecryptedExchangeData) {
        (self.exchange_data, self.content)
    }
}

/// Canonical content covered by the shared signature
#[derive(Serialize)]
struct SharedSignatureContent<'a> {
    exchange_key: &'a [u8],
    access_control_secret: &'a [u8],
    delegator: &'a str,
    delegate: &'a str,
    fingerprints: BTreeSet<&'a str>,
}

fn signature_content<'a>(
    exchange_data: &'a ExchangeData,
    content: &'a DecryptedExchangeData,
) -> SharedSignatureContent<'a> {
    let fingerprints = exchange_data
        .exchange_key
        .keys()
        .chain(exchange_data.access_control_secret.keys())
        .chain(exchange_data.shared_signature_key.keys())
        .map(String::as_str)
        .collect();

    SharedSignatureContent {
        exchange_key: content.exchange_key.as_bytes(),
        access_control_secret: &*content.access_control_secret,
        delegator: &exchange_data.delegator,
        delegate: &exchange_data.delegate,
        fingerprints,
    }
}

fn shared_signature(exchange_data: &ExchangeData, content: &DecryptedExchangeData) -> Result<String> {
    let signature = sign_canonical(
        &content.signature_key,
        &signature_content(exchange_data, content),
    )?;
    Ok(BASE64.encode(signature))
}

/// Add the ciphertexts a key is missing; returns whether anything was added
fn encrypt_for(
    exchange_data: &mut ExchangeData,
    content: &DecryptedExchangeData,
    key: &RsaEncryptionKey,
) -> Result<bool> {
    let fingerprint = key.fingerprint();
    let secrets: [(&mut BTreeMap<Fingerprint, String>, &[u8]); 3] = [
        (&mut exchange_data.exchange_key, content.exchange_key.as_bytes()),
        (&mut exchange_data.access_control_secret, &*content.access_control_secret),
        (&mut exchange_data.shared_signature_key, content.signature_key.as_bytes()),
    ];

    let mut added = false;
    for (map, secret) in secrets {
        if !map.contains_key(&fingerprint) {
            map.insert(fingerprint.clone(), hex::encode(key.encrypt(secret)?));
            added = true;
        }
    }
    Ok(added)
}

/// Create exchange data from `delegator` to `delegate`
///
/// Secrets are encrypted for every key in `encryption_keys` and for the
/// public half of every delegator key pair. Each delegator key pair signs
/// the HMAC key.
pub fn create_exchange_data(
    delegator: &str,
    delegate: &str,
    delegator_keys: &[RsaKeyPair],
    encryption_keys: &[RsaEncryptionKey],
) -> Result<(ExchangeData, DecryptedExchangeData)> {
    if delegator_keys.is_empty() {
        return Err(Error::MissingKeyMaterial(format!(
            "no key pair to sign exchange data of {}",
            delegator
        )));
    }

    let content = DecryptedExchangeData {
        exchange_data_id: Uuid::new_v4().to_string(),
        delegator: delegator.to_string(),
        delegate: delegate.to_string(),
        exchange_key: EncryptionKey::generate(),
        access_control_secret: Zeroizing::new(random_bytes()),
        signature_key: SignatureKey::generate(),
    };

    let mut exchange_data = ExchangeData {
        id: content.exchange_data_id.clone(),
        rev: None,
        delegator: delegator.to_string(),
        delegate: delegate.to_string(),
        exchange_key: BTreeMap::new(),
        access_control_secret: BTreeMap::new(),
        shared_signature_key: BTreeMap::new(),
        delegator_signature: BTreeMap::new(),
        shared_signature: String::new(),
        deletion_date: None,
    };

    let keys = delegator_keys
        .iter()
        .map(RsaKeyPair::public)
        .chain(encryption_keys.iter());
    for key in keys {
        encrypt_for(&mut exchange_data, &content, key)?;
    }

    for key_pair in delegator_keys {
        let signature = key_pair.sign(content.signature_key.as_bytes())?;
        exchange_data
            .delegator_signature
            .insert(key_pair.fingerprint(), BASE64.encode(signature));
    }

    exchange_data.shared_signature = shared_signature(&exchange_data, &content)?;
    Ok((exchange_data, content))
}

fn field_ciphertext(
    map: &BTreeMap<Fingerprint, String>,
    fingerprint: &str,
    field: &str,
) -> Result<Vec<u8>> {
    let encoded = map
        .get(fingerprint)
        .ok_or_else(|| Error::DecryptionFailed(format!("no {} for {}", field, fingerprint)))?;
    hex::decode(encoded).map_err(|e| Error::DecryptionFailed(format!("{}: {}", field, e)))
}

fn decrypt_with(exchange_data: &ExchangeData, key_pair: &RsaKeyPair) -> Result<DecryptedExchangeData> {
    let fingerprint = key_pair.fingerprint();

    let exchange_key = Zeroizing::new(key_pair.decrypt(&field_ciphertext(
        &exchange_data.exchange_key,
        &fingerprint,
        "exchangeKey",
    )?)?);
    let secret = Zeroizing::new(key_pair.decrypt(&field_ciphertext(
        &exchange_data.access_control_secret,
        &fingerprint,
        "accessControlSecret",
    )?)?);
    let signature_key = Zeroizing::new(key_pair.decrypt(&field_ciphertext(
        &exchange_data.shared_signature_key,
        &fingerprint,
        "sharedSignatureKey",
    )?)?);

    let access_control_secret: [u8; ACCESS_CONTROL_SECRET_SIZE] =
        secret.as_slice().try_into().map_err(|_| {
            Error::DecryptionFailed(format!(
                "access control secret of {} has {} bytes",
                exchange_data.id,
                secret.len()
            ))
        })?;

    Ok(DecryptedExchangeData {
        exchange_data_id: exchange_data.id.clone(),
        delegator: exchange_data.delegator.clone(),
        delegate: exchange_data.delegate.clone(),
        exchange_key: EncryptionKey::from_slice(&exchange_key)?,
        access_control_secret: Zeroizing::new(access_control_secret),
        signature_key: SignatureKey::from_slice(&signature_key)?,
    })
}

/// Decrypt exchange data without checking its signatures
///
/// Returns `None` when no key pair can open it.
pub fn decrypt(
    exchange_data: &ExchangeData,
    key_pairs: &[RsaKeyPair],
) -> Result<Option<DecryptedExchangeData>> {
    let fingerprints = exchange_data.fingerprints();
    let mut last_error = None;
    for key_pair in key_pairs
        .iter()
        .filter(|kp| fingerprints.contains(&kp.fingerprint()))
    {
        match decrypt_with(exchange_data, key_pair) {
            Ok(content) => return Ok(Some(content)),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Decrypt exchange data and check both of its signatures
///
/// `delegator_verification_keys` are public keys of the delegator, current
/// or retired. Fails with [`Error::UnverifiableExchangeData`] when no key
/// pair opens the HMAC key or no delegator key can check its signature, and
/// with [`Error::TamperedExchangeData`] on any mismatch.
pub fn verify(
    exchange_data: &ExchangeData,
    key_pairs: &[RsaKeyPair],
    delegator_verification_keys: &[RsaEncryptionKey],
) -> Result<VerifiedExchangeData> {
    let tampered = || Error::TamperedExchangeData(exchange_data.id.clone());

    let key_pair = key_pairs
        .iter()
        .find(|kp| {
            exchange_data
                .shared_signature_key
                .contains_key(&kp.fingerprint())
        })
        .ok_or_else(|| Error::UnverifiableExchangeData(exchange_data.id.clone()))?;

    let content = decrypt_with(exchange_data, key_pair).map_err(|_| tampered())?;

    let signature = BASE64
        .decode(&exchange_data.shared_signature)
        .map_err(|_| tampered())?;
    if !verify_canonical(
        &content.signature_key,
        &signature_content(exchange_data, &content),
        &signature,
    )? {
        return Err(tampered());
    }

    let checkable: Vec<(&RsaEncryptionKey, &String)> = exchange_data
        .delegator_signature
        .iter()
        .filter_map(|(fp, sig)| {
            delegator_verification_keys
                .iter()
                .find(|k| &k.fingerprint() == fp)
                .map(|k| (k, sig))
        })
        .collect();
    if checkable.is_empty() {
        return Err(Error::UnverifiableExchangeData(exchange_data.id.clone()));
    }
    let signed_by_delegator = checkable.iter().any(|(key, sig)| {
        BASE64
            .decode(sig)
            .map(|sig| key.verify_signature(content.signature_key.as_bytes(), &sig))
            .unwrap_or(false)
    });
    if !signed_by_delegator {
        return Err(tampered());
    }

    Ok(VerifiedExchangeData {
        exchange_data: exchange_data.clone(),
        content,
    })
}

/// Give more keys access to exchange data
///
/// Only fingerprints without ciphertexts get new entries, and the shared
/// signature is recomputed. Returns `None` when every key already has
/// access, so running it twice with the same keys does nothing the second
/// time.
pub fn extend_access(
    exchange_data: &ExchangeData,
    content: &DecryptedExchangeData,
    new_keys: &[RsaEncryptionKey],
) -> Result<Option<ExchangeData>> {
    let mut updated = exchange_data.clone();
    let mut changed = false;
    for key in new_keys {
        changed |= encrypt_for(&mut updated, content, key)?;
    }
    if !changed {
        return Ok(None);
    }
    updated.shared_signature = shared_signature(&updated, content)?;
    Ok(Some(updated))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_key;

    fn flip_first_byte(ciphertext: &str) -> String {
        let mut bytes = hex::decode(ciphertext).unwrap();
        bytes[0] ^= 0x01;
        hex::encode(bytes)
    }

    fn shared() -> (ExchangeData, DecryptedExchangeData) {
        create_exchange_data(
            "hcp-1",
            "p-1",
            &[test_key(0).clone()],
            &[test_key(1).public().clone()],
        )
        .unwrap()
    }

    #[test]
    fn test_both_parties_verify() {
        let (ed, content) = shared();
        let delegator_keys = [test_key(0).public().clone()];

        let by_delegator = verify(&ed, &[test_key(0).clone()], &delegator_keys).unwrap();
        let by_delegate = verify(&ed, &[test_key(1).clone()], &delegator_keys).unwrap();

        assert_eq!(
            by_delegator.content().exchange_key.as_bytes(),
            content.exchange_key.as_bytes()
        );
        assert_eq!(
            by_delegate.content().exchange_key.as_bytes(),
            content.exchange_key.as_bytes()
        );
        assert_eq!(
            *by_delegate.content().access_control_secret,
            *content.access_control_secret
        );
        assert_eq!(ed.fingerprints().len(), 2);
    }

    #[test]
    fn test_flipped_exchange_key_is_tampered() {
        let (mut ed, _) = shared();
        let fp = test_key(1).fingerprint();
        let flipped = flip_first_byte(&ed.exchange_key[&fp]);
        ed.exchange_key.insert(fp, flipped);

        let err = verify(&ed, &[test_key(1).clone()], &[test_key(0).public().clone()]).unwrap_err();
        assert_eq!(err, Error::TamperedExchangeData(ed.id.clone()));
    }

    #[test]
    fn test_flipped_access_control_secret_is_tampered() {
        let (mut ed, _) = shared();
        let fp = test_key(0).fingerprint();
        let flipped = flip_first_byte(&ed.access_control_secret[&fp]);
        ed.access_control_secret.insert(fp, flipped);

        let err = verify(&ed, &[test_key(0).clone()], &[test_key(0).public().clone()]).unwrap_err();
        assert!(matches!(err, Error::TamperedExchangeData(_)));
    }

    #[test]
    fn test_swapped_delegate_is_tampered() {
        let (mut ed, _) = shared();
        ed.delegate = "p-2".into();

        let err = verify(&ed, &[test_key(1).clone()], &[test_key(0).public().clone()]).unwrap_err();
        assert!(matches!(err, Error::TamperedExchangeData(_)));
    }

    #[test]
    fn test_forged_delegator_signature_is_tampered() {
        let (mut ed, content) = shared();
        let forged = test_key(2).sign(content.signature_key.as_bytes()).unwrap();
        ed.delegator_signature
            .insert(test_key(0).fingerprint(), BASE64.encode(forged));

        let err = verify(&ed, &[test_key(1).clone()], &[test_key(0).public().clone()]).unwrap_err();
        assert!(matches!(err, Error::TamperedExchangeData(_)));
    }

    #[test]
    fn test_unverifiable_without_keys() {
        let (ed, _) = shared();

        let err = verify(&ed, &[test_key(2).clone()], &[test_key(0).public().clone()]).unwrap_err();
        assert_eq!(err, Error::UnverifiableExchangeData(ed.id.clone()));

        let err = verify(&ed, &[test_key(1).clone()], &[]).unwrap_err();
        assert!(matches!(err, Error::UnverifiableExchangeData(_)));
    }

    #[test]
    fn test_missing_delegator_keys() {
        let err = create_exchange_data("hcp-1", "p-1", &[], &[test_key(1).public().clone()])
            .unwrap_err();
        assert!(matches!(err, Error::MissingKeyMaterial(_)));
    }

    #[test]
    fn test_decrypt_without_matching_key() {
        let (ed, _) = shared();
        assert!(decrypt(&ed, &[test_key(2).clone()]).unwrap().is_none());
        assert!(decrypt(&ed, &[test_key(2).clone(), test_key(1).clone()])
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_extend_access_is_idempotent() {
        let (ed, content) = shared();
        let new_key = test_key(2).public().clone();

        let extended = extend_access(&ed, &content, &[new_key.clone()])
            .unwrap()
            .unwrap();
        assert!(extended.fingerprints().contains(&new_key.fingerprint()));
        assert_eq!(
            extended.exchange_key[&test_key(1).fingerprint()],
            ed.exchange_key[&test_key(1).fingerprint()]
        );
        assert!(extend_access(&extended, &content, &[new_key]).unwrap().is_none());

        let verified = verify(
            &extended,
            &[test_key(2).clone()],
            &[test_key(0).public().clone()],
        )
        .unwrap();
        assert_eq!(
            verified.content().exchange_key.as_bytes(),
            content.exchange_key.as_bytes()
        );
    }

    #[test]
    fn test_debug_is_redacted() {
        let (_, content) = shared();
        let debug = format!("{:?}", content);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&hex::encode(content.exchange_key.as_bytes())));
    }
}
