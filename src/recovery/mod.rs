//! # Recovery
//!
//! Ways for a data owner to get back what a lost private key used to open.
//!
//! ## Recovery Blobs
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RECOVERY BLOB                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  recovery key   32 random bytes, handed to the user as hex             │
//! │        │                                                                │
//! │        ├── sha256 ──► blob id                                          │
//! │        └── AES-256-GCM key ──► encryptedSelf (payload JSON)            │
//! │                                                                         │
//! │  The backend only ever sees the id and the ciphertext.                 │
//! │  A blob is deleted once consumed.                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shamir Notaries
//!
//! [`ShamirKeysManager`] splits a private key between notaries; the
//! [`KeyPairRecoverer`](crate::keys::KeyPairRecoverer) puts it back together
//! once enough notaries gave the new key access to their exchange data.

mod manager;
mod shamir;

pub use manager::RecoveryManager;
pub use shamir::ShamirKeysManager;

use std::collections::BTreeMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::api::RecoveryDataApi;
use crate::crypto::{
    open, random_bytes, seal, sha256_digest, EncryptionKey, Fingerprint, Jwk, KeyPair, RsaKeyPair,
    KEY_SIZE,
};
use crate::error::Result;
use crate::model::{RecoveryData, RecoveryDataType};
use crate::time::expiration_after;

/// Why a recovery key could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDataUseFailureReason {
    /// No blob for this key, or it expired
    Missing,
    /// The blob holds another kind of payload
    InvalidType,
    /// The blob could not be decrypted or parsed
    InvalidContent,
}

/// Outcome of consuming a recovery key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryResult<T> {
    /// The payload
    Success(T),
    /// Nothing usable behind the key
    Failure(RecoveryDataUseFailureReason),
}

impl<T> RecoveryResult<T> {
    /// The payload, if any
    pub fn success(self) -> Option<T> {
        match self {
            RecoveryResult::Success(value) => Some(value),
            RecoveryResult::Failure(_) => None,
        }
    }

    /// Transform the payload
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RecoveryResult<U> {
        match self {
            RecoveryResult::Success(value) => RecoveryResult::Success(f(value)),
            RecoveryResult::Failure(reason) => RecoveryResult::Failure(reason),
        }
    }
}

/// Data owner id → fingerprint → recovered key pair
pub type RecoveredKeyPairs = BTreeMap<String, BTreeMap<Fingerprint, RsaKeyPair>>;

/// Wire payload of a key pair recovery blob
type KeyPairPayload = BTreeMap<String, BTreeMap<Fingerprint, KeyPair<Jwk>>>;

/// Id of the blob a recovery key opens
fn blob_id(recovery_key: &[u8]) -> String {
    hex::encode(sha256_digest(recovery_key))
}

/// Encrypt a payload into a new blob, returning the recovery key (hex)
pub(crate) async fn store_recovery_payload<T: Serialize>(
    api: &dyn RecoveryDataApi,
    recipient: &str,
    data_type: RecoveryDataType,
    payload: &T,
    lifetime: Option<Duration>,
) -> Result<String> {
    let key_bytes = Zeroizing::new(random_bytes::<KEY_SIZE>());
    let key = EncryptionKey::from_bytes(*key_bytes);
    let json = Zeroizing::new(serde_json::to_vec(payload)?);
    let sealed = seal(&key, &json, recipient.as_bytes())?;

    let data = RecoveryData {
        id: blob_id(&*key_bytes),
        rev: None,
        recipient: recipient.to_string(),
        encrypted_self: BASE64.encode(sealed),
        data_type,
        expiration_instant: lifetime.map(expiration_after),
    };
    api.create_recovery_data(&data).await?;
    debug!("Stored {:?} recovery data for {}", data_type, recipient);
    Ok(hex::encode(&*key_bytes))
}

/// A blob opened with its recovery key, still stored on the backend
pub(crate) struct OpenedRecovery<T> {
    /// Blob id, for deleting it once used
    pub(crate) id: String,
    /// What the blob holds
    pub(crate) outcome: RecoveryResult<T>,
}

/// Open the blob behind a recovery key without deleting it
///
/// `decode` turns the payload into its final form; a `None` from it is
/// reported as invalid content. `None` when there is no blob for the key.
pub(crate) async fn read_recovery_payload<T, U>(
    api: &dyn RecoveryDataApi,
    recovery_key: &str,
    expected_type: RecoveryDataType,
    decode: impl FnOnce(T) -> Option<U>,
) -> Result<Option<OpenedRecovery<U>>>
where
    T: DeserializeOwned,
{
    let Ok(key_bytes) = hex::decode(recovery_key).map(Zeroizing::new) else {
        return Ok(None);
    };
    let id = blob_id(&key_bytes);
    let Some(data) = api.get_recovery_data(&id).await? else {
        return Ok(None);
    };

    let outcome = if data.data_type != expected_type {
        RecoveryResult::Failure(RecoveryDataUseFailureReason::InvalidType)
    } else {
        match open_payload::<T>(&key_bytes, &data).and_then(decode) {
            Some(payload) => RecoveryResult::Success(payload),
            None => RecoveryResult::Failure(RecoveryDataUseFailureReason::InvalidContent),
        }
    };
    if let RecoveryResult::Failure(reason) = &outcome {
        warn!("Recovery data {} unusable: {:?}", id, reason);
    }
    Ok(Some(OpenedRecovery { id, outcome }))
}

/// Open and delete the blob behind a recovery key
///
/// The blob is deleted on success, and on failure too when
/// `consume_on_failure_too` is set. A missing blob is never an error.
pub(crate) async fn consume_recovery_payload<T, U>(
    api: &dyn RecoveryDataApi,
    recovery_key: &str,
    expected_type: RecoveryDataType,
    consume_on_failure_too: bool,
    decode: impl FnOnce(T) -> Option<U>,
) -> Result<RecoveryResult<U>>
where
    T: DeserializeOwned,
{
    let Some(opened) = read_recovery_payload(api, recovery_key, expected_type, decode).await? else {
        return Ok(RecoveryResult::Failure(RecoveryDataUseFailureReason::Missing));
    };
    if matches!(opened.outcome, RecoveryResult::Success(_)) || consume_on_failure_too {
        api.delete_recovery_data(&opened.id).await?;
    }
    Ok(opened.outcome)
}

fn open_payload<T: DeserializeOwned>(key_bytes: &[u8], data: &RecoveryData) -> Option<T> {
    let key = EncryptionKey::from_slice(key_bytes).ok()?;
    let sealed = BASE64.decode(&data.encrypted_self).ok()?;
    let json = Zeroizing::new(open(&key, &sealed, data.recipient.as_bytes()).ok()?);
    serde_json::from_slice(&json).ok()
}

/// Consume a key pair recovery blob
///
/// Key pairs are rebuilt and checked against their fingerprints before the
/// blob is deleted.
pub(crate) async fn consume_key_pair_recovery(
    api: &dyn RecoveryDataApi,
    recovery_key: &str,
    consume_on_failure_too: bool,
) -> Result<RecoveryResult<RecoveredKeyPairs>> {
    consume_recovery_payload(
        api,
        recovery_key,
        RecoveryDataType::KeypairRecovery,
        consume_on_failure_too,
        key_pairs_from_payload,
    )
    .await
}

fn key_pairs_from_payload(payload: KeyPairPayload) -> Option<RecoveredKeyPairs> {
    payload
        .into_iter()
        .map(|(data_owner_id, pairs)| {
            let pairs = pairs
                .into_iter()
                .map(|(fingerprint, pair)| {
                    let key_pair = RsaKeyPair::from_jwk_pair(&pair).ok()?;
                    (key_pair.fingerprint() == fingerprint).then_some((fingerprint, key_pair))
                })
                .collect::<Option<BTreeMap<_, _>>>()?;
            Some((data_owner_id, pairs))
        })
        .collect()
}

fn key_pairs_to_payload<'a>(
    key_pairs: impl IntoIterator<Item = (&'a str, &'a RsaKeyPair)>,
) -> Result<KeyPairPayload> {
    let mut payload = KeyPairPayload::new();
    for (data_owner_id, key_pair) in key_pairs {
        payload
            .entry(data_owner_id.to_string())
            .or_default()
            .insert(key_pair.fingerprint(), key_pair.to_jwk_pair()?);
    }
    Ok(payload)
}
