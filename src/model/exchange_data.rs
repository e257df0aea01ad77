use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crypto::Fingerprint;

/// Key material shared from a delegator to a delegate
///
/// Every encrypted map holds one RSA-OAEP ciphertext (hex) per fingerprint
/// of either party, so both sides open it with their own private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeData {
    /// Exchange data id
    pub id: String,
    /// Revision for optimistic locking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Data owner sharing the keys
    pub delegator: String,
    /// Data owner receiving the keys
    pub delegate: String,
    /// Fingerprint → encrypted AES exchange key
    pub exchange_key: BTreeMap<Fingerprint, String>,
    /// Fingerprint → encrypted access control secret
    pub access_control_secret: BTreeMap<Fingerprint, String>,
    /// Fingerprint → encrypted HMAC key of the shared signature
    pub shared_signature_key: BTreeMap<Fingerprint, String>,
    /// Delegator fingerprint → RSA-PSS signature of the HMAC key (base64)
    #[serde(default)]
    pub delegator_signature: BTreeMap<Fingerprint, String>,
    /// HMAC over the decrypted content (base64)
    pub shared_signature: String,
    /// Revocation instant (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_date: Option<i64>,
}

impl ExchangeData {
    /// Whether a data owner is delegator or delegate
    pub fn involves(&self, data_owner_id: &str) -> bool {
        self.delegator == data_owner_id || self.delegate == data_owner_id
    }

    /// The other party, if `data_owner_id` is one of them
    pub fn counterpart_of(&self, data_owner_id: &str) -> Option<&str> {
        if self.delegator == data_owner_id {
            Some(&self.delegate)
        } else if self.delegate == data_owner_id {
            Some(&self.delegator)
        } else {
            None
        }
    }

    /// Fingerprints that can open every encrypted field
    pub fn fingerprints(&self) -> BTreeSet<Fingerprint> {
        self.exchange_key
            .keys()
            .filter(|fp| {
                self.access_control_secret.contains_key(*fp)
                    && self.shared_signature_key.contains_key(*fp)
            })
            .cloned()
            .collect()
    }

    /// Whether this exchange data has been revoked
    pub fn is_deleted(&self) -> bool {
        self.deletion_date.is_some()
    }
}

/// Anonymous index from an access control key hash to exchange data ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeDataMap {
    /// hex(sha256(accessControlKey))
    pub id: String,
    /// Revision for optimistic locking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Fingerprint → encrypted exchange data id (hex)
    #[serde(default)]
    pub encrypted_exchange_data_ids: BTreeMap<Fingerprint, String>,
}
