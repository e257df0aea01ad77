//! Secure delegations and exchange data map entries.
//!
//! An entity shared through exchange data carries a [`SecureDelegation`]
//! under the security metadata key derived from the exchange data secrets.
//! Anonymous delegations leave out both parties; the delegate then finds
//! the exchange data through the map entry instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::protocol::DecryptedExchangeData;
use crate::crypto::{
    exchange_data_map_id, security_metadata_key, Confidentiality, Fingerprint, RsaEncryptionKey,
};
use crate::error::Result;

/// Permissions granted by a delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessLevel {
    /// Read only
    Read,
    /// Read and write
    Write,
}

/// Delegation metadata stored on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureDelegation {
    /// Sharing data owner, absent when anonymous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegator: Option<String>,
    /// Receiving data owner, absent when anonymous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<String>,
    /// Exchange data holding the keys, absent when anonymous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_data_id: Option<String>,
    /// Granted permissions
    pub permissions: AccessLevel,
}

impl SecureDelegation {
    /// Whether the delegation hides its parties
    pub fn is_anonymous(&self) -> bool {
        self.delegator.is_none() && self.delegate.is_none()
    }
}

/// Delegation for an entity shared through some exchange data
///
/// Returns the security metadata key with the delegation to store under it.
pub fn secure_delegation(
    content: &DecryptedExchangeData,
    entity_class: &str,
    confidentiality: Confidentiality,
    permissions: AccessLevel,
    anonymous: bool,
) -> (String, SecureDelegation) {
    let key = security_metadata_key(&content.access_control_key(entity_class, confidentiality));
    let delegation = if anonymous {
        SecureDelegation {
            delegator: None,
            delegate: None,
            exchange_data_id: None,
            permissions,
        }
    } else {
        SecureDelegation {
            delegator: Some(content.delegator.clone()),
            delegate: Some(content.delegate.clone()),
            exchange_data_id: Some(content.exchange_data_id.clone()),
            permissions,
        }
    };
    (key, delegation)
}

/// Map entry locating some exchange data from an access control key
///
/// The exchange data id is encrypted for each key, so only the parties can
/// read where the map points.
pub fn exchange_data_map_entry(
    content: &DecryptedExchangeData,
    entity_class: &str,
    confidentiality: Confidentiality,
    keys: &[RsaEncryptionKey],
) -> Result<(String, BTreeMap<Fingerprint, String>)> {
    let id = exchange_data_map_id(&content.access_control_key(entity_class, confidentiality));
    let encrypted_ids = keys
        .iter()
        .map(|key| {
            let ciphertext = key.encrypt(content.exchange_data_id.as_bytes())?;
            Ok((key.fingerprint(), hex::encode(ciphertext)))
        })
        .collect::<Result<_>>()?;
    Ok((id, encrypted_ids))
}
