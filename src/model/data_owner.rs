use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crypto::{fingerprint_of_spki, Fingerprint, RsaEncryptionKey, ShaVersion};
use crate::error::{Error, Result};

/// Kind of data owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOwnerType {
    /// Healthcare party
    Hcp,
    /// Patient
    Patient,
    /// Medical device
    Device,
}

/// Shamir split of one private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShamirPartition {
    /// Shares needed to rebuild the key
    pub threshold: usize,
    /// Notary id → share encrypted with the exchange key self → notary (hex)
    pub notaries: BTreeMap<String, String>,
}

/// An actor that holds key pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataOwner {
    /// Data owner id
    pub id: String,
    /// Revision for optimistic locking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Kind of data owner
    #[serde(rename = "type")]
    pub owner_type: DataOwnerType,
    /// Parent in the hierarchy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Legacy (`sha-1`) public keys, hex SPKI
    #[serde(default)]
    pub public_keys: BTreeSet<String>,
    /// `sha-256` public keys, hex SPKI
    #[serde(default)]
    pub public_keys_for_oaep_with_sha256: BTreeSet<String>,
    /// Fingerprint → Shamir split of the matching private key
    #[serde(default)]
    pub private_key_shamir_partitions: BTreeMap<Fingerprint, ShamirPartition>,
}

impl DataOwner {
    /// A data owner without keys
    pub fn new(id: impl Into<String>, owner_type: DataOwnerType) -> Self {
        Self {
            id: id.into(),
            rev: None,
            owner_type,
            parent_id: None,
            public_keys: BTreeSet::new(),
            public_keys_for_oaep_with_sha256: BTreeSet::new(),
            private_key_shamir_partitions: BTreeMap::new(),
        }
    }

    /// Same data owner under a parent
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Every published key with its version
    pub fn public_keys_with_version(&self) -> impl Iterator<Item = (&str, ShaVersion)> {
        self.public_keys
            .iter()
            .map(|k| (k.as_str(), ShaVersion::Sha1))
            .chain(
                self.public_keys_for_oaep_with_sha256
                    .iter()
                    .map(|k| (k.as_str(), ShaVersion::Sha256)),
            )
    }

    /// Fingerprint → hex SPKI of every published key
    pub fn fingerprints(&self) -> Result<BTreeMap<Fingerprint, (String, ShaVersion)>> {
        self.public_keys_with_version()
            .map(|(spki_hex, version)| {
                let spki = hex::decode(spki_hex).map_err(|e| {
                    Error::MalformedKeyMaterial(format!(
                        "public key of {} is not hex: {}",
                        self.id, e
                    ))
                })?;
                Ok((
                    fingerprint_of_spki(&spki, version),
                    (spki_hex.to_string(), version),
                ))
            })
            .collect()
    }

    /// Parse every published key
    pub fn encryption_keys(&self) -> Result<Vec<RsaEncryptionKey>> {
        self.public_keys_with_version()
            .map(|(spki_hex, version)| RsaEncryptionKey::from_spki_hex(spki_hex, version))
            .collect()
    }

    /// Whether a key is published on this data owner
    pub fn has_public_key(&self, spki_hex: &str) -> bool {
        self.public_keys.contains(spki_hex)
            || self.public_keys_for_oaep_with_sha256.contains(spki_hex)
    }

    /// Publish a key under its version
    pub fn add_public_key(&mut self, key: &RsaEncryptionKey) {
        match key.sha_version() {
            ShaVersion::Sha1 => self.public_keys.insert(key.spki_hex()),
            ShaVersion::Sha256 => self.public_keys_for_oaep_with_sha256.insert(key.spki_hex()),
        };
    }
}
