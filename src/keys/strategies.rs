//! Policy hooks for trust decisions and key generation.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::crypto::{Fingerprint, RsaEncryptionKey, RsaKeyPair};
use crate::error::Result;
use crate::model::{DataOwner, DataOwnerType};

/// Keys of one hierarchy level that need a decision
#[derive(Debug, Clone)]
pub struct KeyHierarchyLevelInfo {
    /// The data owner of this level
    pub data_owner: DataOwner,
    /// Published keys whose authenticity was never judged
    pub unknown_keys: Vec<Fingerprint>,
    /// Published keys without a private key on this device
    pub unavailable_keys: Vec<Fingerprint>,
}

/// What a strategy recovered and judged for one data owner
#[derive(Debug, Clone, Default)]
pub struct RecoveredKeyData {
    /// Private keys the strategy could recover
    pub recovered_keys: BTreeMap<Fingerprint, RsaKeyPair>,
    /// Authenticity judgment per fingerprint
    pub key_authenticity: BTreeMap<Fingerprint, bool>,
}

/// Answer to "this data owner has no key, make one?"
#[derive(Debug, Clone)]
pub enum KeyGenerationDecision {
    /// Generate a fresh key pair
    Generate,
    /// Use a key pair the caller already holds
    UseKeyPair(RsaKeyPair),
    /// Leave the data owner without a key
    Refuse,
}

/// Caller-supplied policy
///
/// Injected into the core; the core never decides on its own which keys
/// are trustworthy.
#[async_trait]
pub trait CryptoStrategies: Send + Sync {
    /// Recover missing keys and judge unknown keys of the whole hierarchy
    ///
    /// Called at most once per hierarchy resolution, with levels ordered
    /// from the root to the current data owner. The result is keyed by data
    /// owner id.
    async fn recover_and_verify_self_hierarchy_keys(
        &self,
        levels: &[KeyHierarchyLevelInfo],
    ) -> Result<BTreeMap<String, RecoveredKeyData>>;

    /// Decide whether a data owner without any key gets a new one
    ///
    /// Only called after recovery had its chance.
    async fn generate_new_key_for_data_owner(
        &self,
        data_owner: &DataOwner,
    ) -> Result<KeyGenerationDecision>;

    /// Keep the keys of a delegate the current data owner may encrypt for
    async fn verify_delegate_public_keys(
        &self,
        delegate: &DataOwner,
        public_keys: &[RsaEncryptionKey],
    ) -> Result<Vec<RsaEncryptionKey>>;

    /// Whether delegations involving this data owner must hide its id
    fn requires_anonymous_delegation(&self, data_owner: &DataOwner) -> bool;
}

/// Strategies that trust every published key
///
/// Key pairs handed to [`SimpleCryptoStrategies::with_recovered_key_pairs`]
/// are offered during recovery, for instance ones obtained through a
/// recovery key before the core started.
#[derive(Debug, Clone)]
pub struct SimpleCryptoStrategies {
    recovered: Vec<RsaKeyPair>,
    generate_missing_keys: bool,
}

impl SimpleCryptoStrategies {
    /// Trust everything and generate keys when missing
    pub fn new() -> Self {
        Self {
            recovered: Vec::new(),
            generate_missing_keys: true,
        }
    }

    /// Offer these key pairs during recovery
    pub fn with_recovered_key_pairs(mut self, key_pairs: Vec<RsaKeyPair>) -> Self {
        self.recovered = key_pairs;
        self
    }

    /// Refuse to generate keys
    pub fn without_key_generation(mut self) -> Self {
        self.generate_missing_keys = false;
        self
    }
}

impl Default for SimpleCryptoStrategies {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CryptoStrategies for SimpleCryptoStrategies {
    async fn recover_and_verify_self_hierarchy_keys(
        &self,
        levels: &[KeyHierarchyLevelInfo],
    ) -> Result<BTreeMap<String, RecoveredKeyData>> {
        Ok(levels
            .iter()
            .map(|level| {
                let recovered_keys = self
                    .recovered
                    .iter()
                    .filter(|kp| level.unavailable_keys.contains(&kp.fingerprint()))
                    .map(|kp| (kp.fingerprint(), kp.clone()))
                    .collect();
                let key_authenticity = level
                    .unknown_keys
                    .iter()
                    .map(|fp| (fp.clone(), true))
                    .collect();
                (
                    level.data_owner.id.clone(),
                    RecoveredKeyData {
                        recovered_keys,
                        key_authenticity,
                    },
                )
            })
            .collect())
    }

    async fn generate_new_key_for_data_owner(
        &self,
        _data_owner: &DataOwner,
    ) -> Result<KeyGenerationDecision> {
        Ok(if self.generate_missing_keys {
            KeyGenerationDecision::Generate
        } else {
            KeyGenerationDecision::Refuse
        })
    }

    async fn verify_delegate_public_keys(
        &self,
        _delegate: &DataOwner,
        public_keys: &[RsaEncryptionKey],
    ) -> Result<Vec<RsaEncryptionKey>> {
        Ok(public_keys.to_vec())
    }

    fn requires_anonymous_delegation(&self, data_owner: &DataOwner) -> bool {
        data_owner.owner_type != DataOwnerType::Hcp
    }
}
