//! # Key Hierarchy
//!
//! Resolves the key pairs of the current data owner and its parents.
//!
//! ## Resolution
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      KEY HIERARCHY RESOLUTION                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. self ──parentId──► parent ──parentId──► root                       │
//! │     levels are ordered root, ..., immediate parent, self               │
//! │                                                                         │
//! │  2. per level: published fingerprints                                  │
//! │       ├── private key in key storage ──► available                     │
//! │       ├── no private key             ──► unavailable                   │
//! │       └── never judged               ──► unknown                       │
//! │                                                                         │
//! │  3. Shamir notaries, for unavailable keys with a partition             │
//! │                                                                         │
//! │  4. some level has no available key?                                   │
//! │       └── CryptoStrategies::recover_and_verify_self_hierarchy_keys     │
//! │           (once, for the whole chain)                                   │
//! │                                                                         │
//! │  5. self still has no key?                                             │
//! │       └── CryptoStrategies::generate_new_key_for_data_owner            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Recovery always runs before generation: a key generated first would
//! leave everything encrypted for the lost key unreachable.
//!
//! Every await between levels is a cancellation point; nothing is written
//! until a level has been fully decided.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use super::recoverer::KeyPairRecoverer;
use super::strategies::{CryptoStrategies, KeyGenerationDecision, KeyHierarchyLevelInfo};
use crate::api::DataOwnerApi;
use crate::cache::AsyncCache;
use crate::crypto::{Fingerprint, RsaEncryptionKey, RsaKeyPair, ShaVersion};
use crate::error::{Error, Result};
use crate::model::DataOwner;
use crate::storage::KeyStore;

/// A private key of the hierarchy with its authenticity
#[derive(Debug, Clone)]
pub struct HierarchyKeyPair {
    /// The key pair
    pub key_pair: RsaKeyPair,
    /// Whether the public key is trusted as the data owner's own
    pub verified: bool,
}

/// Keys of one data owner of the hierarchy
#[derive(Debug, Clone)]
pub struct KeyHierarchyLevel {
    /// The data owner
    pub data_owner: DataOwner,
    /// Private keys held for it
    pub key_pairs: BTreeMap<Fingerprint, HierarchyKeyPair>,
    /// Published keys trusted for encryption, with or without private key
    pub verified_public_keys: Vec<RsaEncryptionKey>,
}

impl KeyHierarchyLevel {
    /// Held key pairs whose public key is trusted
    pub fn verified_key_pairs(&self) -> impl Iterator<Item = &RsaKeyPair> {
        self.key_pairs
            .values()
            .filter(|k| k.verified)
            .map(|k| &k.key_pair)
    }
}

/// Resolved keys of the current data owner and its parents
#[derive(Debug, Clone)]
pub struct KeyHierarchy {
    parents: Vec<KeyHierarchyLevel>,
    current: KeyHierarchyLevel,
    generated_key: Option<RsaEncryptionKey>,
}

impl KeyHierarchy {
    /// The current data owner's level
    pub fn self_level(&self) -> &KeyHierarchyLevel {
        &self.current
    }

    /// Parent levels, root first
    pub fn parents(&self) -> &[KeyHierarchyLevel] {
        &self.parents
    }

    /// Every level, root first and self last
    pub fn levels(&self) -> impl Iterator<Item = &KeyHierarchyLevel> {
        self.parents.iter().chain(std::iter::once(&self.current))
    }

    /// Every held key pair, self first
    ///
    /// Descendants can read what was shared with their parents.
    pub fn all_key_pairs(&self) -> Vec<RsaKeyPair> {
        std::iter::once(&self.current)
            .chain(self.parents.iter().rev())
            .flat_map(|level| level.key_pairs.values().map(|k| k.key_pair.clone()))
            .collect()
    }

    /// Key generated during this resolution, if any
    pub fn generated_key(&self) -> Option<&RsaEncryptionKey> {
        self.generated_key.as_ref()
    }
}

/// Level state while resolving
struct PendingLevel {
    data_owner: DataOwner,
    published: BTreeMap<Fingerprint, (String, ShaVersion)>,
    judgments: BTreeMap<Fingerprint, bool>,
    key_pairs: BTreeMap<Fingerprint, RsaKeyPair>,
}

impl PendingLevel {
    fn unavailable(&self) -> Vec<Fingerprint> {
        self.published
            .keys()
            .filter(|fp| !self.key_pairs.contains_key(*fp))
            .cloned()
            .collect()
    }

    fn unknown(&self) -> Vec<Fingerprint> {
        self.published
            .keys()
            .filter(|fp| !self.judgments.contains_key(*fp) && !self.key_pairs.contains_key(*fp))
            .cloned()
            .collect()
    }

    fn info(&self) -> KeyHierarchyLevelInfo {
        KeyHierarchyLevelInfo {
            data_owner: self.data_owner.clone(),
            unknown_keys: self.unknown(),
            unavailable_keys: self.unavailable(),
        }
    }

    /// Held keys count as authentic unless judged otherwise
    fn into_level(self) -> Result<KeyHierarchyLevel> {
        let is_verified = |fp: &str| match self.judgments.get(fp) {
            Some(judgment) => *judgment,
            None => self.key_pairs.contains_key(fp),
        };

        let verified_public_keys = self
            .published
            .iter()
            .filter(|(fp, _)| is_verified(fp))
            .map(|(_, (spki_hex, version))| RsaEncryptionKey::from_spki_hex(spki_hex, *version))
            .collect::<Result<Vec<_>>>()?;
        let key_pairs = self
            .key_pairs
            .iter()
            .map(|(fp, kp)| {
                let entry = HierarchyKeyPair {
                    key_pair: kp.clone(),
                    verified: is_verified(fp),
                };
                (fp.clone(), entry)
            })
            .collect();

        Ok(KeyHierarchyLevel {
            data_owner: self.data_owner,
            key_pairs,
            verified_public_keys,
        })
    }
}

/// Everything a resolution needs, shared with the cache loader
struct HierarchyResolver {
    self_id: String,
    data_owners: Arc<dyn DataOwnerApi>,
    key_store: KeyStore,
    strategies: Arc<dyn CryptoStrategies>,
    recoverer: KeyPairRecoverer,
    key_size_bits: usize,
}

impl HierarchyResolver {
    async fn load_chain(&self) -> Result<Vec<DataOwner>> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        let mut next = Some(self.self_id.clone());

        while let Some(id) = next {
            if !visited.insert(id.clone()) {
                return Err(Error::Internal(format!("parent chain of {} loops at {}", self.self_id, id)));
            }
            let data_owner = self.data_owners.get_data_owner(&id).await?;
            next = data_owner.parent_id.clone();
            chain.push(data_owner);
        }
        chain.reverse();
        Ok(chain)
    }

    async fn load_level(&self, data_owner: DataOwner) -> Result<PendingLevel> {
        let published = data_owner.fingerprints()?;
        let judgments = self.key_store.verified_keys(&data_owner.id).await?;
        let mut key_pairs = BTreeMap::new();
        for fingerprint in published.keys() {
            if let Some(key_pair) = self.key_store.load_key_pair(&data_owner.id, fingerprint).await? {
                key_pairs.insert(fingerprint.clone(), key_pair);
            }
        }
        Ok(PendingLevel {
            data_owner,
            published,
            judgments,
            key_pairs,
        })
    }

    async fn store_recovered(&self, level: &mut PendingLevel, key_pair: RsaKeyPair) -> Result<()> {
        let fingerprint = key_pair.fingerprint();
        if !level.published.contains_key(&fingerprint) || level.key_pairs.contains_key(&fingerprint) {
            return Ok(());
        }
        self.key_store
            .store_recovered_key_pair(&level.data_owner.id, &key_pair)
            .await?;
        level.key_pairs.insert(fingerprint, key_pair);
        Ok(())
    }

    async fn resolve(&self) -> Result<KeyHierarchy> {
        let mut levels = Vec::new();
        for data_owner in self.load_chain().await? {
            levels.push(self.load_level(data_owner).await?);
        }

        // Notaries first, they need no caller interaction
        for index in 0..levels.len() {
            if levels[index].data_owner.private_key_shamir_partitions.is_empty()
                || levels[index].unavailable().is_empty()
            {
                continue;
            }
            let available: Vec<RsaKeyPair> = levels
                .iter()
                .flat_map(|l| l.key_pairs.values().cloned())
                .collect();
            let recovered = self
                .recoverer
                .recover_with_shamir(&levels[index].data_owner, &available)
                .await?;
            for key_pair in recovered.into_values() {
                self.store_recovered(&mut levels[index], key_pair).await?;
            }
        }

        if levels.iter().any(|l| l.key_pairs.is_empty()) {
            let infos: Vec<KeyHierarchyLevelInfo> = levels.iter().map(PendingLevel::info).collect();
            debug!("Asking strategies to recover keys of {} levels", infos.len());
            let mut decisions = self
                .strategies
                .recover_and_verify_self_hierarchy_keys(&infos)
                .await?;

            for level in levels.iter_mut() {
                let Some(data) = decisions.remove(&level.data_owner.id) else {
                    continue;
                };
                for (fingerprint, key_pair) in data.recovered_keys {
                    if key_pair.fingerprint() == fingerprint {
                        self.store_recovered(level, key_pair).await?;
                    }
                }
                self.key_store
                    .record_verified_keys(&level.data_owner.id, &data.key_authenticity)
                    .await?;
                level.judgments.extend(data.key_authenticity);
            }
        }

        let mut current = levels
            .pop()
            .ok_or_else(|| Error::Internal("empty key hierarchy".into()))?;
        let generated_key = if current.key_pairs.is_empty() {
            Some(self.generate_key(&mut current).await?)
        } else {
            None
        };

        Ok(KeyHierarchy {
            parents: levels
                .into_iter()
                .map(PendingLevel::into_level)
                .collect::<Result<_>>()?,
            current: current.into_level()?,
            generated_key,
        })
    }

    async fn generate_key(&self, level: &mut PendingLevel) -> Result<RsaEncryptionKey> {
        let key_pair = match self
            .strategies
            .generate_new_key_for_data_owner(&level.data_owner)
            .await?
        {
            KeyGenerationDecision::Generate => {
                RsaKeyPair::generate(self.key_size_bits, ShaVersion::Sha256)?
            }
            KeyGenerationDecision::UseKeyPair(key_pair) => key_pair,
            KeyGenerationDecision::Refuse => return Err(Error::NoUsableKey(self.self_id.clone())),
        };
        let fingerprint = key_pair.fingerprint();
        info!("New key {} for data owner {}", fingerprint, self.self_id);

        self.key_store
            .store_device_key_pair(&level.data_owner.id, &key_pair)
            .await?;
        let mut data_owner = level.data_owner.clone();
        data_owner.add_public_key(key_pair.public());
        level.data_owner = self.data_owners.modify_data_owner(&data_owner).await?;

        let judgment: BTreeMap<Fingerprint, bool> = [(fingerprint.clone(), true)].into_iter().collect();
        self.key_store
            .record_verified_keys(&level.data_owner.id, &judgment)
            .await?;
        level.judgments.extend(judgment);
        level.published.insert(
            fingerprint.clone(),
            (key_pair.public().spki_hex(), key_pair.sha_version()),
        );

        let public = key_pair.public().clone();
        level.key_pairs.insert(fingerprint, key_pair);
        Ok(public)
    }
}

/// Cached access to the key hierarchy of the current data owner
#[derive(Clone)]
pub struct KeyHierarchyManager {
    resolver: Arc<HierarchyResolver>,
    cache: AsyncCache<(), Arc<KeyHierarchy>>,
}

impl KeyHierarchyManager {
    /// Create a manager for `self_id`
    pub fn new(
        self_id: impl Into<String>,
        data_owners: Arc<dyn DataOwnerApi>,
        key_store: KeyStore,
        strategies: Arc<dyn CryptoStrategies>,
        recoverer: KeyPairRecoverer,
        key_size_bits: usize,
    ) -> Self {
        Self {
            resolver: Arc::new(HierarchyResolver {
                self_id: self_id.into(),
                data_owners,
                key_store,
                strategies,
                recoverer,
                key_size_bits,
            }),
            cache: AsyncCache::permanent(1),
        }
    }

    /// Id of the current data owner
    pub fn self_id(&self) -> &str {
        &self.resolver.self_id
    }

    /// The injected strategies
    pub fn strategies(&self) -> &Arc<dyn CryptoStrategies> {
        &self.resolver.strategies
    }

    /// Key pairs of the current data owner and its parents
    ///
    /// Resolved once and cached; concurrent callers share the resolution.
    pub async fn get_encryption_decryption_keypairs_for_data_owner_hierarchy(
        &self,
    ) -> Result<Arc<KeyHierarchy>> {
        let resolver = Arc::clone(&self.resolver);
        self.cache
            .get((), move || async move { resolver.resolve().await.map(Arc::new) })
            .await
    }

    /// Forget the cached hierarchy, for instance after a key was recovered
    pub fn reload(&self) {
        self.cache.invalidate(&());
    }

    /// Keys of a delegate the current data owner may encrypt for
    pub async fn verified_delegate_keys(&self, delegate: &DataOwner) -> Result<Vec<RsaEncryptionKey>> {
        let published = delegate.encryption_keys()?;
        self.resolver
            .strategies
            .verify_delegate_public_keys(delegate, &published)
            .await
    }

    /// Store a recovered key pair of a hierarchy member and re-resolve
    pub async fn add_recovered_key_pair(&self, data_owner_id: &str, key_pair: &RsaKeyPair) -> Result<()> {
        self.resolver
            .key_store
            .store_recovered_key_pair(data_owner_id, key_pair)
            .await?;
        self.reload();
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
