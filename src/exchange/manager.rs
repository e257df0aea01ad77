//! Orchestration of exchange data for the current data owner.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::access_control::{exchange_data_map_entry, secure_delegation, AccessLevel, SecureDelegation};
use super::map::ExchangeDataDirectory;
use super::protocol::{create_exchange_data, extend_access, verify, VerifiedExchangeData};
use crate::api::{DataOwnerApi, ExchangeDataApi, ExchangeDataMapBatch};
use crate::cache::AsyncCache;
use crate::crypto::{Confidentiality, RsaEncryptionKey, RsaKeyPair};
use crate::error::{Error, Result};
use crate::keys::{KeyHierarchy, KeyHierarchyManager};
use crate::model::{DataOwner, ExchangeData};
use crate::storage::KeyStore;
use crate::CoreConfig;

/// Result of sharing an entity with a delegate
#[derive(Debug, Clone)]
pub struct SharedAccess {
    /// Key to store the delegation under on the entity
    pub security_metadata_key: String,
    /// The delegation
    pub delegation: SecureDelegation,
    /// Exchange data holding the keys
    pub exchange_data_id: String,
}

struct ManagerInner {
    hierarchy: KeyHierarchyManager,
    data_owners: Arc<dyn DataOwnerApi>,
    api: Arc<dyn ExchangeDataApi>,
    directory: ExchangeDataDirectory,
    key_store: KeyStore,
    page_size: usize,
    data_owner_cache: AsyncCache<String, DataOwner>,
    to_delegate: AsyncCache<String, VerifiedExchangeData>,
    by_id: AsyncCache<String, VerifiedExchangeData>,
}

/// Creates, finds and extends the exchange data of the current data owner
///
/// Decrypted exchange data is cached for a limited time, so a revoked or
/// extended record is picked up without restarting.
#[derive(Clone)]
pub struct ExchangeDataManager {
    inner: Arc<ManagerInner>,
}

impl ExchangeDataManager {
    /// Create a manager
    pub fn new(
        hierarchy: KeyHierarchyManager,
        data_owners: Arc<dyn DataOwnerApi>,
        api: Arc<dyn ExchangeDataApi>,
        directory: ExchangeDataDirectory,
        key_store: KeyStore,
        config: &CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                hierarchy,
                data_owners,
                api,
                directory,
                key_store,
                page_size: config.page_size,
                data_owner_cache: AsyncCache::with_ttl(
                    config.data_owner_cache_size,
                    config.data_owner_ttl(),
                ),
                to_delegate: AsyncCache::with_ttl(
                    config.exchange_data_cache_size,
                    config.exchange_data_ttl(),
                ),
                by_id: AsyncCache::with_ttl(
                    config.exchange_data_cache_size,
                    config.exchange_data_ttl(),
                ),
            }),
        }
    }

    /// Exchange data from the current data owner to `delegate_id`
    ///
    /// Reuses a valid existing record and only creates one when none
    /// verifies.
    pub async fn get_or_create_encryption_data_to(
        &self,
        delegate_id: &str,
    ) -> Result<VerifiedExchangeData> {
        let inner = Arc::clone(&self.inner);
        let delegate = delegate_id.to_string();
        self.inner
            .to_delegate
            .get(delegate_id.to_string(), move || async move {
                inner.load_or_create_to(&delegate).await
            })
            .await
    }

    /// Share an entity class with a delegate
    ///
    /// Publishes the exchange data map entry when the delegation is
    /// anonymous, so the delegate can still find the keys.
    pub async fn share_with(
        &self,
        delegate_id: &str,
        entity_class: &str,
        confidentiality: Confidentiality,
        permissions: AccessLevel,
    ) -> Result<SharedAccess> {
        let verified = self.get_or_create_encryption_data_to(delegate_id).await?;
        let hierarchy = self.inner.hierarchy_keys().await?;
        let delegate = self.inner.data_owner(delegate_id, &hierarchy).await?;

        let strategies = self.inner.hierarchy.strategies();
        let anonymous = strategies.requires_anonymous_delegation(&hierarchy.self_level().data_owner)
            || strategies.requires_anonymous_delegation(&delegate);
        let (security_metadata_key, delegation) = secure_delegation(
            verified.content(),
            entity_class,
            confidentiality,
            permissions,
            anonymous,
        );

        if anonymous {
            let mut keys = hierarchy.self_level().verified_public_keys.clone();
            keys.extend(self.inner.hierarchy.verified_delegate_keys(&delegate).await?);
            let (map_id, encrypted_ids) =
                exchange_data_map_entry(verified.content(), entity_class, confidentiality, &keys)?;
            let batch: ExchangeDataMapBatch = [(map_id, encrypted_ids)].into_iter().collect();
            self.inner.directory.create_exchange_data_maps(batch).await?;
        }

        Ok(SharedAccess {
            security_metadata_key,
            delegation,
            exchange_data_id: verified.exchange_data().id.clone(),
        })
    }

    /// Decrypt and verify exchange data by id
    ///
    /// `None` when it does not exist or no key of the hierarchy opens it.
    pub async fn decrypt_exchange_data_by_id(&self, id: &str) -> Result<Option<VerifiedExchangeData>> {
        let inner = Arc::clone(&self.inner);
        let owned_id = id.to_string();
        let loaded = self
            .inner
            .by_id
            .get(id.to_string(), move || async move { inner.load_by_id(&owned_id).await })
            .await;
        match loaded {
            Ok(verified) => Ok(Some(verified)),
            Err(Error::ExchangeDataNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Exchange data reachable through exchange data maps
    ///
    /// Map ids equal security metadata keys, so a delegate can go from an
    /// anonymous delegation straight to its keys.
    pub async fn decrypt_exchange_data_by_map_ids(
        &self,
        map_ids: &[String],
    ) -> Result<Vec<VerifiedExchangeData>> {
        let maps = self.inner.directory.get_exchange_data_map_batch(map_ids).await?;
        let key_pairs = self.inner.hierarchy_keys().await?.all_key_pairs();

        let mut found = Vec::new();
        for map in maps {
            let Some(exchange_data_id) = open_map_entry(&map.encrypted_exchange_data_ids, &key_pairs)
            else {
                debug!("No key opens exchange data map {}", map.id);
                continue;
            };
            if let Some(verified) = self.decrypt_exchange_data_by_id(&exchange_data_id).await? {
                found.push(verified);
            }
        }
        Ok(found)
    }

    /// Give a new key of `data_owner_id` access to the exchange data it
    /// shares with the current data owner
    ///
    /// Pages through every record involving `data_owner_id`. Each record is
    /// written on its own, so an interrupted run can simply be repeated.
    /// Returns how many records were extended.
    pub async fn give_access_back_to(
        &self,
        data_owner_id: &str,
        new_key: &RsaEncryptionKey,
    ) -> Result<usize> {
        let hierarchy = self.inner.hierarchy_keys().await?;
        let key_pairs = hierarchy.all_key_pairs();
        let self_id = self.inner.hierarchy.self_id().to_string();

        let mut extended = 0;
        let mut start_key: Option<String> = None;
        loop {
            let page = self
                .inner
                .api
                .get_exchange_data_by_participant(data_owner_id, start_key.as_deref(), self.inner.page_size)
                .await?;

            for exchange_data in page.rows {
                if exchange_data.is_deleted()
                    || !(exchange_data.involves(&self_id) || data_owner_id == self_id)
                {
                    continue;
                }
                if self
                    .inner
                    .extend_one(&exchange_data, &key_pairs, &hierarchy, new_key)
                    .await?
                {
                    extended += 1;
                }
            }

            match page.next_key {
                Some(next) => start_key = Some(next),
                None => break,
            }
        }

        info!(
            "Gave key {} of {} access to {} exchange data",
            new_key.fingerprint(),
            data_owner_id,
            extended
        );
        Ok(extended)
    }

    /// Drop every cached exchange data and data owner
    pub fn clear_caches(&self) {
        self.inner.to_delegate.clear();
        self.inner.by_id.clear();
        self.inner.data_owner_cache.clear();
    }
}

impl ManagerInner {
    async fn hierarchy_keys(&self) -> Result<Arc<KeyHierarchy>> {
        self.hierarchy
            .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
            .await
    }

    /// Current data owner from the hierarchy, others through the cache
    async fn data_owner(&self, id: &str, hierarchy: &KeyHierarchy) -> Result<DataOwner> {
        if let Some(level) = hierarchy.levels().find(|l| l.data_owner.id == id) {
            return Ok(level.data_owner.clone());
        }
        let api = Arc::clone(&self.data_owners);
        let owned_id = id.to_string();
        self.data_owner_cache
            .get(id.to_string(), move || async move { api.get_data_owner(&owned_id).await })
            .await
    }

    /// Public keys able to check signatures of `delegator`
    async fn delegator_verification_keys(
        &self,
        exchange_data: &ExchangeData,
        hierarchy: &KeyHierarchy,
    ) -> Result<Vec<RsaEncryptionKey>> {
        let delegator = self.data_owner(&exchange_data.delegator, hierarchy).await?;
        let mut keys = delegator.encryption_keys()?;
        for fingerprint in exchange_data.delegator_signature.keys() {
            if keys.iter().any(|k| &k.fingerprint() == fingerprint) {
                continue;
            }
            if let Some(key) = self
                .key_store
                .signature_verification_key(&delegator.id, fingerprint)
                .await?
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn verify_with_hierarchy(
        &self,
        exchange_data: &ExchangeData,
        key_pairs: &[RsaKeyPair],
        hierarchy: &KeyHierarchy,
    ) -> Result<VerifiedExchangeData> {
        let verification_keys = self.delegator_verification_keys(exchange_data, hierarchy).await?;
        verify(exchange_data, key_pairs, &verification_keys)
    }

    async fn load_or_create_to(&self, delegate_id: &str) -> Result<VerifiedExchangeData> {
        let hierarchy = self.hierarchy_keys().await?;
        let self_level = hierarchy.self_level();
        let self_id = self_level.data_owner.id.clone();
        let key_pairs = hierarchy.all_key_pairs();

        let existing = self
            .api
            .get_exchange_data_by_delegator_delegate(&self_id, delegate_id)
            .await?;
        for exchange_data in existing.iter().filter(|ed| !ed.is_deleted()) {
            match self.verify_with_hierarchy(exchange_data, &key_pairs, &hierarchy).await {
                Ok(verified) => {
                    return self
                        .with_self_keys(verified, &self_level.verified_public_keys)
                        .await
                }
                Err(e) if e.is_untrusted_data() => {
                    warn!("Ignoring exchange data {}: {}", exchange_data.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        let delegate = self.data_owner(delegate_id, &hierarchy).await?;
        let mut encryption_keys = self_level.verified_public_keys.clone();
        encryption_keys.extend(self.hierarchy.verified_delegate_keys(&delegate).await?);
        let signing_keys: Vec<RsaKeyPair> = self_level.verified_key_pairs().cloned().collect();

        let (exchange_data, content) =
            create_exchange_data(&self_id, delegate_id, &signing_keys, &encryption_keys)?;
        let created = self.api.create_exchange_data(&exchange_data).await?;
        for key_pair in &signing_keys {
            self.key_store
                .store_signature_verification_key(&self_id, key_pair.public())
                .await?;
        }
        info!("Created exchange data {} from {} to {}", created.id, self_id, delegate_id);
        Ok(VerifiedExchangeData::created(created, content))
    }

    /// Make sure every trusted key of the current data owner has access
    async fn with_self_keys(
        &self,
        verified: VerifiedExchangeData,
        self_keys: &[RsaEncryptionKey],
    ) -> Result<VerifiedExchangeData> {
        match extend_access(verified.exchange_data(), verified.content(), self_keys)? {
            Some(updated) => {
                let saved = self.api.modify_exchange_data(&updated).await?;
                let (_, content) = verified.into_parts();
                Ok(VerifiedExchangeData::created(saved, content))
            }
            None => Ok(verified),
        }
    }

    async fn load_by_id(&self, id: &str) -> Result<VerifiedExchangeData> {
        let exchange_data = self
            .api
            .get_exchange_data_by_id(id)
            .await?
            .ok_or_else(|| Error::ExchangeDataNotFound(id.to_string()))?;
        let hierarchy = self.hierarchy_keys().await?;
        let key_pairs = hierarchy.all_key_pairs();

        let openable = key_pairs.iter().any(|kp| {
            exchange_data
                .shared_signature_key
                .contains_key(&kp.fingerprint())
        });
        if !openable {
            return Err(Error::ExchangeDataNotFound(id.to_string()));
        }
        self.verify_with_hierarchy(&exchange_data, &key_pairs, &hierarchy)
            .await
    }

    /// Extend one record; returns whether it was written
    async fn extend_one(
        &self,
        exchange_data: &ExchangeData,
        key_pairs: &[RsaKeyPair],
        hierarchy: &KeyHierarchy,
        new_key: &RsaEncryptionKey,
    ) -> Result<bool> {
        if exchange_data.fingerprints().contains(&new_key.fingerprint()) {
            return Ok(false);
        }
        let verified = match self.verify_with_hierarchy(exchange_data, key_pairs, hierarchy).await {
            Ok(verified) => verified,
            Err(e) if e.is_untrusted_data() => {
                warn!("Not extending exchange data {}: {}", exchange_data.id, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let Some(updated) = extend_access(exchange_data, verified.content(), std::slice::from_ref(new_key))?
        else {
            return Ok(false);
        };
        self.api.modify_exchange_data(&updated).await?;
        self.by_id.invalidate(&updated.id);
        // Only exchange data we delegate is cached by counterpart
        if updated.delegator == self.hierarchy.self_id() {
            self.to_delegate.invalidate(&updated.delegate);
        }
        Ok(true)
    }
}

/// Exchange data id from a map entry, if one of the keys opens it
fn open_map_entry(
    encrypted_ids: &BTreeMap<String, String>,
    key_pairs: &[RsaKeyPair],
) -> Option<String> {
    key_pairs.iter().find_map(|key_pair| {
        let ciphertext = hex::decode(encrypted_ids.get(&key_pair.fingerprint())?).ok()?;
        let plaintext = key_pair.decrypt(&ciphertext).ok()?;
        String::from_utf8(plaintext).ok()
    })
}

// ============================================================================
// TESTS
// ============================================================================
