use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::{KeyStorageFacade, StorageEntryKeysFactory, StorageFacade};
use crate::crypto::{Fingerprint, RsaEncryptionKey, RsaKeyPair};
use crate::error::{Error, Result};

/// Typed access to the key entries of data owners
///
/// Wraps the caller's facades and entry key factory so the rest of the core
/// deals in [`RsaKeyPair`]s rather than storage keys and JSON.
#[derive(Clone)]
pub struct KeyStore {
    storage: Arc<dyn StorageFacade>,
    key_storage: Arc<dyn KeyStorageFacade>,
    entry_keys: Arc<dyn StorageEntryKeysFactory>,
}

impl KeyStore {
    /// Create a key store over the given facades
    pub fn new(
        storage: Arc<dyn StorageFacade>,
        key_storage: Arc<dyn KeyStorageFacade>,
        entry_keys: Arc<dyn StorageEntryKeysFactory>,
    ) -> Self {
        Self {
            storage,
            key_storage,
            entry_keys,
        }
    }

    /// Private key for a fingerprint, device keys first
    pub async fn load_key_pair(
        &self,
        data_owner_id: &str,
        fingerprint: &str,
    ) -> Result<Option<RsaKeyPair>> {
        let entries = [
            self.entry_keys
                .device_keypair_of_data_owner(data_owner_id, fingerprint),
            self.entry_keys
                .cached_recovered_keypair_of_data_owner(data_owner_id, fingerprint),
        ];
        for entry in entries {
            if let Some(stored) = self.key_storage.get_keypair(&entry).await? {
                let key_pair = RsaKeyPair::from_jwk_pair(&stored)?;
                if key_pair.fingerprint() == fingerprint {
                    return Ok(Some(key_pair));
                }
                warn!(
                    "Stored key {} of {} has fingerprint {}",
                    fingerprint,
                    data_owner_id,
                    key_pair.fingerprint()
                );
            }
        }
        Ok(None)
    }

    /// Save a key pair generated on this device
    pub async fn store_device_key_pair(
        &self,
        data_owner_id: &str,
        key_pair: &RsaKeyPair,
    ) -> Result<()> {
        let entry = self
            .entry_keys
            .device_keypair_of_data_owner(data_owner_id, &key_pair.fingerprint());
        self.key_storage
            .store_keypair(&entry, &key_pair.to_jwk_pair()?)
            .await
    }

    /// Save a key pair obtained through recovery
    pub async fn store_recovered_key_pair(
        &self,
        data_owner_id: &str,
        key_pair: &RsaKeyPair,
    ) -> Result<()> {
        let entry = self
            .entry_keys
            .cached_recovered_keypair_of_data_owner(data_owner_id, &key_pair.fingerprint());
        self.key_storage
            .store_keypair(&entry, &key_pair.to_jwk_pair()?)
            .await
    }

    /// Authenticity judgments recorded for a data owner's keys
    pub async fn verified_keys(&self, data_owner_id: &str) -> Result<BTreeMap<Fingerprint, bool>> {
        let entry = self.entry_keys.self_verified_keys_of_data_owner(data_owner_id);
        match self.storage.get_item(&entry).await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| Error::StorageReadError(format!("{}: {}", entry, e))),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Merge new judgments into the recorded ones
    pub async fn record_verified_keys(
        &self,
        data_owner_id: &str,
        judgments: &BTreeMap<Fingerprint, bool>,
    ) -> Result<()> {
        if judgments.is_empty() {
            return Ok(());
        }
        let mut recorded = self.verified_keys(data_owner_id).await?;
        recorded.extend(judgments.iter().map(|(fp, v)| (fp.clone(), *v)));

        let entry = self.entry_keys.self_verified_keys_of_data_owner(data_owner_id);
        let json =
            serde_json::to_string(&recorded).map_err(|e| Error::StorageWriteError(e.to_string()))?;
        self.storage.set_item(&entry, &json).await
    }

    /// Keep a public key able to check this data owner's old signatures
    pub async fn store_signature_verification_key(
        &self,
        data_owner_id: &str,
        key: &RsaEncryptionKey,
    ) -> Result<()> {
        let entry = self
            .entry_keys
            .signature_verification_key_for_data_owner(data_owner_id, &key.fingerprint());
        self.key_storage.store_public_key(&entry, &key.to_jwk()).await
    }

    /// Public key kept for signature checks, if any
    pub async fn signature_verification_key(
        &self,
        data_owner_id: &str,
        fingerprint: &str,
    ) -> Result<Option<RsaEncryptionKey>> {
        let entry = self
            .entry_keys
            .signature_verification_key_for_data_owner(data_owner_id, fingerprint);
        match self.key_storage.get_public_key(&entry).await? {
            Some(jwk) => Ok(Some(RsaEncryptionKey::from_jwk(&jwk)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DefaultStorageEntryKeysFactory, MemoryKeyStorage, MemoryStorage};
    use crate::test_utils::test_key;

    fn key_store() -> KeyStore {
        KeyStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryKeyStorage::new()),
            Arc::new(DefaultStorageEntryKeysFactory::default()),
        )
    }

    #[tokio::test]
    async fn test_device_and_recovered_keys_load() {
        let store = key_store();
        let device = test_key(0);
        let recovered = test_key(1);

        store.store_device_key_pair("hcp-1", device).await.unwrap();
        store.store_recovered_key_pair("hcp-1", recovered).await.unwrap();

        let loaded = store.load_key_pair("hcp-1", &device.fingerprint()).await.unwrap();
        assert_eq!(loaded.unwrap().fingerprint(), device.fingerprint());
        let loaded = store.load_key_pair("hcp-1", &recovered.fingerprint()).await.unwrap();
        assert_eq!(loaded.unwrap().fingerprint(), recovered.fingerprint());
        assert!(store
            .load_key_pair("hcp-2", &device.fingerprint())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_verified_keys_merge() {
        let store = key_store();
        assert!(store.verified_keys("p-1").await.unwrap().is_empty());

        store
            .record_verified_keys("p-1", &[("a".to_string(), true)].into_iter().collect())
            .await
            .unwrap();
        store
            .record_verified_keys("p-1", &[("b".to_string(), false)].into_iter().collect())
            .await
            .unwrap();

        let recorded = store.verified_keys("p-1").await.unwrap();
        assert_eq!(recorded.get("a"), Some(&true));
        assert_eq!(recorded.get("b"), Some(&false));
    }

    #[tokio::test]
    async fn test_signature_verification_key() {
        let store = key_store();
        let key = test_key(2).public();

        store.store_signature_verification_key("hcp-1", key).await.unwrap();
        let loaded = store
            .signature_verification_key("hcp-1", &key.fingerprint())
            .await
            .unwrap();
        assert_eq!(loaded.as_ref(), Some(key));
    }
}
