//! Recovery keys for key pairs and exchange data.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::{
    consume_key_pair_recovery, key_pairs_to_payload, read_recovery_payload, store_recovery_payload,
    RecoveredKeyPairs, RecoveryDataUseFailureReason, RecoveryResult,
};
use crate::api::{ExchangeDataApi, RecoveryDataApi};
use crate::crypto::{EncryptionKey, SignatureKey, ACCESS_CONTROL_SECRET_SIZE};
use crate::error::{Error, Result};
use crate::exchange::{extend_access, DecryptedExchangeData, ExchangeDataManager, VerifiedExchangeData};
use crate::keys::KeyHierarchyManager;
use crate::model::RecoveryDataType;

/// Hex secrets of one exchange data in an exchange key recovery blob
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeDataSecrets {
    exchange_key: String,
    access_control_secret: String,
    shared_signature_key: String,
}

impl ExchangeDataSecrets {
    fn of(content: &DecryptedExchangeData) -> Self {
        Self {
            exchange_key: hex::encode(content.exchange_key.as_bytes()),
            access_control_secret: hex::encode(&*content.access_control_secret),
            shared_signature_key: hex::encode(content.signature_key.as_bytes()),
        }
    }

    fn into_content(self, exchange_data_id: &str, delegator: &str, delegate: &str) -> Result<DecryptedExchangeData> {
        let decode = |value: &str| {
            hex::decode(value)
                .map(Zeroizing::new)
                .map_err(|e| Error::DeserializationError(format!("recovered secret is not hex: {}", e)))
        };
        let secret = decode(&self.access_control_secret)?;
        let access_control_secret: [u8; ACCESS_CONTROL_SECRET_SIZE] =
            secret.as_slice().try_into().map_err(|_| {
                Error::DeserializationError("recovered access control secret has a bad length".into())
            })?;

        Ok(DecryptedExchangeData {
            exchange_data_id: exchange_data_id.to_string(),
            delegator: delegator.to_string(),
            delegate: delegate.to_string(),
            exchange_key: EncryptionKey::from_slice(&decode(&self.exchange_key)?)?,
            access_control_secret: Zeroizing::new(access_control_secret),
            signature_key: SignatureKey::from_slice(&decode(&self.shared_signature_key)?)?,
        })
    }
}

/// Exchange data id → secrets
type ExchangeDataPayload = BTreeMap<String, ExchangeDataSecrets>;

/// Creates and consumes recovery blobs for the current data owner
///
/// Every method that creates a blob returns its recovery key. The key is
/// the only way to the blob; losing it loses the blob.
#[derive(Clone)]
pub struct RecoveryManager {
    hierarchy: KeyHierarchyManager,
    exchange: ExchangeDataManager,
    exchange_data: Arc<dyn ExchangeDataApi>,
    api: Arc<dyn RecoveryDataApi>,
    default_lifetime: Option<Duration>,
}

impl RecoveryManager {
    /// Create a manager; `default_lifetime` applies when a call passes none
    pub fn new(
        hierarchy: KeyHierarchyManager,
        exchange: ExchangeDataManager,
        exchange_data: Arc<dyn ExchangeDataApi>,
        api: Arc<dyn RecoveryDataApi>,
        default_lifetime: Option<Duration>,
    ) -> Self {
        Self {
            hierarchy,
            exchange,
            exchange_data,
            api,
            default_lifetime,
        }
    }

    /// Save every key pair held for the current data owner
    ///
    /// With `include_parents` the keys of the whole hierarchy are saved.
    pub async fn create_recovery_info_for_available_key_pairs(
        &self,
        include_parents: bool,
        lifetime: Option<Duration>,
    ) -> Result<String> {
        let hierarchy = self
            .hierarchy
            .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
            .await?;
        let levels: Vec<_> = if include_parents {
            hierarchy.levels().collect()
        } else {
            vec![hierarchy.self_level()]
        };
        let key_pairs = levels.iter().flat_map(|level| {
            level
                .key_pairs
                .values()
                .map(move |k| (level.data_owner.id.as_str(), &k.key_pair))
        });
        let payload = key_pairs_to_payload(key_pairs)?;
        if payload.is_empty() {
            return Err(Error::NoUsableKey(self.hierarchy.self_id().to_string()));
        }

        let key = store_recovery_payload(
            self.api.as_ref(),
            self.hierarchy.self_id(),
            RecoveryDataType::KeypairRecovery,
            &payload,
            lifetime.or(self.default_lifetime),
        )
        .await?;
        info!("Created key pair recovery data for {} data owners", payload.len());
        Ok(key)
    }

    /// Get back key pairs saved with
    /// [`create_recovery_info_for_available_key_pairs`](Self::create_recovery_info_for_available_key_pairs)
    ///
    /// Nothing is stored; hand the keys to the strategies or to
    /// [`KeyHierarchyManager::add_recovered_key_pair`].
    pub async fn recover_key_pairs(
        &self,
        recovery_key: &str,
        consume_on_failure_too: bool,
    ) -> Result<RecoveryResult<RecoveredKeyPairs>> {
        consume_key_pair_recovery(self.api.as_ref(), recovery_key, consume_on_failure_too).await
    }

    /// Save the secrets shared with a delegate that has no key yet
    ///
    /// Makes sure exchange data to the delegate exists, then packs every
    /// exchange data between the two data owners that we can verify. The
    /// delegate uses the recovery key once it has a key pair.
    pub async fn create_exchange_data_recovery_info(
        &self,
        delegate_id: &str,
        lifetime: Option<Duration>,
    ) -> Result<String> {
        let self_id = self.hierarchy.self_id().to_string();
        let mut payload = ExchangeDataPayload::new();
        let current = self.exchange.get_or_create_encryption_data_to(delegate_id).await?;
        insert_secrets(&mut payload, &current);

        let mut known = self
            .exchange_data
            .get_exchange_data_by_delegator_delegate(&self_id, delegate_id)
            .await?;
        known.extend(
            self.exchange_data
                .get_exchange_data_by_delegator_delegate(delegate_id, &self_id)
                .await?,
        );
        for exchange_data in known.iter().filter(|ed| !ed.is_deleted()) {
            if payload.contains_key(&exchange_data.id) {
                continue;
            }
            match self.exchange.decrypt_exchange_data_by_id(&exchange_data.id).await {
                Ok(Some(verified)) => insert_secrets(&mut payload, &verified),
                Ok(None) => {}
                Err(e) if e.is_untrusted_data() => {
                    warn!("Leaving exchange data {} out of recovery: {}", exchange_data.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        store_recovery_payload(
            self.api.as_ref(),
            delegate_id,
            RecoveryDataType::ExchangeKeyRecovery,
            &payload,
            lifetime.or(self.default_lifetime),
        )
        .await
    }

    /// Give the keys of the current data owner access to exchange data saved
    /// with [`create_exchange_data_recovery_info`](Self::create_exchange_data_recovery_info)
    ///
    /// The blob is deleted only once every exchange data is extended, so a
    /// call that fails part way can be repeated with the same key. Returns
    /// how many exchange data were extended.
    pub async fn recover_exchange_data(&self, recovery_key: &str) -> Result<RecoveryResult<usize>> {
        let Some(opened) = read_recovery_payload(
            self.api.as_ref(),
            recovery_key,
            RecoveryDataType::ExchangeKeyRecovery,
            Some::<ExchangeDataPayload>,
        )
        .await?
        else {
            return Ok(RecoveryResult::Failure(RecoveryDataUseFailureReason::Missing));
        };
        let payload = match opened.outcome {
            RecoveryResult::Success(payload) => payload,
            RecoveryResult::Failure(reason) => return Ok(RecoveryResult::Failure(reason)),
        };

        let hierarchy = self
            .hierarchy
            .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
            .await?;
        let self_keys = &hierarchy.self_level().verified_public_keys;
        if self_keys.is_empty() {
            return Err(Error::NoUsableKey(self.hierarchy.self_id().to_string()));
        }

        let mut recovered = Vec::with_capacity(payload.len());
        for (id, secrets) in payload {
            let Some(exchange_data) = self.exchange_data.get_exchange_data_by_id(&id).await? else {
                warn!("Recovered exchange data {} no longer exists", id);
                continue;
            };
            let Ok(content) = secrets.into_content(&id, &exchange_data.delegator, &exchange_data.delegate)
            else {
                return Ok(RecoveryResult::Failure(RecoveryDataUseFailureReason::InvalidContent));
            };
            recovered.push((exchange_data, content));
        }

        let mut extended = 0;
        for (exchange_data, content) in &recovered {
            if let Some(updated) = extend_access(exchange_data, content, self_keys)? {
                self.exchange_data.modify_exchange_data(&updated).await?;
                extended += 1;
            }
        }
        self.api.delete_recovery_data(&opened.id).await?;
        self.exchange.clear_caches();
        info!("Recovered access to {} exchange data", extended);
        Ok(RecoveryResult::Success(extended))
    }

    /// Delete the blob behind a recovery key
    pub async fn purge_recovery_info(&self, recovery_key: &str) -> Result<()> {
        let Ok(key_bytes) = hex::decode(recovery_key).map(Zeroizing::new) else {
            return Ok(());
        };
        self.api.delete_recovery_data(&super::blob_id(&key_bytes)).await
    }

    /// Delete every blob for a recipient
    pub async fn purge_all_recovery_info_for(&self, recipient: &str) -> Result<usize> {
        self.api.delete_all_recovery_data_for_recipient(recipient).await
    }

    /// Delete every key pair blob for a recipient
    pub async fn purge_all_key_pair_recovery_info_for(&self, recipient: &str) -> Result<usize> {
        self.api
            .delete_all_recovery_data_of_type_for_recipient(RecoveryDataType::KeypairRecovery, recipient)
            .await
    }

    /// Delete every exchange data blob for a recipient
    pub async fn purge_all_exchange_data_recovery_info_for(&self, recipient: &str) -> Result<usize> {
        self.api
            .delete_all_recovery_data_of_type_for_recipient(
                RecoveryDataType::ExchangeKeyRecovery,
                recipient,
            )
            .await
    }
}

fn insert_secrets(payload: &mut ExchangeDataPayload, verified: &VerifiedExchangeData) {
    payload.insert(
        verified.exchange_data().id.clone(),
        ExchangeDataSecrets::of(verified.content()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DataOwnerApi, MemoryBackend};
    use crate::crypto::RsaKeyPair;
    use crate::exchange::ExchangeDataDirectory;
    use crate::keys::{KeyPairRecoverer, SimpleCryptoStrategies};
    use crate::model::{DataOwner, DataOwnerType};
    use crate::storage::{DefaultStorageEntryKeysFactory, KeyStore, MemoryKeyStorage, MemoryStorage};
    use crate::test_utils::test_key;
    use crate::CoreConfig;

    struct Party {
        recovery: RecoveryManager,
        exchange: ExchangeDataManager,
        hierarchy: KeyHierarchyManager,
    }

    async fn party(backend: &Arc<MemoryBackend>, id: &str, key: Option<&RsaKeyPair>) -> Party {
        party_with(backend, id, key, SimpleCryptoStrategies::new()).await
    }

    async fn party_with(
        backend: &Arc<MemoryBackend>,
        id: &str,
        key: Option<&RsaKeyPair>,
        strategies: SimpleCryptoStrategies,
    ) -> Party {
        let key_store = KeyStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryKeyStorage::new()),
            Arc::new(DefaultStorageEntryKeysFactory::default()),
        );
        if let Some(key) = key {
            key_store.store_device_key_pair(id, key).await.unwrap();
        }
        let hierarchy = KeyHierarchyManager::new(
            id,
            backend.clone(),
            key_store.clone(),
            Arc::new(strategies),
            KeyPairRecoverer::new(backend.clone(), backend.clone()),
            1024,
        );
        let exchange = ExchangeDataManager::new(
            hierarchy.clone(),
            backend.clone(),
            backend.clone(),
            ExchangeDataDirectory::new(backend.clone(), 10),
            key_store,
            &CoreConfig::default(),
        );
        let recovery = RecoveryManager::new(
            hierarchy.clone(),
            exchange.clone(),
            backend.clone(),
            backend.clone(),
            None,
        );
        Party {
            recovery,
            exchange,
            hierarchy,
        }
    }

    fn register(backend: &MemoryBackend, id: &str, owner_type: DataOwnerType, key: Option<&RsaKeyPair>) {
        let mut owner = DataOwner::new(id, owner_type);
        if let Some(key) = key {
            owner.add_public_key(key.public());
        }
        backend.insert_data_owner(owner);
    }

    #[tokio::test]
    async fn test_key_pairs_with_parents() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "org", DataOwnerType::Hcp, Some(test_key(0)));
        let mut hcp = DataOwner::new("hcp-1", DataOwnerType::Hcp).with_parent("org");
        hcp.add_public_key(test_key(1).public());
        backend.insert_data_owner(hcp);

        let member = party(&backend, "hcp-1", Some(test_key(1))).await;
        member
            .hierarchy
            .add_recovered_key_pair("org", test_key(0))
            .await
            .unwrap();

        let own_only = member
            .recovery
            .create_recovery_info_for_available_key_pairs(false, None)
            .await
            .unwrap();
        let everything = member
            .recovery
            .create_recovery_info_for_available_key_pairs(true, None)
            .await
            .unwrap();

        let recovered = member.recovery.recover_key_pairs(&own_only, false).await.unwrap().success().unwrap();
        assert_eq!(recovered.keys().collect::<Vec<_>>(), vec!["hcp-1"]);
        let recovered = member.recovery.recover_key_pairs(&everything, false).await.unwrap().success().unwrap();
        assert_eq!(recovered.len(), 2);
        assert!(recovered["org"].contains_key(&test_key(0).fingerprint()));
    }

    #[tokio::test]
    async fn test_delegate_without_key_gets_access() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "hcp-1", DataOwnerType::Hcp, Some(test_key(0)));
        register(&backend, "p-1", DataOwnerType::Patient, None);
        let hcp = party(&backend, "hcp-1", Some(test_key(0))).await;

        let recovery_key = hcp
            .recovery
            .create_exchange_data_recovery_info("p-1", None)
            .await
            .unwrap();
        let shared = hcp.exchange.get_or_create_encryption_data_to("p-1").await.unwrap();
        assert_eq!(shared.exchange_data().fingerprints().len(), 1);

        // The patient signs up with a key of its own
        let mut patient_owner = backend.get_data_owner("p-1").await.unwrap();
        patient_owner.add_public_key(test_key(3).public());
        backend.modify_data_owner(&patient_owner).await.unwrap();
        let patient = party(&backend, "p-1", Some(test_key(3))).await;

        let extended = patient.recovery.recover_exchange_data(&recovery_key).await.unwrap();
        assert_eq!(extended, RecoveryResult::Success(1));

        let opened = patient
            .exchange
            .decrypt_exchange_data_by_id(&shared.exchange_data().id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            opened.content().exchange_key.as_bytes(),
            shared.content().exchange_key.as_bytes()
        );

        let again = patient.recovery.recover_exchange_data(&recovery_key).await.unwrap();
        assert_eq!(again, RecoveryResult::Failure(RecoveryDataUseFailureReason::Missing));
    }

    #[tokio::test]
    async fn test_failed_exchange_data_recovery_can_be_retried() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "hcp-1", DataOwnerType::Hcp, Some(test_key(0)));
        register(&backend, "p-1", DataOwnerType::Patient, None);
        let hcp = party(&backend, "hcp-1", Some(test_key(0))).await;
        let recovery_key = hcp
            .recovery
            .create_exchange_data_recovery_info("p-1", None)
            .await
            .unwrap();

        // No key yet, and none may be generated
        let keyless = party_with(
            &backend,
            "p-1",
            None,
            SimpleCryptoStrategies::new().without_key_generation(),
        )
        .await;
        let err = keyless.recovery.recover_exchange_data(&recovery_key).await.unwrap_err();
        assert!(matches!(err, Error::NoUsableKey(_)));
        assert_eq!(backend.request_count("delete_recovery_data"), 0);

        let mut patient_owner = backend.get_data_owner("p-1").await.unwrap();
        patient_owner.add_public_key(test_key(3).public());
        backend.modify_data_owner(&patient_owner).await.unwrap();
        let patient = party(&backend, "p-1", Some(test_key(3))).await;

        let extended = patient.recovery.recover_exchange_data(&recovery_key).await.unwrap();
        assert_eq!(extended, RecoveryResult::Success(1));
        assert_eq!(backend.request_count("delete_recovery_data"), 1);
    }

    #[tokio::test]
    async fn test_wrong_recovery_key_type_keeps_the_blob() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "hcp-1", DataOwnerType::Hcp, Some(test_key(0)));
        let hcp = party(&backend, "hcp-1", Some(test_key(0))).await;
        let key_pairs = hcp
            .recovery
            .create_recovery_info_for_available_key_pairs(false, None)
            .await
            .unwrap();

        let result = hcp.recovery.recover_exchange_data(&key_pairs).await.unwrap();
        assert_eq!(result, RecoveryResult::Failure(RecoveryDataUseFailureReason::InvalidType));

        let recovered = hcp.recovery.recover_key_pairs(&key_pairs, false).await.unwrap();
        assert!(recovered.success().is_some());
    }

    #[tokio::test]
    async fn test_purge() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "hcp-1", DataOwnerType::Hcp, Some(test_key(0)));
        register(&backend, "p-1", DataOwnerType::Patient, Some(test_key(1)));
        let hcp = party(&backend, "hcp-1", Some(test_key(0))).await;

        let first = hcp.recovery.create_recovery_info_for_available_key_pairs(false, None).await.unwrap();
        hcp.recovery.create_recovery_info_for_available_key_pairs(false, None).await.unwrap();
        hcp.recovery.create_exchange_data_recovery_info("p-1", None).await.unwrap();

        hcp.recovery.purge_recovery_info(&first).await.unwrap();
        assert!(matches!(
            hcp.recovery.recover_key_pairs(&first, false).await.unwrap(),
            RecoveryResult::Failure(RecoveryDataUseFailureReason::Missing)
        ));
        assert_eq!(hcp.recovery.purge_all_key_pair_recovery_info_for("hcp-1").await.unwrap(), 1);
        assert_eq!(hcp.recovery.purge_all_recovery_info_for("hcp-1").await.unwrap(), 0);
        assert_eq!(hcp.recovery.purge_all_recovery_info_for("p-1").await.unwrap(), 1);
    }
}
