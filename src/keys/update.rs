//! Key pair update requests.
//!
//! A data owner that had to generate a new key cannot read what was shared
//! with its old keys. It asks every data owner it shares exchange data with
//! to give the new key access, through maintenance tasks:
//!
//! ```text
//! ┌──────────────┐   KEY_PAIR_UPDATE task    ┌──────────────┐
//! │ data owner   │ ────────────────────────► │ counterpart  │
//! │ (new key)    │                           │              │
//! │              │ ◄──────────────────────── │ extends its  │
//! └──────────────┘   exchange data extended  │ exchange data│
//!                                            └──────────────┘
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hierarchy::KeyHierarchyManager;
use crate::api::{DataOwnerApi, ExchangeDataApi, MaintenanceTaskApi, MaintenanceTaskFilter};
use crate::crypto::RsaEncryptionKey;
use crate::error::{Error, Result};
use crate::exchange::ExchangeDataManager;
use crate::model::{MaintenanceTask, PropertyStub, TaskStatus};
use crate::time::now_timestamp_millis;

/// Task type of key pair update requests
pub const KEY_PAIR_UPDATE: &str = "KEY_PAIR_UPDATE";

/// Property holding the id of the data owner with the new key
pub const DATA_OWNER_CONCERNED_ID: &str = "dataOwnerConcernedId";

/// Property holding the new public key (hex SPKI)
pub const DATA_OWNER_CONCERNED_PUB_KEY: &str = "dataOwnerConcernedPubKey";

/// What applying a key pair update did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPairUpdateOutcome {
    /// Access given to the new key; the task is completed
    Applied {
        /// Exchange data extended for the new key
        extended: usize,
    },
    /// The key is not published on the data owner; the task is cancelled
    UnpublishedKey,
    /// The strategies did not trust the key; the task stays pending
    UntrustedKey,
}

/// Sends and applies `KEY_PAIR_UPDATE` maintenance tasks
#[derive(Clone)]
pub struct KeyPairUpdateManager {
    hierarchy: KeyHierarchyManager,
    exchange: ExchangeDataManager,
    data_owners: Arc<dyn DataOwnerApi>,
    exchange_data: Arc<dyn ExchangeDataApi>,
    tasks: Arc<dyn MaintenanceTaskApi>,
    page_size: usize,
}

impl KeyPairUpdateManager {
    /// Create a manager
    pub fn new(
        hierarchy: KeyHierarchyManager,
        exchange: ExchangeDataManager,
        data_owners: Arc<dyn DataOwnerApi>,
        exchange_data: Arc<dyn ExchangeDataApi>,
        tasks: Arc<dyn MaintenanceTaskApi>,
        page_size: usize,
    ) -> Self {
        Self {
            hierarchy,
            exchange,
            data_owners,
            exchange_data,
            tasks,
            page_size: page_size.max(1),
        }
    }

    /// Ask every counterpart of the current data owner to give `new_key`
    /// access to their exchange data
    ///
    /// One task per counterpart, readable by that counterpart only.
    pub async fn request_key_pair_update(
        &self,
        new_key: &RsaEncryptionKey,
    ) -> Result<Vec<MaintenanceTask>> {
        let self_id = self.hierarchy.self_id().to_string();
        let counterparts = self.counterparts(&self_id).await?;

        let mut created = Vec::with_capacity(counterparts.len());
        for counterpart in counterparts {
            let task = MaintenanceTask {
                id: Uuid::new_v4().to_string(),
                rev: None,
                created: now_timestamp_millis(),
                task_type: KEY_PAIR_UPDATE.to_string(),
                status: TaskStatus::Pending,
                responsible: self_id.clone(),
                delegates: [counterpart].into_iter().collect(),
                properties: vec![
                    PropertyStub::string(DATA_OWNER_CONCERNED_ID, self_id.clone()),
                    PropertyStub::string(DATA_OWNER_CONCERNED_PUB_KEY, new_key.spki_hex()),
                ],
            };
            created.push(self.tasks.create_maintenance_task(&task).await?);
        }

        info!(
            "Requested access for key {} from {} data owners",
            new_key.fingerprint(),
            created.len()
        );
        Ok(created)
    }

    /// Pending update requests addressed to the current data owner
    pub async fn pending_key_pair_updates(&self, since: Option<i64>) -> Result<Vec<MaintenanceTask>> {
        let filter = MaintenanceTaskFilter {
            task_type: Some(KEY_PAIR_UPDATE.to_string()),
            created_after: since,
            delegate: Some(self.hierarchy.self_id().to_string()),
            status: Some(TaskStatus::Pending),
        };
        self.tasks.filter_maintenance_tasks(&filter).await
    }

    /// Give the key of an update request access to our exchange data
    ///
    /// The key must be published on the concerned data owner and accepted by
    /// [`CryptoStrategies::verify_delegate_public_keys`](super::CryptoStrategies::verify_delegate_public_keys).
    pub async fn apply_key_pair_update(&self, task: &MaintenanceTask) -> Result<KeyPairUpdateOutcome> {
        if task.task_type != KEY_PAIR_UPDATE {
            return Err(Error::DeserializationError(format!(
                "task {} is a {} task",
                task.id, task.task_type
            )));
        }
        let concerned_id = required_property(task, DATA_OWNER_CONCERNED_ID)?;
        let spki_hex = required_property(task, DATA_OWNER_CONCERNED_PUB_KEY)?;

        let concerned = self.data_owners.get_data_owner(concerned_id).await?;
        let Some((_, sha_version)) = concerned
            .public_keys_with_version()
            .find(|(published, _)| published.eq_ignore_ascii_case(spki_hex))
        else {
            warn!("Key update {} names a key {} never published", task.id, concerned_id);
            self.set_status(task, TaskStatus::Cancelled).await?;
            return Ok(KeyPairUpdateOutcome::UnpublishedKey);
        };
        let new_key = RsaEncryptionKey::from_spki_hex(spki_hex, sha_version)?;

        let trusted = self
            .hierarchy
            .verified_delegate_keys(&concerned)
            .await?
            .into_iter()
            .any(|k| k.fingerprint() == new_key.fingerprint());
        if !trusted {
            debug!("Key {} of {} not trusted yet", new_key.fingerprint(), concerned_id);
            return Ok(KeyPairUpdateOutcome::UntrustedKey);
        }

        let extended = self.exchange.give_access_back_to(concerned_id, &new_key).await?;
        self.set_status(task, TaskStatus::Completed).await?;
        Ok(KeyPairUpdateOutcome::Applied { extended })
    }

    /// Apply every pending request, returning each task with its outcome
    pub async fn apply_pending_key_pair_updates(
        &self,
        since: Option<i64>,
    ) -> Result<Vec<(MaintenanceTask, KeyPairUpdateOutcome)>> {
        let mut outcomes = Vec::new();
        for task in self.pending_key_pair_updates(since).await? {
            let outcome = self.apply_key_pair_update(&task).await?;
            outcomes.push((task, outcome));
        }
        Ok(outcomes)
    }

    /// Every other party of the exchange data of `self_id`
    async fn counterparts(&self, self_id: &str) -> Result<BTreeSet<String>> {
        let mut counterparts = BTreeSet::new();
        let mut start_key: Option<String> = None;
        loop {
            let page = self
                .exchange_data
                .get_exchange_data_by_participant(self_id, start_key.as_deref(), self.page_size)
                .await?;
            counterparts.extend(
                page.rows
                    .iter()
                    .filter(|ed| !ed.is_deleted())
                    .filter_map(|ed| ed.counterpart_of(self_id))
                    .filter(|id| *id != self_id)
                    .map(str::to_string),
            );
            match page.next_key {
                Some(next) => start_key = Some(next),
                None => return Ok(counterparts),
            }
        }
    }

    async fn set_status(&self, task: &MaintenanceTask, status: TaskStatus) -> Result<()> {
        let mut updated = task.clone();
        updated.status = status;
        self.tasks.modify_maintenance_task(&updated).await?;
        Ok(())
    }
}

fn required_property<'a>(task: &'a MaintenanceTask, id: &str) -> Result<&'a str> {
    task.property(id).ok_or_else(|| {
        Error::DeserializationError(format!("task {} has no {} property", task.id, id))
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryBackend;
    use crate::crypto::RsaKeyPair;
    use crate::exchange::ExchangeDataDirectory;
    use crate::keys::{KeyPairRecoverer, SimpleCryptoStrategies};
    use crate::model::{DataOwner, DataOwnerType};
    use crate::storage::{DefaultStorageEntryKeysFactory, KeyStore, MemoryKeyStorage, MemoryStorage};
    use crate::test_utils::test_key;
    use crate::CoreConfig;

    async fn updater(backend: &Arc<MemoryBackend>, id: &str, key: &RsaKeyPair) -> KeyPairUpdateManager {
        let key_store = KeyStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryKeyStorage::new()),
            Arc::new(DefaultStorageEntryKeysFactory::default()),
        );
        key_store.store_device_key_pair(id, key).await.unwrap();
        let hierarchy = KeyHierarchyManager::new(
            id,
            backend.clone(),
            key_store.clone(),
            Arc::new(SimpleCryptoStrategies::new().without_key_generation()),
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
        KeyPairUpdateManager::new(hierarchy, exchange, backend.clone(), backend.clone(), backend.clone(), 2)
    }

    fn register(backend: &MemoryBackend, id: &str, owner_type: DataOwnerType, keys: &[&RsaKeyPair]) {
        let mut owner = DataOwner::new(id, owner_type);
        for key in keys {
            owner.add_public_key(key.public());
        }
        backend.insert_data_owner(owner);
    }

    #[tokio::test]
    async fn test_request_reaches_every_counterpart_once() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "p-1", DataOwnerType::Patient, &[test_key(0)]);
        for (i, id) in ["hcp-1", "hcp-2", "hcp-3"].into_iter().enumerate() {
            register(&backend, id, DataOwnerType::Hcp, &[test_key(i + 1)]);
        }
        let patient = updater(&backend, "p-1", test_key(0)).await;
        for id in ["hcp-1", "hcp-2", "hcp-3"] {
            patient.exchange.get_or_create_encryption_data_to(id).await.unwrap();
        }
        // Second exchange data with hcp-1, from the other side
        let hcp = updater(&backend, "hcp-1", test_key(1)).await;
        hcp.exchange.get_or_create_encryption_data_to("p-1").await.unwrap();

        let tasks = patient
            .request_key_pair_update(test_key(4).public())
            .await
            .unwrap();

        assert_eq!(tasks.len(), 3);
        let addressed: BTreeSet<String> = tasks.iter().flat_map(|t| t.delegates.clone()).collect();
        assert_eq!(addressed.len(), 3);
        assert!(tasks.iter().all(|t| t.property(DATA_OWNER_CONCERNED_ID) == Some("p-1")));
        assert_eq!(hcp.pending_key_pair_updates(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_extends_and_completes() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "hcp-1", DataOwnerType::Hcp, &[test_key(0)]);
        register(&backend, "p-1", DataOwnerType::Patient, &[test_key(1)]);
        let hcp = updater(&backend, "hcp-1", test_key(0)).await;
        let shared = hcp.exchange.get_or_create_encryption_data_to("p-1").await.unwrap();

        // The patient lost key 1 and published key 2
        let mut owner = backend.get_data_owner("p-1").await.unwrap();
        owner.add_public_key(test_key(2).public());
        backend.modify_data_owner(&owner).await.unwrap();
        let patient = updater(&backend, "p-1", test_key(2)).await;
        patient.request_key_pair_update(test_key(2).public()).await.unwrap();

        let outcomes = hcp.apply_pending_key_pair_updates(None).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, KeyPairUpdateOutcome::Applied { extended: 1 });
        assert!(hcp.pending_key_pair_updates(None).await.unwrap().is_empty());

        let extended = backend
            .get_exchange_data_by_id(&shared.exchange_data().id)
            .await
            .unwrap()
            .unwrap();
        assert!(extended.fingerprints().contains(&test_key(2).fingerprint()));
    }

    #[tokio::test]
    async fn test_unpublished_key_is_cancelled() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "hcp-1", DataOwnerType::Hcp, &[test_key(0)]);
        register(&backend, "p-1", DataOwnerType::Patient, &[test_key(1)]);
        let hcp = updater(&backend, "hcp-1", test_key(0)).await;
        hcp.exchange.get_or_create_encryption_data_to("p-1").await.unwrap();

        let patient = updater(&backend, "p-1", test_key(1)).await;
        let tasks = patient.request_key_pair_update(test_key(3).public()).await.unwrap();

        let outcome = hcp.apply_key_pair_update(&tasks[0]).await.unwrap();
        assert_eq!(outcome, KeyPairUpdateOutcome::UnpublishedKey);
        assert!(hcp.pending_key_pair_updates(None).await.unwrap().is_empty());
        assert_eq!(backend.request_count("modify_exchange_data"), 0);
    }

    #[tokio::test]
    async fn test_malformed_task_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, "hcp-1", DataOwnerType::Hcp, &[test_key(0)]);
        let hcp = updater(&backend, "hcp-1", test_key(0)).await;
        let task = MaintenanceTask {
            id: "mt-1".into(),
            rev: None,
            created: 0,
            task_type: KEY_PAIR_UPDATE.into(),
            status: TaskStatus::Pending,
            responsible: "p-1".into(),
            delegates: ["hcp-1".to_string()].into_iter().collect(),
            properties: vec![PropertyStub::string(DATA_OWNER_CONCERNED_ID, "p-1")],
        };

        let err = hcp.apply_key_pair_update(&task).await.unwrap_err();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}
