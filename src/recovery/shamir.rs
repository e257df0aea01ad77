//! Splitting private keys between notaries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;
use zeroize::Zeroizing;

use crate::api::DataOwnerApi;
use crate::crypto::{seal, shamir_share};
use crate::error::{Error, Result};
use crate::exchange::ExchangeDataManager;
use crate::graph::{graph_from_edges, terminal_nodes};
use crate::keys::KeyHierarchyManager;
use crate::model::{DataOwner, ShamirPartition};

/// Maintains the Shamir partitions of the current data owner's keys
///
/// Each notary gets one share, sealed with the exchange key of the exchange
/// data from the current data owner to the notary. The notary never reads
/// the share: when the owner loses the key, the notary gives the new key
/// access to that exchange data and the owner opens the share itself.
#[derive(Clone)]
pub struct ShamirKeysManager {
    hierarchy: KeyHierarchyManager,
    exchange: ExchangeDataManager,
    data_owners: Arc<dyn DataOwnerApi>,
}

impl ShamirKeysManager {
    /// Create a manager
    pub fn new(
        hierarchy: KeyHierarchyManager,
        exchange: ExchangeDataManager,
        data_owners: Arc<dyn DataOwnerApi>,
    ) -> Self {
        Self {
            hierarchy,
            exchange,
            data_owners,
        }
    }

    /// Split a key of the current data owner between `notaries`
    ///
    /// A notary whose ancestor is also a notary is dropped: it already sees
    /// what is shared with the ancestor. `threshold` applies to the notaries
    /// that remain. Replaces any previous partition of the key.
    pub async fn update_self_splits(
        &self,
        fingerprint: &str,
        notaries: &[String],
        threshold: usize,
    ) -> Result<DataOwner> {
        let hierarchy = self
            .hierarchy
            .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
            .await?;
        let key_pair = hierarchy
            .self_level()
            .key_pairs
            .get(fingerprint)
            .map(|k| k.key_pair.clone())
            .ok_or_else(|| {
                Error::MissingKeyMaterial(format!("no private key {} to split", fingerprint))
            })?;

        let notaries = self.reduce_notaries(notaries).await?;
        if threshold == 0 || threshold > notaries.len() {
            return Err(Error::InvalidShamirParameters(format!(
                "threshold {} for {} notaries",
                threshold,
                notaries.len()
            )));
        }

        let secret = Zeroizing::new(hex::encode(Zeroizing::new(key_pair.to_pkcs8()?)));
        let shares = shamir_share(&secret, notaries.len(), threshold)?;

        let mut encrypted_shares = BTreeMap::new();
        for (notary, share) in notaries.iter().zip(shares) {
            let share = Zeroizing::new(share);
            let exchange_data = self.exchange.get_or_create_encryption_data_to(notary).await?;
            let sealed = seal(
                &exchange_data.content().exchange_key,
                share.as_bytes(),
                fingerprint.as_bytes(),
            )?;
            encrypted_shares.insert(notary.clone(), hex::encode(sealed));
        }

        let updated = self
            .update_self(|owner| {
                owner.private_key_shamir_partitions.insert(
                    fingerprint.to_string(),
                    ShamirPartition {
                        threshold,
                        notaries: encrypted_shares,
                    },
                );
            })
            .await?;
        info!(
            "Split key {} between {} notaries, {} needed",
            fingerprint,
            notaries.len(),
            threshold
        );
        Ok(updated)
    }

    /// Remove the partition of a key
    pub async fn delete_self_splits(&self, fingerprint: &str) -> Result<DataOwner> {
        self.update_self(|owner| {
            owner.private_key_shamir_partitions.remove(fingerprint);
        })
        .await
    }

    /// Notaries left once the ones covered by an ancestor are dropped
    async fn reduce_notaries(&self, notaries: &[String]) -> Result<BTreeSet<String>> {
        let requested: BTreeSet<&str> = notaries.iter().map(String::as_str).collect();
        let mut edges = Vec::new();
        let mut isolated = Vec::new();

        for notary in &requested {
            let mut ancestors = Vec::new();
            let mut visited = BTreeSet::from([notary.to_string()]);
            let mut next = self.data_owners.get_data_owner(notary).await?.parent_id;
            while let Some(parent) = next {
                if !visited.insert(parent.clone()) {
                    break;
                }
                next = self.data_owners.get_data_owner(&parent).await?.parent_id;
                if requested.contains(parent.as_str()) {
                    ancestors.push(parent);
                }
            }
            if ancestors.is_empty() {
                isolated.push(notary.to_string());
            }
            edges.extend(ancestors.into_iter().map(|a| (notary.to_string(), a)));
        }

        let mut graph = graph_from_edges(edges);
        for notary in isolated {
            graph.entry(notary).or_default();
        }
        Ok(terminal_nodes(&graph))
    }

    async fn update_self(&self, change: impl FnOnce(&mut DataOwner)) -> Result<DataOwner> {
        let mut data_owner = self.data_owners.get_data_owner(self.hierarchy.self_id()).await?;
        change(&mut data_owner);
        let updated = self.data_owners.modify_data_owner(&data_owner).await?;
        self.hierarchy.reload();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryBackend;
    use crate::crypto::RsaKeyPair;
    use crate::exchange::ExchangeDataDirectory;
    use crate::keys::{KeyPairRecoverer, SimpleCryptoStrategies};
    use crate::model::DataOwnerType;
    use crate::storage::{DefaultStorageEntryKeysFactory, KeyStore, MemoryKeyStorage, MemoryStorage};
    use crate::test_utils::test_key;
    use crate::CoreConfig;

    async fn manager(backend: &Arc<MemoryBackend>, id: &str, key: &RsaKeyPair) -> ShamirKeysManager {
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
            Arc::new(SimpleCryptoStrategies::new()),
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
        ShamirKeysManager::new(hierarchy, exchange, backend.clone())
    }

    fn register(backend: &MemoryBackend, owner: DataOwner, key: &RsaKeyPair) {
        let mut owner = owner;
        owner.add_public_key(key.public());
        backend.insert_data_owner(owner);
    }

    fn notaries(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_descendant_notaries_are_dropped() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, DataOwner::new("p-1", DataOwnerType::Patient), test_key(0));
        register(&backend, DataOwner::new("org", DataOwnerType::Hcp), test_key(1));
        register(
            &backend,
            DataOwner::new("hcp-1", DataOwnerType::Hcp).with_parent("org"),
            test_key(2),
        );
        register(&backend, DataOwner::new("hcp-2", DataOwnerType::Hcp), test_key(3));
        let shamir = manager(&backend, "p-1", test_key(0)).await;

        let owner = shamir
            .update_self_splits(&test_key(0).fingerprint(), &notaries(&["hcp-1", "org", "hcp-2"]), 2)
            .await
            .unwrap();

        let partition = &owner.private_key_shamir_partitions[&test_key(0).fingerprint()];
        assert_eq!(partition.threshold, 2);
        let kept: Vec<&str> = partition.notaries.keys().map(String::as_str).collect();
        assert_eq!(kept, vec!["hcp-2", "org"]);
    }

    #[tokio::test]
    async fn test_threshold_above_reduced_notaries() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, DataOwner::new("p-1", DataOwnerType::Patient), test_key(0));
        register(&backend, DataOwner::new("org", DataOwnerType::Hcp), test_key(1));
        register(
            &backend,
            DataOwner::new("hcp-1", DataOwnerType::Hcp).with_parent("org"),
            test_key(2),
        );
        let shamir = manager(&backend, "p-1", test_key(0)).await;

        let err = shamir
            .update_self_splits(&test_key(0).fingerprint(), &notaries(&["hcp-1", "org"]), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShamirParameters(_)));
    }

    #[tokio::test]
    async fn test_unknown_key_and_delete() {
        let backend = Arc::new(MemoryBackend::new());
        register(&backend, DataOwner::new("p-1", DataOwnerType::Patient), test_key(0));
        register(&backend, DataOwner::new("hcp-1", DataOwnerType::Hcp), test_key(1));
        let shamir = manager(&backend, "p-1", test_key(0)).await;

        let err = shamir
            .update_self_splits(&test_key(5).fingerprint(), &notaries(&["hcp-1"]), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingKeyMaterial(_)));

        let fingerprint = test_key(0).fingerprint();
        shamir
            .update_self_splits(&fingerprint, &notaries(&["hcp-1"]), 1)
            .await
            .unwrap();
        let owner = shamir.delete_self_splits(&fingerprint).await.unwrap();
        assert!(owner.private_key_shamir_partitions.is_empty());
    }
}
