//! Sharing and recovery across data owners, through the public API only.

use std::sync::Arc;

use medcrypt_core::api::{DataOwnerApi, MemoryBackend};
use medcrypt_core::crypto::Confidentiality;
use medcrypt_core::exchange::AccessLevel;
use medcrypt_core::keys::KeyPairUpdateOutcome;
use medcrypt_core::model::{DataOwner, DataOwnerType};
use medcrypt_core::{Collaborators, CoreConfig, CryptoCore, SimpleCryptoStrategies};

fn config() -> CoreConfig {
    CoreConfig {
        rsa_key_size_bits: 1024,
        ..CoreConfig::default()
    }
}

/// A core on a fresh device: empty storage, keys generated when missing
async fn device(backend: &Arc<MemoryBackend>, id: &str) -> CryptoCore {
    CryptoCore::initialize(
        id,
        config(),
        Collaborators::in_memory(backend.clone(), Arc::new(SimpleCryptoStrategies::new())),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_access_survives_lost_device() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_data_owner(DataOwner::new("hcp-1", DataOwnerType::Hcp));
    backend.insert_data_owner(DataOwner::new("p-1", DataOwnerType::Patient));
    let hcp = device(&backend, "hcp-1").await;
    let patient = device(&backend, "p-1").await;

    // The hcp shares patient data anonymously
    let shared = hcp
        .exchange_data()
        .share_with("p-1", "Patient", Confidentiality::Standard, AccessLevel::Write)
        .await
        .unwrap();
    assert!(shared.delegation.is_anonymous());
    let found = patient
        .exchange_data()
        .decrypt_exchange_data_by_map_ids(&[shared.security_metadata_key.clone()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let exchange_key = *found[0].content().exchange_key.as_bytes();

    // The patient loses the device; the new one generates a key and asks
    // the hcp for access
    let replacement = device(&backend, "p-1").await;
    let owner = backend.get_data_owner("p-1").await.unwrap();
    assert_eq!(owner.public_keys_for_oaep_with_sha256.len(), 2);
    assert!(replacement
        .exchange_data()
        .decrypt_exchange_data_by_id(&shared.exchange_data_id)
        .await
        .unwrap()
        .is_none());

    let outcomes = hcp
        .key_pair_updates()
        .apply_pending_key_pair_updates(None)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].1, KeyPairUpdateOutcome::Applied { extended: 1 });

    let recovered = replacement
        .exchange_data()
        .decrypt_exchange_data_by_id(&shared.exchange_data_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovered.content().exchange_key.as_bytes(), &exchange_key);
    assert_eq!(
        recovered
            .content()
            .access_control_key("Patient", Confidentiality::Standard),
        found[0]
            .content()
            .access_control_key("Patient", Confidentiality::Standard)
    );
}

#[tokio::test]
async fn test_notaries_bring_back_lost_key() {
    let backend = Arc::new(MemoryBackend::new());
    for (id, owner_type) in [
        ("p-1", DataOwnerType::Patient),
        ("hcp-1", DataOwnerType::Hcp),
        ("hcp-2", DataOwnerType::Hcp),
    ] {
        backend.insert_data_owner(DataOwner::new(id, owner_type));
    }
    let patient = device(&backend, "p-1").await;
    let notaries = [device(&backend, "hcp-1").await, device(&backend, "hcp-2").await];

    let lost_fingerprint = patient
        .key_hierarchy()
        .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
        .await
        .unwrap()
        .self_level()
        .key_pairs
        .keys()
        .next()
        .cloned()
        .unwrap();
    let owner = patient
        .shamir()
        .update_self_splits(
            &lost_fingerprint,
            &["hcp-1".to_string(), "hcp-2".to_string()],
            2,
        )
        .await
        .unwrap();
    assert_eq!(owner.private_key_shamir_partitions[&lost_fingerprint].notaries.len(), 2);

    // New device: the shares are still locked, so a new key is generated
    let replacement = device(&backend, "p-1").await;
    let before = replacement
        .key_hierarchy()
        .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
        .await
        .unwrap();
    assert!(before.generated_key().is_some());
    assert!(!before.self_level().key_pairs.contains_key(&lost_fingerprint));

    for notary in &notaries {
        let outcomes = notary
            .key_pair_updates()
            .apply_pending_key_pair_updates(None)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    replacement.key_hierarchy().reload();
    let after = replacement
        .key_hierarchy()
        .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
        .await
        .unwrap();
    assert!(after.self_level().key_pairs.contains_key(&lost_fingerprint));
    assert_eq!(after.self_level().key_pairs.len(), 2);
}

#[tokio::test]
async fn test_recovery_key_restores_key_pairs() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_data_owner(DataOwner::new("hcp-1", DataOwnerType::Hcp));
    let hcp = device(&backend, "hcp-1").await;
    let recovery_key = hcp
        .recovery()
        .create_recovery_info_for_available_key_pairs(false, None)
        .await
        .unwrap();

    // On a new device the key pairs come back before anything is generated
    let other_device = CryptoCore::new(
        "hcp-1",
        config(),
        Collaborators::in_memory(backend.clone(), Arc::new(SimpleCryptoStrategies::new())),
    )
    .unwrap();
    let recovered = other_device
        .recovery()
        .recover_key_pairs(&recovery_key, false)
        .await
        .unwrap()
        .success()
        .unwrap();
    let key_pairs: Vec<_> = recovered["hcp-1"].values().cloned().collect();

    let restored = CryptoCore::initialize(
        "hcp-1",
        config(),
        Collaborators::in_memory(
            backend.clone(),
            Arc::new(SimpleCryptoStrategies::new().with_recovered_key_pairs(key_pairs)),
        ),
    )
    .await
    .unwrap();
    let hierarchy = restored
        .key_hierarchy()
        .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
        .await
        .unwrap();
    assert!(hierarchy.generated_key().is_none());
    assert_eq!(backend.request_count("create_maintenance_task"), 0);
}
