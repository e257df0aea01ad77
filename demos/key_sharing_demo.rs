//! # Key Sharing Demo
//!
//! Demonstrates exchange data between a healthcare party and a patient, and
//! how access survives when the patient replaces a device.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example key_sharing_demo
//! ```

use std::sync::Arc;

use medcrypt_core::api::{DataOwnerApi, MemoryBackend};
use medcrypt_core::crypto::Confidentiality;
use medcrypt_core::exchange::AccessLevel;
use medcrypt_core::model::{DataOwner, DataOwnerType};
use medcrypt_core::{Collaborators, CoreConfig, CryptoCore, SimpleCryptoStrategies};

async fn device(backend: &Arc<MemoryBackend>, id: &str) -> CryptoCore {
    let config = CoreConfig {
        rsa_key_size_bits: 2048,
        ..CoreConfig::default()
    };
    CryptoCore::initialize(
        id,
        config,
        Collaborators::in_memory(backend.clone(), Arc::new(SimpleCryptoStrategies::new())),
    )
    .await
    .expect("Failed to initialize device")
}

#[tokio::main]
async fn main() {
    println!("=== MedCrypt Core: Key Sharing Demo ===\n");

    // Step 1: Explain exchange data
    println!("Step 1: Understanding exchange data");
    println!();
    println!("  ┌─────────────────────────────────────────────────────────────┐");
    println!("  │                    EXCHANGE DATA                            │");
    println!("  ├─────────────────────────────────────────────────────────────┤");
    println!("  │                                                             │");
    println!("  │  delegator ──► delegate                                    │");
    println!("  │                                                             │");
    println!("  │  exchange key          RSA-OAEP for every key of both      │");
    println!("  │  access control secret RSA-OAEP for every key of both      │");
    println!("  │  shared signature key  HMAC over the whole record          │");
    println!("  │                                                             │");
    println!("  │  A new public key only needs the record re-wrapped,        │");
    println!("  │  never the data it protects.                               │");
    println!("  │                                                             │");
    println!("  └─────────────────────────────────────────────────────────────┘");
    println!();

    // Step 2: Two data owners on their first device
    println!("Step 2: Creating a healthcare party and a patient...");
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_data_owner(DataOwner::new("hcp-1", DataOwnerType::Hcp));
    backend.insert_data_owner(DataOwner::new("p-1", DataOwnerType::Patient));
    let hcp = device(&backend, "hcp-1").await;
    let patient = device(&backend, "p-1").await;
    println!("  [OK] Both generated and published a key pair");
    println!();

    // Step 3: Share
    println!("Step 3: hcp-1 shares with p-1...");
    let shared = hcp
        .exchange_data()
        .share_with("p-1", "Patient", Confidentiality::Standard, AccessLevel::Write)
        .await
        .expect("Failed to share");
    println!("  Exchange data:     {}", shared.exchange_data_id);
    println!("  Anonymous:         {}", shared.delegation.is_anonymous());
    println!("  Metadata key:      {}", shared.security_metadata_key);

    let found = patient
        .exchange_data()
        .decrypt_exchange_data_by_map_ids(&[shared.security_metadata_key.clone()])
        .await
        .expect("Failed to look up exchange data");
    println!("  [OK] p-1 opens {} exchange data through the map", found.len());
    println!();

    // Step 4: Lost device
    println!("Step 4: p-1 loses the device and starts over...");
    let replacement = device(&backend, "p-1").await;
    let owner = backend
        .get_data_owner("p-1")
        .await
        .expect("Failed to load p-1");
    println!(
        "  Published keys:    {}",
        owner.public_keys_for_oaep_with_sha256.len()
    );
    let before = replacement
        .exchange_data()
        .decrypt_exchange_data_by_id(&shared.exchange_data_id)
        .await
        .expect("Failed to read exchange data");
    println!("  Readable now:      {}", before.is_some());
    println!();

    // Step 5: The hcp answers the update request
    println!("Step 5: hcp-1 applies pending key pair updates...");
    let outcomes = hcp
        .key_pair_updates()
        .apply_pending_key_pair_updates(None)
        .await
        .expect("Failed to apply updates");
    for (task, outcome) in &outcomes {
        println!("  Task {}: {:?}", task.id, outcome);
    }
    let after = replacement
        .exchange_data()
        .decrypt_exchange_data_by_id(&shared.exchange_data_id)
        .await
        .expect("Failed to read exchange data");
    match after {
        Some(_) => println!("  [OK] The new device opens the exchange data"),
        None => println!("  [FAILED] Access was not restored"),
    }
    println!();

    println!("=== Demo Complete ===");
}
