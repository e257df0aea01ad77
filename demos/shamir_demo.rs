//! # Shamir Demo
//!
//! Demonstrates splitting a private key between notaries and getting it
//! back on a new device.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example shamir_demo
//! ```

use std::sync::Arc;

use medcrypt_core::api::MemoryBackend;
use medcrypt_core::crypto::{shamir_combine, shamir_share};
use medcrypt_core::model::{DataOwner, DataOwnerType};
use medcrypt_core::{Collaborators, CoreConfig, CryptoCore, SimpleCryptoStrategies};

async fn device(backend: &Arc<MemoryBackend>, id: &str) -> CryptoCore {
    CryptoCore::initialize(
        id,
        CoreConfig::default(),
        Collaborators::in_memory(backend.clone(), Arc::new(SimpleCryptoStrategies::new())),
    )
    .await
    .expect("Failed to initialize device")
}

#[tokio::main]
async fn main() {
    println!("=== MedCrypt Core: Shamir Notaries Demo ===\n");

    // Step 1: Plain secret sharing
    println!("Step 1: Splitting a secret 2-of-3...");
    let secret = "00112233445566778899aabbccddeeff";
    let shares = shamir_share(secret, 3, 2).expect("Failed to split");
    for (i, share) in shares.iter().enumerate() {
        println!("  Share {}: {}...", i + 1, &share[..share.len().min(24)]);
    }
    let pair = [shares[0].clone(), shares[2].clone()];
    match shamir_combine(&pair) {
        Ok(combined) if combined == secret => println!("  [OK] Any two shares give the secret back"),
        Ok(_) => println!("  [FAILED] Wrong secret"),
        Err(e) => println!("  [FAILED] {}", e),
    }
    println!();

    // Step 2: Explain notaries
    println!("Step 2: Understanding notaries");
    println!();
    println!("  ┌─────────────────────────────────────────────────────────────┐");
    println!("  │                    KEY SPLITS                               │");
    println!("  ├─────────────────────────────────────────────────────────────┤");
    println!("  │                                                             │");
    println!("  │  private key ──► shares ──► one per notary                 │");
    println!("  │                                                             │");
    println!("  │  Each share is sealed with the exchange key shared         │");
    println!("  │  with that notary. Notaries never read their share.        │");
    println!("  │                                                             │");
    println!("  │  Lost key: notaries give the new key access, the new       │");
    println!("  │  device opens the shares and rebuilds the old key.         │");
    println!("  │                                                             │");
    println!("  └─────────────────────────────────────────────────────────────┘");
    println!();

    // Step 3: Split
    println!("Step 3: p-1 splits its key between hcp-1 and hcp-2...");
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

    let hierarchy = patient
        .key_hierarchy()
        .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
        .await
        .expect("Failed to load keys");
    let Some(fingerprint) = hierarchy.self_level().key_pairs.keys().next().cloned() else {
        println!("  [FAILED] p-1 has no key");
        return;
    };
    patient
        .shamir()
        .update_self_splits(&fingerprint, &["hcp-1".to_string(), "hcp-2".to_string()], 2)
        .await
        .expect("Failed to split key");
    println!("  [OK] Key {} split, 2 of 2 needed", fingerprint);
    println!();

    // Step 4: Recover
    println!("Step 4: p-1 starts over on a new device...");
    let replacement = device(&backend, "p-1").await;
    for notary in &notaries {
        let outcomes = notary
            .key_pair_updates()
            .apply_pending_key_pair_updates(None)
            .await
            .expect("Failed to apply updates");
        println!("  {} applied {} update(s)", notary.self_id(), outcomes.len());
    }

    replacement.key_hierarchy().reload();
    let hierarchy = replacement
        .key_hierarchy()
        .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
        .await
        .expect("Failed to load keys");
    if hierarchy.self_level().key_pairs.contains_key(&fingerprint) {
        println!("  [OK] The old key is back");
    } else {
        println!("  [FAILED] The old key is still missing");
    }
    println!();

    println!("=== Demo Complete ===");
}
