//! Built-in ways of getting a lost private key back.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SHAMIR RECOVERY                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  DataOwner.privateKeyShamirPartitions[fp]                              │
//! │     notary ──► AES-GCM(exchange key self → notary, share)              │
//! │                                                                         │
//! │  1. each notary gives the new key access to exchange data self→notary  │
//! │  2. the new key opens that exchange data, then the share               │
//! │  3. threshold shares combine into the PKCS8 of the lost key            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ExchangeDataApi, RecoveryDataApi};
use crate::crypto::{
    open, shamir_combine, EncryptionKey, Fingerprint, RsaKeyPair, ShaVersion, ShamirError,
};
use crate::error::{Error, Result};
use crate::exchange::decrypt;
use crate::model::DataOwner;
use crate::recovery::{consume_key_pair_recovery, RecoveredKeyPairs, RecoveryResult};

/// Recovers private keys through Shamir notaries or recovery keys
#[derive(Clone)]
pub struct KeyPairRecoverer {
    exchange_data: Arc<dyn ExchangeDataApi>,
    recovery_data: Arc<dyn RecoveryDataApi>,
}

impl KeyPairRecoverer {
    /// Create a recoverer over the backend APIs
    pub fn new(
        exchange_data: Arc<dyn ExchangeDataApi>,
        recovery_data: Arc<dyn RecoveryDataApi>,
    ) -> Self {
        Self {
            exchange_data,
            recovery_data,
        }
    }

    /// Rebuild the keys of `data_owner` that have a Shamir partition
    ///
    /// Only keys missing from `available` are attempted. A key without
    /// enough readable shares yet is skipped, not an error.
    pub async fn recover_with_shamir(
        &self,
        data_owner: &DataOwner,
        available: &[RsaKeyPair],
    ) -> Result<BTreeMap<Fingerprint, RsaKeyPair>> {
        let published = data_owner.fingerprints()?;
        let mut recovered = BTreeMap::new();

        for (fingerprint, partition) in &data_owner.private_key_shamir_partitions {
            if available.iter().any(|kp| &kp.fingerprint() == fingerprint) {
                continue;
            }
            let Some((_, sha_version)) = published.get(fingerprint) else {
                warn!("Shamir partition of {} for unpublished key {}", data_owner.id, fingerprint);
                continue;
            };

            let mut shares = Vec::new();
            for (notary, encrypted_share) in &partition.notaries {
                if let Some(share) = self
                    .open_share(&data_owner.id, notary, fingerprint, encrypted_share, available)
                    .await?
                {
                    shares.push(share);
                }
            }

            match combine_key(&shares, fingerprint, *sha_version) {
                Ok(key_pair) => {
                    info!("Recovered key {} of {} from notaries", fingerprint, data_owner.id);
                    recovered.insert(fingerprint.clone(), key_pair);
                }
                Err(RecoveryAttempt::NotYet(needed, got)) => {
                    debug!(
                        "Key {} of {}: {} of {} shares readable",
                        fingerprint, data_owner.id, got, needed
                    );
                }
                Err(RecoveryAttempt::Failed(reason)) => {
                    warn!("Shamir recovery of {} failed: {}", fingerprint, reason);
                }
            }
        }
        Ok(recovered)
    }

    /// Consume a key pair recovery blob
    pub async fn recover_with_recovery_key(
        &self,
        recovery_key: &str,
        consume_on_failure_too: bool,
    ) -> Result<RecoveryResult<RecoveredKeyPairs>> {
        consume_key_pair_recovery(
            self.recovery_data.as_ref(),
            recovery_key,
            consume_on_failure_too,
        )
        .await
    }

    /// Decrypt one notary's share, `None` if no available key reaches it
    async fn open_share(
        &self,
        data_owner_id: &str,
        notary: &str,
        fingerprint: &str,
        encrypted_share: &str,
        available: &[RsaKeyPair],
    ) -> Result<Option<String>> {
        let sealed = match hex::decode(encrypted_share) {
            Ok(sealed) => sealed,
            Err(_) => {
                warn!("Share of {} for {} is not hex", notary, fingerprint);
                return Ok(None);
            }
        };

        let candidates = self
            .exchange_data
            .get_exchange_data_by_delegator_delegate(data_owner_id, notary)
            .await?;
        for exchange_data in candidates.iter().filter(|ed| !ed.is_deleted()) {
            let content = match decrypt(exchange_data, available) {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Exchange data {} unreadable: {}", exchange_data.id, e);
                    continue;
                }
            };
            if let Ok(share) = open_with(&content.exchange_key, &sealed, fingerprint) {
                return Ok(Some(share));
            }
        }
        Ok(None)
    }
}

fn open_with(key: &EncryptionKey, sealed: &[u8], fingerprint: &str) -> Result<String> {
    let plaintext = open(key, sealed, fingerprint.as_bytes())?;
    String::from_utf8(plaintext).map_err(|e| Error::InvalidShare(e.to_string()))
}

enum RecoveryAttempt {
    NotYet(usize, usize),
    Failed(String),
}

fn combine_key(
    shares: &[String],
    fingerprint: &str,
    sha_version: ShaVersion,
) -> std::result::Result<RsaKeyPair, RecoveryAttempt> {
    if shares.is_empty() {
        return Err(RecoveryAttempt::NotYet(1, 0));
    }
    let secret = match shamir_combine(shares) {
        Ok(secret) => secret,
        Err(ShamirError::InsufficientShares { needed, got }) => {
            return Err(RecoveryAttempt::NotYet(needed, got))
        }
        Err(e) => return Err(RecoveryAttempt::Failed(e.to_string())),
    };
    let der = hex::decode(secret).map_err(|e| RecoveryAttempt::Failed(e.to_string()))?;
    let key_pair = RsaKeyPair::from_pkcs8(&der, sha_version)
        .map_err(|e| RecoveryAttempt::Failed(e.to_string()))?;
    if key_pair.fingerprint() != fingerprint {
        return Err(RecoveryAttempt::Failed(format!(
            "shares rebuilt key {} instead",
            key_pair.fingerprint()
        )));
    }
    Ok(key_pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryBackend;
    use crate::model::{DataOwnerType, RecoveryDataType, ShamirPartition};
    use crate::recovery::store_recovery_payload;
    use crate::test_utils::test_key;

    fn recoverer(backend: &Arc<MemoryBackend>) -> KeyPairRecoverer {
        KeyPairRecoverer::new(backend.clone(), backend.clone())
    }

    fn partitioned_owner(share: &str) -> DataOwner {
        let mut owner = DataOwner::new("p-1", DataOwnerType::Patient);
        owner.add_public_key(test_key(0).public());
        owner.private_key_shamir_partitions.insert(
            test_key(0).fingerprint(),
            ShamirPartition {
                threshold: 1,
                notaries: [("hcp-1".to_string(), share.to_string())].into_iter().collect(),
            },
        );
        owner
    }

    #[tokio::test]
    async fn test_available_key_is_not_rebuilt() {
        let backend = Arc::new(MemoryBackend::new());
        let owner = partitioned_owner("00");

        let recovered = recoverer(&backend)
            .recover_with_shamir(&owner, &[test_key(0).clone()])
            .await
            .unwrap();

        assert!(recovered.is_empty());
        assert_eq!(backend.request_count("get_exchange_data_by_delegator_delegate"), 0);
    }

    #[tokio::test]
    async fn test_unreadable_shares_are_skipped() {
        let backend = Arc::new(MemoryBackend::new());

        for share in ["not hex", "00ff"] {
            let recovered = recoverer(&backend)
                .recover_with_shamir(&partitioned_owner(share), &[test_key(1).clone()])
                .await
                .unwrap();
            assert!(recovered.is_empty());
        }
    }

    #[tokio::test]
    async fn test_recovery_key_gives_key_pairs() {
        let backend = Arc::new(MemoryBackend::new());
        let fingerprint = test_key(0).fingerprint();
        let payload: BTreeMap<String, BTreeMap<Fingerprint, _>> = [(
            "p-1".to_string(),
            [(fingerprint.clone(), test_key(0).to_jwk_pair().unwrap())]
                .into_iter()
                .collect(),
        )]
        .into_iter()
        .collect();
        let key = store_recovery_payload(
            backend.as_ref(),
            "p-1",
            RecoveryDataType::KeypairRecovery,
            &payload,
            None,
        )
        .await
        .unwrap();

        let recovered = recoverer(&backend)
            .recover_with_recovery_key(&key, false)
            .await
            .unwrap()
            .success()
            .unwrap();
        assert!(recovered["p-1"].contains_key(&fingerprint));
    }
}
