//! # MedCrypt Core
//!
//! Zero-knowledge key sharing and key recovery for medical data SDKs.
//! Data owners (healthcare parties, patients, devices) hold RSA key pairs;
//! the AES keys protecting their data travel between them as exchange data
//! that only the two parties can open.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MEDCRYPT CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────┐  │
//! │  │     Keys     │  │   Exchange   │  │   Recovery   │  │    API     │  │
//! │  │              │  │              │  │              │  │            │  │
//! │  │ - Hierarchy  │  │ - Protocol   │  │ - Blobs      │  │ - Traits   │  │
//! │  │ - Strategies │  │ - Manager    │  │ - Shamir     │  │ - Memory   │  │
//! │  │ - Updates    │  │ - Maps       │  │              │  │   backend  │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └─────┬──────┘  │
//! │         │                 │                 │                │         │
//! │         └─────────────────┴─────────────────┴────────────────┘         │
//! │                                   │                                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────┐  │
//! │  │    Crypto    │  │   Storage    │  │    Cache     │  │   Graph    │  │
//! │  │              │  │              │  │              │  │            │  │
//! │  │ - RSA, JWK   │  │ - Facades    │  │ - Single     │  │ - Tarjan   │  │
//! │  │ - AES-GCM    │  │ - Key store  │  │   flight     │  │ - Terminal │  │
//! │  │ - HMAC       │  │              │  │ - TTL / LRU  │  │   nodes    │  │
//! │  │ - Shamir     │  │              │  │              │  │            │  │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error type for the entire library
//! - [`crypto`] - RSA keys and formats, AES-GCM, HMAC, Shamir sharing
//! - [`model`] - Wire shapes shared with the backend
//! - [`api`] - Backend collaborators and an in-memory backend
//! - [`storage`] - Caller-supplied key and item storage
//! - [`cache`] - Single-flight async cache
//! - [`graph`] - Cycle collapsing and terminal nodes
//! - [`keys`] - Key hierarchy, caller strategies, key pair updates
//! - [`exchange`] - Exchange data, delegations and maps
//! - [`recovery`] - Recovery keys and Shamir notaries
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Layer 1: Key Wrapping (RSA-OAEP)                                      │
//! │  ────────────────────────────────                                       │
//! │  Exchange data secrets are encrypted once per key of either party.     │
//! │  The backend stores ciphertexts only.                                  │
//! │                                                                         │
//! │  Layer 2: Integrity (HMAC-SHA256 + RSA-PSS)                            │
//! │  ──────────────────────────────────────────                             │
//! │  A shared signature covers the secrets and both parties; the           │
//! │  delegator signs the HMAC key. A record edited on the server is        │
//! │  rejected instead of silently used.                                    │
//! │                                                                         │
//! │  Layer 3: Anonymity (access control keys)                              │
//! │  ─────────────────────────────────────────                              │
//! │  Anonymous delegations are indexed by hashes of secret-derived keys,   │
//! │  so the server cannot tell who shares with whom.                       │
//! │                                                                         │
//! │  Layer 4: Recovery (AES-256-GCM + Shamir)                              │
//! │  ────────────────────────────────────────                               │
//! │  Recovery blobs are sealed under keys the server never sees; notary    │
//! │  shares are sealed under exchange keys the notary never opens.         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod api;
pub mod cache;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod graph;
pub mod keys;
pub mod model;
pub mod recovery;
pub mod storage;
/// Epoch-millisecond time utilities.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use crypto::{RsaEncryptionKey, RsaKeyPair, ShaVersion};
pub use error::{Error, Result};
pub use exchange::{ExchangeDataManager, SharedAccess, VerifiedExchangeData};
pub use keys::{CryptoStrategies, KeyHierarchyManager, KeyPairUpdateManager, SimpleCryptoStrategies};
pub use recovery::{RecoveryManager, RecoveryResult, ShamirKeysManager};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use api::{
    DataOwnerApi, ExchangeDataApi, ExchangeDataMapApi, MaintenanceTaskApi, MemoryBackend,
    RecoveryDataApi,
};
use exchange::ExchangeDataDirectory;
use keys::KeyPairRecoverer;
use storage::{
    DefaultStorageEntryKeysFactory, KeyStorageFacade, KeyStore, MemoryKeyStorage, MemoryStorage,
    StorageEntryKeysFactory, StorageFacade,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Smallest RSA modulus accepted for new keys
pub const MIN_RSA_KEY_SIZE_BITS: usize = 1024;

/// Configuration of a [`CryptoCore`]
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let config: medcrypt_core::CoreConfig =
///     serde_json::from_str(r#"{"rsaKeySizeBits": 4096}"#).unwrap();
/// assert_eq!(config.page_size, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    /// Modulus size of generated RSA keys
    pub rsa_key_size_bits: usize,
    /// Decrypted exchange data kept in memory
    pub exchange_data_cache_size: usize,
    /// Lifetime of a cached exchange data, in seconds
    pub exchange_data_ttl_secs: u64,
    /// Data owners kept in memory
    pub data_owner_cache_size: usize,
    /// Lifetime of a cached data owner, in seconds
    pub data_owner_ttl_secs: u64,
    /// Exchange data map ids known to exist
    pub exchange_data_map_cache_size: usize,
    /// Page size of paginated backend queries
    pub page_size: usize,
    /// Lifetime of recovery blobs created without an explicit one; `None`
    /// keeps them until consumed
    pub default_recovery_lifetime_secs: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rsa_key_size_bits: 2048,
            exchange_data_cache_size: 1000,
            exchange_data_ttl_secs: 300,
            data_owner_cache_size: 1000,
            data_owner_ttl_secs: 300,
            exchange_data_map_cache_size: 1000,
            page_size: 100,
            default_recovery_lifetime_secs: None,
        }
    }
}

impl CoreConfig {
    /// Check every value
    pub fn validate(&self) -> Result<()> {
        if self.rsa_key_size_bits < MIN_RSA_KEY_SIZE_BITS || self.rsa_key_size_bits % 8 != 0 {
            return Err(Error::InvalidConfig(format!(
                "rsaKeySizeBits must be a multiple of 8 of at least {}, got {}",
                MIN_RSA_KEY_SIZE_BITS, self.rsa_key_size_bits
            )));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("pageSize must be positive".into()));
        }
        if self.exchange_data_cache_size == 0
            || self.data_owner_cache_size == 0
            || self.exchange_data_map_cache_size == 0
        {
            return Err(Error::InvalidConfig("cache sizes must be positive".into()));
        }
        Ok(())
    }

    /// Lifetime of a cached exchange data
    pub fn exchange_data_ttl(&self) -> Duration {
        Duration::from_secs(self.exchange_data_ttl_secs)
    }

    /// Lifetime of a cached data owner
    pub fn data_owner_ttl(&self) -> Duration {
        Duration::from_secs(self.data_owner_ttl_secs)
    }

    /// Default lifetime of recovery blobs
    pub fn default_recovery_lifetime(&self) -> Option<Duration> {
        self.default_recovery_lifetime_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Everything the core needs from its host
#[derive(Clone)]
pub struct Collaborators {
    /// Data owner API
    pub data_owners: Arc<dyn DataOwnerApi>,
    /// Exchange data API
    pub exchange_data: Arc<dyn ExchangeDataApi>,
    /// Exchange data map API
    pub exchange_data_maps: Arc<dyn ExchangeDataMapApi>,
    /// Maintenance task API
    pub maintenance_tasks: Arc<dyn MaintenanceTaskApi>,
    /// Recovery data API
    pub recovery_data: Arc<dyn RecoveryDataApi>,
    /// Item storage
    pub storage: Arc<dyn StorageFacade>,
    /// Key storage
    pub key_storage: Arc<dyn KeyStorageFacade>,
    /// Storage entry names
    pub entry_keys: Arc<dyn StorageEntryKeysFactory>,
    /// Caller policy
    pub strategies: Arc<dyn CryptoStrategies>,
}

impl Collaborators {
    /// Every API served by one backend, with fresh in-memory storage
    pub fn in_memory(backend: Arc<MemoryBackend>, strategies: Arc<dyn CryptoStrategies>) -> Self {
        Self {
            data_owners: backend.clone(),
            exchange_data: backend.clone(),
            exchange_data_maps: backend.clone(),
            maintenance_tasks: backend.clone(),
            recovery_data: backend,
            storage: Arc::new(MemoryStorage::new()),
            key_storage: Arc::new(MemoryKeyStorage::new()),
            entry_keys: Arc::new(DefaultStorageEntryKeysFactory::default()),
            strategies,
        }
    }

    /// Same collaborators with other key storage
    pub fn with_key_storage(mut self, key_storage: Arc<dyn KeyStorageFacade>) -> Self {
        self.key_storage = key_storage;
        self
    }
}

// ============================================================================
// CORE INSTANCE
// ============================================================================

/// The crypto core of one data owner
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        CRYPTO CORE LIFECYCLE                            │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. Initialize                                                          │
/// │     ┌──────────────┐                                                   │
/// │     │ CryptoCore:: │──► Validate config                                │
/// │     │ initialize() │──► Wire managers over the collaborators           │
/// │     └──────────────┘──► Resolve the key hierarchy                      │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  2. New key?                                                           │
/// │     ┌──────────────┐                                                   │
/// │     │ key pair     │──► Old keys published: ask every counterpart      │
/// │     │ update       │    to give the new key access                     │
/// │     └──────────────┘                                                   │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  3. Ready                                                              │
/// │     ┌──────────────┐                                                   │
/// │     │  Active      │◄─► Share, decrypt, recover                        │
/// │     └──────────────┘                                                   │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
///
/// There is no global instance: a process acting for several data owners
/// holds one core per data owner.
#[derive(Clone)]
pub struct CryptoCore {
    config: CoreConfig,
    hierarchy: KeyHierarchyManager,
    exchange: ExchangeDataManager,
    key_pair_updates: KeyPairUpdateManager,
    recovery: RecoveryManager,
    shamir: ShamirKeysManager,
}

impl CryptoCore {
    /// Wire a core without touching the backend
    pub fn new(
        self_id: impl Into<String>,
        config: CoreConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let c = collaborators;

        let key_store = KeyStore::new(c.storage, c.key_storage, c.entry_keys);
        let hierarchy = KeyHierarchyManager::new(
            self_id,
            c.data_owners.clone(),
            key_store.clone(),
            c.strategies,
            KeyPairRecoverer::new(c.exchange_data.clone(), c.recovery_data.clone()),
            config.rsa_key_size_bits,
        );
        let exchange = ExchangeDataManager::new(
            hierarchy.clone(),
            c.data_owners.clone(),
            c.exchange_data.clone(),
            ExchangeDataDirectory::new(c.exchange_data_maps, config.exchange_data_map_cache_size),
            key_store,
            &config,
        );
        let key_pair_updates = KeyPairUpdateManager::new(
            hierarchy.clone(),
            exchange.clone(),
            c.data_owners.clone(),
            c.exchange_data.clone(),
            c.maintenance_tasks,
            config.page_size,
        );
        let recovery = RecoveryManager::new(
            hierarchy.clone(),
            exchange.clone(),
            c.exchange_data,
            c.recovery_data,
            config.default_recovery_lifetime(),
        );
        let shamir = ShamirKeysManager::new(hierarchy.clone(), exchange.clone(), c.data_owners);

        Ok(Self {
            config,
            hierarchy,
            exchange,
            key_pair_updates,
            recovery,
            shamir,
        })
    }

    /// Wire a core and resolve the keys of the data owner
    ///
    /// When a key had to be generated while older keys are published, every
    /// data owner sharing exchange data with this one is asked to give the
    /// new key access.
    pub async fn initialize(
        self_id: impl Into<String>,
        config: CoreConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let core = Self::new(self_id, config, collaborators)?;
        info!(
            "Initializing MedCrypt Core v{} for {}",
            env!("CARGO_PKG_VERSION"),
            core.self_id()
        );

        let hierarchy = core
            .hierarchy
            .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
            .await?;
        if let Some(new_key) = hierarchy.generated_key() {
            let published = hierarchy.self_level().data_owner.encryption_keys()?;
            if published.iter().any(|k| k != new_key) {
                core.key_pair_updates.request_key_pair_update(new_key).await?;
            }
        }
        Ok(core)
    }

    /// Id of the data owner this core acts for
    pub fn self_id(&self) -> &str {
        self.hierarchy.self_id()
    }

    /// Active configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Key hierarchy of the data owner
    pub fn key_hierarchy(&self) -> &KeyHierarchyManager {
        &self.hierarchy
    }

    /// Exchange data of the data owner
    pub fn exchange_data(&self) -> &ExchangeDataManager {
        &self.exchange
    }

    /// Key pair update requests
    pub fn key_pair_updates(&self) -> &KeyPairUpdateManager {
        &self.key_pair_updates
    }

    /// Recovery blobs
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Shamir splits of the data owner's keys
    pub fn shamir(&self) -> &ShamirKeysManager {
        &self.shamir
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of MedCrypt Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        target: std::env::consts::OS,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target operating system
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TEST UTILITIES
// ============================================================================

#[cfg(test)]
pub(crate) mod test_utils {
    use once_cell::sync::Lazy;

    use crate::crypto::{RsaKeyPair, ShaVersion};

    /// Generating RSA keys is slow, so every test shares these
    static TEST_KEYS: Lazy<Vec<RsaKeyPair>> = Lazy::new(|| {
        (0..6)
            .map(|_| RsaKeyPair::generate(1024, ShaVersion::Sha256).expect("test key"))
            .collect()
    });

    pub(crate) fn test_key(index: usize) -> &'static RsaKeyPair {
        &TEST_KEYS[index]
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataOwner, DataOwnerType};
    use crate::test_utils::test_key;

    fn small_keys() -> CoreConfig {
        CoreConfig {
            rsa_key_size_bits: 1024,
            ..CoreConfig::default()
        }
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
    }

    #[test]
    fn test_config_validation() {
        assert!(CoreConfig::default().validate().is_ok());

        let config = CoreConfig {
            rsa_key_size_bits: 512,
            ..CoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = CoreConfig {
            page_size: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"pageSize": 10, "defaultRecoveryLifetimeSecs": 60}"#).unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.default_recovery_lifetime(), Some(Duration::from_secs(60)));
        assert_eq!(config.rsa_key_size_bits, 2048);
    }

    #[tokio::test]
    async fn test_new_key_asks_counterparts_for_access() {
        let backend = Arc::new(MemoryBackend::new());
        let mut hcp = DataOwner::new("hcp-1", DataOwnerType::Hcp);
        hcp.add_public_key(test_key(0).public());
        backend.insert_data_owner(hcp);
        let mut patient = DataOwner::new("p-1", DataOwnerType::Patient);
        patient.add_public_key(test_key(1).public());
        backend.insert_data_owner(patient);

        let hcp_core = CryptoCore::new(
            "hcp-1",
            small_keys(),
            Collaborators::in_memory(backend.clone(), Arc::new(SimpleCryptoStrategies::new())),
        )
        .unwrap();
        hcp_core
            .key_hierarchy()
            .add_recovered_key_pair("hcp-1", test_key(0))
            .await
            .unwrap();
        hcp_core
            .exchange_data()
            .get_or_create_encryption_data_to("p-1")
            .await
            .unwrap();

        // The patient lost key 1 and starts on a fresh device
        let patient_core = CryptoCore::initialize(
            "p-1",
            small_keys(),
            Collaborators::in_memory(backend.clone(), Arc::new(SimpleCryptoStrategies::new())),
        )
        .await
        .unwrap();
        let hierarchy = patient_core
            .key_hierarchy()
            .get_encryption_decryption_keypairs_for_data_owner_hierarchy()
            .await
            .unwrap();
        assert!(hierarchy.generated_key().is_some());

        let pending = hcp_core.key_pair_updates().pending_key_pair_updates(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].responsible, "p-1");
    }

    #[tokio::test]
    async fn test_first_key_sends_no_request() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_data_owner(DataOwner::new("p-1", DataOwnerType::Patient));

        CryptoCore::initialize(
            "p-1",
            small_keys(),
            Collaborators::in_memory(backend.clone(), Arc::new(SimpleCryptoStrategies::new())),
        )
        .await
        .unwrap();

        assert_eq!(backend.request_count("create_maintenance_task"), 0);
        let owner = backend.get_data_owner("p-1").await.unwrap();
        assert_eq!(owner.public_keys_for_oaep_with_sha256.len(), 1);
    }
}
