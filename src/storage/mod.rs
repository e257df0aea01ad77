//! # Storage Module
//!
//! Caller-supplied storage for key material and small cached markers.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyStorageFacade (key material)                                │   │
//! │  │  ───────────────────────────────                                 │   │
//! │  │                                                                 │   │
//! │  │  • device key pairs            {publicKey, privateKey} JWK      │   │
//! │  │  • recovered key pairs         {publicKey, privateKey} JWK      │   │
//! │  │  • signature verification keys public JWK only                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  StorageFacade (opaque strings)                                 │   │
//! │  │  ──────────────────────────────                                  │   │
//! │  │                                                                 │   │
//! │  │  • verified keys: fingerprint → authentic? per data owner       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Entry keys come from a StorageEntryKeysFactory, swappable to read    │
//! │  what older deployments already wrote.                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core never implements platform storage; [`MemoryStorage`] and
//! [`MemoryKeyStorage`] are provided for tests and embedding.

mod key_store;
mod memory;

pub use key_store::KeyStore;
pub use memory::{MemoryKeyStorage, MemoryStorage};

use async_trait::async_trait;

use crate::crypto::{Jwk, KeyPair};
use crate::error::Result;

/// Opaque string storage
#[async_trait]
pub trait StorageFacade: Send + Sync {
    /// Read an item
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write an item
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Delete an item; missing items are not an error
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// Storage for key material
#[async_trait]
pub trait KeyStorageFacade: Send + Sync {
    /// Read a key pair
    async fn get_keypair(&self, key: &str) -> Result<Option<KeyPair<Jwk>>>;

    /// Write a key pair
    async fn store_keypair(&self, key: &str, key_pair: &KeyPair<Jwk>) -> Result<()>;

    /// Delete a key pair; missing entries are not an error
    async fn delete_keypair(&self, key: &str) -> Result<()>;

    /// Read a lone public key
    async fn get_public_key(&self, key: &str) -> Result<Option<Jwk>>;

    /// Write a lone public key
    async fn store_public_key(&self, key: &str, public_key: &Jwk) -> Result<()>;
}

/// Names the storage entries used by the core
pub trait StorageEntryKeysFactory: Send + Sync {
    /// Key pair created on this device
    fn device_keypair_of_data_owner(&self, data_owner_id: &str, fingerprint: &str) -> String;

    /// Key pair obtained through recovery
    fn cached_recovered_keypair_of_data_owner(
        &self,
        data_owner_id: &str,
        fingerprint: &str,
    ) -> String;

    /// Authenticity judgments on the keys of a data owner
    fn self_verified_keys_of_data_owner(&self, data_owner_id: &str) -> String;

    /// Public key kept to check old delegator signatures
    fn signature_verification_key_for_data_owner(
        &self,
        data_owner_id: &str,
        fingerprint: &str,
    ) -> String;
}

/// Entry keys under a fixed prefix
#[derive(Debug, Clone)]
pub struct DefaultStorageEntryKeysFactory {
    prefix: String,
}

impl DefaultStorageEntryKeysFactory {
    /// Factory with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for DefaultStorageEntryKeysFactory {
    fn default() -> Self {
        Self::with_prefix("org.medcrypt")
    }
}

impl StorageEntryKeysFactory for DefaultStorageEntryKeysFactory {
    fn device_keypair_of_data_owner(&self, data_owner_id: &str, fingerprint: &str) -> String {
        format!("{}.keypair.device.{}.{}", self.prefix, data_owner_id, fingerprint)
    }

    fn cached_recovered_keypair_of_data_owner(
        &self,
        data_owner_id: &str,
        fingerprint: &str,
    ) -> String {
        format!("{}.keypair.recovered.{}.{}", self.prefix, data_owner_id, fingerprint)
    }

    fn self_verified_keys_of_data_owner(&self, data_owner_id: &str) -> String {
        format!("{}.verified-keys.{}", self.prefix, data_owner_id)
    }

    fn signature_verification_key_for_data_owner(
        &self,
        data_owner_id: &str,
        fingerprint: &str,
    ) -> String {
        format!("{}.signature-key.{}.{}", self.prefix, data_owner_id, fingerprint)
    }
}
