//! # In-Memory Storage
//!
//! Process-local implementations of the storage facades.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MemoryKeyStorage::with_encryption(key)                                │
//! │                                                                         │
//! │  entry key ──► seal(AES-256-GCM, json(JWK pair), aad = entry key)      │
//! │                                                                         │
//! │  The entry key is the AAD, so a blob copied under another entry key   │
//! │  no longer opens.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use zeroize::Zeroizing;

use super::{KeyStorageFacade, StorageFacade};
use crate::crypto::{open, seal, EncryptionKey, Jwk, KeyPair};
use crate::error::{Error, Result};

/// In-memory [`StorageFacade`]
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageFacade for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().remove(key);
        Ok(())
    }
}

/// In-memory [`KeyStorageFacade`]
///
/// Entries are stored as JSON, optionally sealed with an encryption key.
pub struct MemoryKeyStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    encryption_key: Option<EncryptionKey>,
}

impl MemoryKeyStorage {
    /// Create a plain key storage
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            encryption_key: None,
        }
    }

    /// Create a key storage that encrypts every entry
    pub fn with_encryption(key: [u8; 32]) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            encryption_key: Some(EncryptionKey::from_bytes(key)),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store_raw(&self, key: &str, json: &[u8]) -> Result<()> {
        let data = match self.encryption_key {
            Some(ref enc_key) => seal(enc_key, json, key.as_bytes())?,
            None => json.to_vec(),
        };
        self.entries.write().insert(key.to_string(), data);
        Ok(())
    }

    fn retrieve_raw(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let data = match self.entries.read().get(key) {
            Some(d) => d.clone(),
            None => return Ok(None),
        };
        let plaintext = match self.encryption_key {
            Some(ref enc_key) => open(enc_key, &data, key.as_bytes())
                .map_err(|e| Error::StorageReadError(format!("{}: {}", key, e)))?,
            None => data,
        };
        Ok(Some(Zeroizing::new(plaintext)))
    }

    fn retrieve_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.retrieve_raw(key)? {
            Some(json) => serde_json::from_slice(&json)
                .map(Some)
                .map_err(|e| Error::StorageReadError(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn store_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| Error::StorageWriteError(e.to_string()))?,
        );
        self.store_raw(key, &json)
    }
}

impl Default for MemoryKeyStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStorageFacade for MemoryKeyStorage {
    async fn get_keypair(&self, key: &str) -> Result<Option<KeyPair<Jwk>>> {
        self.retrieve_json(key)
    }

    async fn store_keypair(&self, key: &str, key_pair: &KeyPair<Jwk>) -> Result<()> {
        self.store_json(key, key_pair)
    }

    async fn delete_keypair(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn get_public_key(&self, key: &str) -> Result<Option<Jwk>> {
        self.retrieve_json(key)
    }

    async fn store_public_key(&self, key: &str, public_key: &Jwk) -> Result<()> {
        self.store_json(key, public_key)
    }
}

// ============================================================================
// TESTS
// ============================================================================
