//! # Exchange Data Directory
//!
//! Cached access to exchange data maps.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_exchange_data_maps(batch)                                       │
//! │                                                                         │
//! │  batch ──► drop ids already known ──► one shared create request        │
//! │                                            │                            │
//! │             every id of the batch awaits ◄─┘  then is known forever    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Map ids are hashes of access control keys, so a cached map never goes
//! stale and neither cache expires.

use std::sync::Arc;

use futures::future::{try_join_all, FutureExt};
use tracing::debug;

use crate::api::{ExchangeDataMapApi, ExchangeDataMapBatch};
use crate::cache::AsyncCache;
use crate::error::{Error, Result};
use crate::model::ExchangeDataMap;

/// Cached front of the exchange data map API
#[derive(Clone)]
pub struct ExchangeDataDirectory {
    api: Arc<dyn ExchangeDataMapApi>,
    known: AsyncCache<String, ()>,
    maps: AsyncCache<String, ExchangeDataMap>,
}

impl ExchangeDataDirectory {
    /// Create a directory keeping at most `cache_size` ids per cache
    pub fn new(api: Arc<dyn ExchangeDataMapApi>, cache_size: usize) -> Self {
        Self {
            api,
            known: AsyncCache::permanent(cache_size),
            maps: AsyncCache::permanent(cache_size),
        }
    }

    /// Make sure every map of the batch exists
    ///
    /// Ids already known are skipped; the rest go out in a single request
    /// that concurrent callers for the same ids wait on.
    pub async fn create_exchange_data_maps(&self, batch: ExchangeDataMapBatch) -> Result<()> {
        let missing: ExchangeDataMapBatch = batch
            .into_iter()
            .filter(|(id, _)| self.known.get_if_cached(id).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        debug!("Creating {} exchange data maps", missing.len());

        let ids: Vec<String> = missing.keys().cloned().collect();
        let api = Arc::clone(&self.api);
        let request = async move { api.create_exchange_data_map_batch(&missing).await }
            .boxed()
            .shared();

        try_join_all(ids.into_iter().map(|id| {
            let request = request.clone();
            self.known.get(id, move || request)
        }))
        .await?;
        Ok(())
    }

    /// Fetch a map, `None` if it does not exist
    pub async fn get_exchange_data_map(&self, id: &str) -> Result<Option<ExchangeDataMap>> {
        let api = Arc::clone(&self.api);
        let owned_id = id.to_string();
        let loaded = self
            .maps
            .get(id.to_string(), move || async move {
                api.get_exchange_data_map_by_id(&owned_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("exchange data map {}", owned_id)))
            })
            .await;

        match loaded {
            Ok(map) => {
                self.mark_known(&map.id).await;
                Ok(Some(map))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch the existing maps among `ids`, in one request for the uncached ones
    pub async fn get_exchange_data_map_batch(&self, ids: &[String]) -> Result<Vec<ExchangeDataMap>> {
        let mut found = Vec::with_capacity(ids.len());
        let mut uncached = Vec::new();
        for id in ids {
            match self.maps.get_if_cached(id) {
                Some(map) => found.push(map),
                None => uncached.push(id.clone()),
            }
        }
        if uncached.is_empty() {
            return Ok(found);
        }

        for map in self.api.get_exchange_data_map_by_batch(&uncached).await? {
            let cached = map.clone();
            self.maps
                .get(map.id.clone(), move || async move { Ok(cached) })
                .await?;
            self.mark_known(&map.id).await;
            found.push(map);
        }
        Ok(found)
    }

    async fn mark_known(&self, id: &str) {
        // The loader can not fail
        let _ = self
            .known
            .get(id.to_string(), || futures::future::ready(Ok(())))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryBackend;

    fn batch(ids: &[&str]) -> ExchangeDataMapBatch {
        ids.iter()
            .map(|id| {
                let encrypted = [("fp".to_string(), format!("enc-{}", id))].into_iter().collect();
                (id.to_string(), encrypted)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_known_ids_are_not_created_again() {
        let backend = Arc::new(MemoryBackend::new());
        let directory = ExchangeDataDirectory::new(backend.clone(), 100);

        directory.create_exchange_data_maps(batch(&["a", "b"])).await.unwrap();
        directory.create_exchange_data_maps(batch(&["a", "b"])).await.unwrap();
        assert_eq!(backend.request_count("create_exchange_data_map_batch"), 1);

        directory.create_exchange_data_maps(batch(&["b", "c"])).await.unwrap();
        assert_eq!(backend.request_count("create_exchange_data_map_batch"), 2);
        assert!(backend.get_exchange_data_map_by_id("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_creations_share_one_request() {
        let backend = Arc::new(MemoryBackend::new());
        let directory = ExchangeDataDirectory::new(backend.clone(), 100);

        let calls = (0..5).map(|_| directory.create_exchange_data_maps(batch(&["x", "y"])));
        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }
        assert_eq!(backend.request_count("create_exchange_data_map_batch"), 1);
    }

    #[tokio::test]
    async fn test_get_caches_existing_maps_only() {
        let backend = Arc::new(MemoryBackend::new());
        let directory = ExchangeDataDirectory::new(backend.clone(), 100);

        assert!(directory.get_exchange_data_map("a").await.unwrap().is_none());
        backend.create_exchange_data_map_batch(&batch(&["a"])).await.unwrap();

        let map = directory.get_exchange_data_map("a").await.unwrap().unwrap();
        assert_eq!(map.encrypted_exchange_data_ids["fp"], "enc-a");
        directory.get_exchange_data_map("a").await.unwrap();
        assert_eq!(backend.request_count("get_exchange_data_map_by_id"), 2);

        // Fetched maps count as created
        directory.create_exchange_data_maps(batch(&["a"])).await.unwrap();
        assert_eq!(backend.request_count("create_exchange_data_map_batch"), 1);
    }

    #[tokio::test]
    async fn test_batch_fetch() {
        let backend = Arc::new(MemoryBackend::new());
        let directory = ExchangeDataDirectory::new(backend.clone(), 100);
        backend
            .create_exchange_data_map_batch(&batch(&["a", "b"]))
            .await
            .unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        assert_eq!(directory.get_exchange_data_map_batch(&ids).await.unwrap().len(), 2);
        assert_eq!(directory.get_exchange_data_map_batch(&ids[..2]).await.unwrap().len(), 2);
        assert_eq!(backend.request_count("get_exchange_data_map_by_batch"), 1);
    }
}
