//! # Async Cache
//!
//! Bounded LRU cache with per-entry expiry and single-flight loading.
//!
//! ## Entry Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ENTRY LIFECYCLE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   (absent) ──get──► Loading ──Ok──► Ready ──expired / evicted──► (absent)
//! │                        │                                                │
//! │                        └──Err──► (absent)    errors are never cached   │
//! │                                                                         │
//! │   While Loading, every `get` for the key awaits the same shared         │
//! │   future: the loader runs once and all callers see the same result.    │
//! │                                                                         │
//! │   Eviction only picks Ready entries, least recently used first, so an  │
//! │   in-flight load is never dropped from under its waiters.              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an
//! await point.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::Result;

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V>>>;
type ExpiryFn<V> = dyn Fn(&V) -> Option<Duration> + Send + Sync;

enum Slot<V> {
    Loading {
        generation: u64,
        future: SharedLoad<V>,
    },
    Ready {
        value: V,
        expires_at: Option<Instant>,
        last_used: u64,
    },
}

struct CacheState<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// Access counter used as LRU clock
    tick: u64,
    /// Identifies loads, so an invalidated load does not repopulate
    generation: u64,
}

/// Generic async cache
///
/// Cloning is cheap and clones share the same entries.
pub struct AsyncCache<K, V> {
    state: Arc<Mutex<CacheState<K, V>>>,
    max_size: usize,
    expiry: Arc<ExpiryFn<V>>,
}

impl<K, V> Clone for AsyncCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            max_size: self.max_size,
            expiry: Arc::clone(&self.expiry),
        }
    }
}

impl<K, V> AsyncCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `max_size` loaded entries
    ///
    /// `expiry` gives the lifetime of a freshly loaded value; `None` keeps
    /// it until evicted.
    pub fn new<E>(max_size: usize, expiry: E) -> Self
    where
        E: Fn(&V) -> Option<Duration> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
                generation: 0,
            })),
            max_size: max_size.max(1),
            expiry: Arc::new(expiry),
        }
    }

    /// Cache whose entries never expire
    pub fn permanent(max_size: usize) -> Self {
        Self::new(max_size, |_| None)
    }

    /// Cache whose entries all live for `ttl`
    pub fn with_ttl(max_size: usize, ttl: Duration) -> Self {
        Self::new(max_size, move |_| Some(ttl))
    }

    /// Get a value, loading it if missing
    ///
    /// Concurrent calls for the same missing key run `loader` once. A failed
    /// load is handed to every waiter and then forgotten.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (future, generation) = {
            // Scoped so an unused loader is not held across the await
            let loader = loader;
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.tick += 1;
            let tick = state.tick;
            remove_if_expired(&mut state.entries, &key);

            match state.entries.get_mut(&key) {
                Some(Slot::Ready {
                    value, last_used, ..
                }) => {
                    *last_used = tick;
                    return Ok(value.clone());
                }
                Some(Slot::Loading { generation, future }) => (future.clone(), *generation),
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let future = loader().boxed().shared();
                    state.entries.insert(
                        key.clone(),
                        Slot::Loading {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (future, generation)
                }
            }
        };

        let result = future.await;
        self.complete(key, generation, &result);
        result
    }

    /// Record the outcome of a load, once per generation
    fn complete(&self, key: K, generation: u64, result: &Result<V>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let current = matches!(
            state.entries.get(&key),
            Some(Slot::Loading { generation: g, .. }) if *g == generation
        );
        if !current {
            return;
        }

        match result {
            Ok(value) => {
                state.tick += 1;
                let expires_at = (self.expiry)(value).map(|ttl| Instant::now() + ttl);
                state.entries.insert(
                    key,
                    Slot::Ready {
                        value: value.clone(),
                        expires_at,
                        last_used: state.tick,
                    },
                );
                evict_overflow(&mut state.entries, self.max_size);
            }
            Err(_) => {
                state.entries.remove(&key);
            }
        }
    }

    /// Get a loaded, unexpired value without loading
    pub fn get_if_cached(&self, key: &K) -> Option<V> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;
        let tick = state.tick;
        remove_if_expired(&mut state.entries, key);

        match state.entries.get_mut(key) {
            Some(Slot::Ready {
                value, last_used, ..
            }) => {
                *last_used = tick;
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Drop an entry; an in-flight load for it will not be stored
    pub fn invalidate(&self, key: &K) {
        self.state.lock().entries.remove(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Number of entries, loading ones included
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entry
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_if_expired<K: Hash + Eq, V>(entries: &mut HashMap<K, Slot<V>>, key: &K) {
    let expired = matches!(
        entries.get(key),
        Some(Slot::Ready { expires_at: Some(at), .. }) if *at <= Instant::now()
    );
    if expired {
        entries.remove(key);
    }
}

fn evict_overflow<K: Hash + Eq + Clone, V>(entries: &mut HashMap<K, Slot<V>>, max_size: usize) {
    let now = Instant::now();
    entries.retain(|_, slot| {
        !matches!(slot, Slot::Ready { expires_at: Some(at), .. } if *at <= now)
    });

    while entries.len() > max_size {
        let oldest = entries
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready { last_used, .. } => Some((*last_used, key)),
                Slot::Loading { .. } => None,
            })
            .min_by_key(|(last_used, _)| *last_used)
            .map(|(_, key)| key.clone());

        match oldest {
            Some(key) => {
                entries.remove(&key);
            }
            // Only in-flight loads left
            None => break,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
