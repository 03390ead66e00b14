//! In-process bucket storage.
//!
//! Modeled on `river`'s `Rater`: a bounded LRU cache of live buckets, so
//! that the number of distinct keys resident in memory is capped without a
//! background task to cull expired entries. Unused buckets simply fall out
//! of the cache. Unlike `river`'s `Rater` (which caches a
//! `leaky_bucket::RateLimiter` queue per key), the cached value here is the
//! explicit `(remaining, reset)` bucket state this storage's callers need.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use concread::arcache::{ARCache, ARCacheBuilder};

use super::{apply_window, BucketState, BucketStore};
use crate::error::LimitError;

/// Expected concurrent reader threads, used only to size the cache's
/// internal sharding. Matches the proxy's default worker-thread count.
const EXPECTED_THREADS: usize = 8;

#[derive(Debug)]
struct Cell {
    remaining: u64,
    reset: SystemTime,
}

pub struct MemoryStore {
    cache: ARCache<String, Arc<Mutex<Cell>>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MemoryStore { .. }")
    }
}

impl MemoryStore {
    pub fn new(max_buckets: usize) -> Self {
        let cache = ARCacheBuilder::new()
            .set_expected_workload(max_buckets.max(1), EXPECTED_THREADS, 1, 1, false)
            .build()
            .expect("creation of bucket cache should not fail");
        Self { cache }
    }

    fn bucket_id(name: &str, key: &str) -> String {
        // NUL can't appear in either component, so this can't collide
        // across limit names the way a plain concatenation could.
        format!("{name}\0{key}")
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn add(
        &self,
        name: &str,
        key: &str,
        capacity: u64,
        refill: Duration,
        n: u64,
    ) -> (BucketState, Option<LimitError>) {
        let id = Self::bucket_id(name, key);
        let now = SystemTime::now();

        let cell = {
            let mut reader = self.cache.read();
            if let Some(found) = reader.get(&id) {
                found.clone()
            } else {
                tracing::debug!(bucket = %id, "rate limiting memory cache miss");
                let cell = Arc::new(Mutex::new(Cell {
                    remaining: capacity,
                    reset: now + refill,
                }));
                reader.insert(id, cell.clone());
                reader.finish();
                cell
            }
        };

        let mut guard = cell.lock().expect("bucket mutex poisoned");
        let (state, ok) = apply_window(capacity, refill, n, guard.remaining, guard.reset, now);
        guard.remaining = state.remaining;
        guard.reset = state.reset;
        drop(guard);

        if ok {
            (state, None)
        } else {
            (state, Some(LimitError::Full))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn exhausts_after_capacity_requests() {
        let store = MemoryStore::new(16);
        let refill = Duration::from_secs(60);

        for i in 0..5 {
            let (state, err) = store.add("limit", "key", 5, refill, 1).await;
            assert!(err.is_none(), "request {i} should be accepted");
            assert_eq!(state.remaining, 4 - i as u64);
        }

        let (state, err) = store.add("limit", "key", 5, refill, 1).await;
        assert!(matches!(err, Some(LimitError::Full)));
        assert_eq!(state.remaining, 0);
    }

    #[tokio::test]
    async fn distinct_keys_have_independent_buckets() {
        let store = MemoryStore::new(16);
        let refill = Duration::from_secs(60);

        let (a, _) = store.add("limit", "alice", 5, refill, 1).await;
        let (b, _) = store.add("limit", "bob", 5, refill, 1).await;
        assert_eq!(a.remaining, 4);
        assert_eq!(b.remaining, 4);
    }

    #[tokio::test]
    async fn distinct_limit_names_do_not_collide() {
        let store = MemoryStore::new(16);
        let refill = Duration::from_secs(60);

        let (a, _) = store.add("limit-a", "same-key", 5, refill, 1).await;
        let (b, _) = store.add("limit-b", "same-key", 5, refill, 1).await;
        assert_eq!(a.remaining, 4);
        assert_eq!(b.remaining, 4);
    }
}
