//! Pluggable leaky-bucket storage.
//!
//! Three backends are provided: [`memory::MemoryStore`] (process-local,
//! bounded LRU), [`redis_like::RedisStore`] (remote key-value, atomic via
//! a Lua script), and [`table_store::TableStore`] (remote table service
//! over HTTP). All three implement [`BucketStore`], so [`crate::limit::Limit`]
//! is storage-agnostic.

pub mod memory;
pub mod redis_like;
pub mod table_store;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ConfigError, LimitError};

/// Snapshot of a single bucket's capacity/remaining/reset, returned after
/// every [`BucketStore::add`] call regardless of outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub capacity: u64,
    pub remaining: u64,
    pub reset: SystemTime,
}

impl BucketState {
    /// Unix timestamp (seconds) of `reset`, saturating at zero for clocks
    /// before the epoch.
    pub fn reset_unix(&self) -> u64 {
        self.reset
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Contract every bucket storage backend implements: atomically decrement
/// the bucket named by `(name, key)` by `n`, creating it full if it doesn't
/// yet exist.
#[async_trait]
pub trait BucketStore: std::fmt::Debug + Send + Sync {
    async fn add(
        &self,
        name: &str,
        key: &str,
        capacity: u64,
        refill: Duration,
        n: u64,
    ) -> (BucketState, Option<LimitError>);
}

/// Computes the post-request bucket state for a fixed-window counter.
///
/// Shared by every backend so the windowing math (`Remaining <= Capacity`,
/// and `Reset` rolls forward by exactly `refill` once it elapses) is
/// defined in exactly one place.
pub(crate) fn apply_window(
    capacity: u64,
    refill: Duration,
    n: u64,
    remaining: u64,
    reset: SystemTime,
    now: SystemTime,
) -> (BucketState, bool) {
    let (remaining, reset) = if now >= reset {
        (capacity, now + refill)
    } else {
        (remaining, reset)
    };

    if remaining >= n {
        (
            BucketState {
                capacity,
                remaining: remaining - n,
                reset,
            },
            true,
        )
    } else {
        (
            BucketState {
                capacity,
                remaining,
                reset,
            },
            false,
        )
    }
}

fn default_max_buckets() -> usize {
    10_000
}

/// Configuration for selecting and constructing a [`BucketStore`]: a `type`
/// tag plus backend-specific fields. An unrecognized `type` value fails
/// deserialization, which the config loader surfaces as a
/// [`ConfigError::Parse`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageConfig {
    Memory {
        #[serde(default = "default_max_buckets")]
        max_buckets: usize,
    },
    RedisLike {
        host: String,
        port: u16,
    },
    TableStore {
        host: String,
        port: u16,
        table: String,
        region: String,
    },
}

impl StorageConfig {
    pub fn build(&self) -> Result<Box<dyn BucketStore>, ConfigError> {
        match self {
            StorageConfig::Memory { max_buckets } => {
                Ok(Box::new(memory::MemoryStore::new(*max_buckets)))
            }
            StorageConfig::RedisLike { host, port } => {
                Ok(Box::new(redis_like::RedisStore::new(host, *port)?))
            }
            StorageConfig::TableStore {
                host,
                port,
                table,
                region,
            } => Ok(Box::new(table_store::TableStore::new(
                host.clone(),
                *port,
                table.clone(),
                region.clone(),
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn window_rolls_forward_on_expiry() {
        let now = SystemTime::now();
        let past_reset = now - Duration::from_secs(1);
        let (state, ok) = apply_window(10, Duration::from_secs(60), 1, 0, past_reset, now);
        assert!(ok);
        assert_eq!(state.remaining, 9);
        assert!(state.reset >= now);
    }

    #[test]
    fn window_rejects_when_exhausted() {
        let now = SystemTime::now();
        let future_reset = now + Duration::from_secs(30);
        let (state, ok) = apply_window(10, Duration::from_secs(60), 1, 0, future_reset, now);
        assert!(!ok);
        assert_eq!(state.remaining, 0);
    }

    #[test]
    fn storage_config_rejects_unknown_type() {
        let parsed: Result<StorageConfig, _> = serde_yaml::from_str("type: carrier-pigeon\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn storage_config_parses_memory_with_default_max_buckets() {
        let parsed: StorageConfig = serde_yaml::from_str("type: memory\n").unwrap();
        assert_eq!(
            parsed,
            StorageConfig::Memory {
                max_buckets: default_max_buckets()
            }
        );
    }

    proptest! {
        /// For any capacity C, across any sequence of Add calls against the
        /// same key within a single refill window, at most C calls return
        /// success, and Remaining is monotonically non-increasing within
        /// that window.
        #[test]
        fn at_most_capacity_successes_within_a_window(capacity in 1u64..50, calls in 1usize..200) {
            let now = SystemTime::now();
            let refill = Duration::from_secs(3600);
            let reset = now + refill;

            let mut remaining = capacity;
            let mut successes = 0u64;

            for _ in 0..calls {
                let (state, ok) = apply_window(capacity, refill, 1, remaining, reset, now);
                prop_assert!(state.remaining <= remaining);
                if ok {
                    successes += 1;
                } else {
                    prop_assert_eq!(state.remaining, 0);
                }
                remaining = state.remaining;
            }

            prop_assert!(successes <= capacity);
        }
    }
}
