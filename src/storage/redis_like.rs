//! Remote key-value bucket storage over a Redis-compatible protocol.
//!
//! Grounded on `psenger-throttler`'s `redis.rs`: a Lua script performs the
//! whole read-refill-decrement-write cycle server-side so that concurrent
//! callers racing on the same key stay linearizable, the same way that
//! crate's `atomic_consume_tokens` avoids the lost-update race its own
//! module docs diagram.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tokio::sync::OnceCell;

use super::{BucketState, BucketStore};
use crate::error::{BackendError, LimitError};

/// `KEYS[1]` = bucket id, `ARGV` = capacity, refill_secs, n, now_secs.
/// Returns `{success, remaining, reset}`.
const SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
local capacity = tonumber(ARGV[1])
local refill = tonumber(ARGV[2])
local n = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local remaining
local reset
if existing then
    local sep = string.find(existing, ",")
    remaining = tonumber(string.sub(existing, 1, sep - 1))
    reset = tonumber(string.sub(existing, sep + 1))
else
    remaining = capacity
    reset = now + refill
end

if now >= reset then
    remaining = capacity
    reset = now + refill
end

local success
if remaining >= n then
    remaining = remaining - n
    success = 1
else
    success = 0
end

redis.call('SET', KEYS[1], remaining .. ',' .. reset, 'EX', refill * 2)
return {success, remaining, reset}
"#;

pub struct RedisStore {
    client: Client,
    manager: OnceCell<ConnectionManager>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RedisStore { .. }")
    }
}

impl RedisStore {
    pub fn new(host: &str, port: u16) -> Result<Self, crate::error::ConfigError> {
        let client = Client::open(format!("redis://{host}:{port}"))
            .map_err(|e| crate::error::ConfigError::Storage(e.to_string()))?;
        Ok(Self {
            client,
            manager: OnceCell::new(),
        })
    }

    async fn manager(&self) -> Result<ConnectionManager, BackendError> {
        self.manager
            .get_or_try_init(|| async { self.client.get_tokio_connection_manager().await })
            .await
            .map(Clone::clone)
            .map_err(BackendError::from)
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn add(
        &self,
        name: &str,
        key: &str,
        capacity: u64,
        refill: Duration,
        n: u64,
    ) -> (BucketState, Option<LimitError>) {
        let zero = BucketState {
            capacity,
            remaining: 0,
            reset: SystemTime::now(),
        };

        let mut manager = match self.manager().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "redis-like backend unavailable");
                return (zero, Some(LimitError::Backend(e)));
            }
        };

        let now_secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let refill_secs = refill.as_secs().max(1);

        let result: redis::RedisResult<Vec<i64>> = Script::new(SCRIPT)
            .key(format!("ratelimit:{name}:{key}"))
            .arg(capacity)
            .arg(refill_secs)
            .arg(n)
            .arg(now_secs)
            .invoke_async(&mut manager)
            .await;

        match result {
            Ok(values) if values.len() == 3 => {
                let state = BucketState {
                    capacity,
                    remaining: values[1] as u64,
                    reset: SystemTime::UNIX_EPOCH + Duration::from_secs(values[2] as u64),
                };
                if values[0] == 1 {
                    (state, None)
                } else {
                    (state, Some(LimitError::Full))
                }
            }
            Ok(_) => {
                let err = BackendError("malformed response from rate-limit script".into());
                tracing::warn!(error = %err, "redis-like backend returned unexpected shape");
                (zero, Some(LimitError::Backend(err)))
            }
            Err(e) => {
                let err = BackendError::from(e);
                tracing::warn!(error = %err, "redis-like backend call failed");
                (zero, Some(LimitError::Backend(err)))
            }
        }
    }
}
