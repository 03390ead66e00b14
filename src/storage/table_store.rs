//! Remote table-backed bucket storage over a small HTTP contract.
//!
//! Other deployments of this rate limiter back this storage choice with a
//! managed key/value table service (DynamoDB and the like). Rather than
//! pull in a heavyweight cloud SDK for one backend, this talks to a small
//! REST contract over `reqwest`, the HTTP client already used elsewhere in
//! this crate, against a generic table service:
//!
//! - `GET  /tables/{table}/items/{key}` -> `{ remaining, reset_unix }` or 404
//! - `PUT  /tables/{table}/items/{key}` with an `If-Match: <version>`
//!   header for compare-and-set; `412 Precondition Failed` means a
//!   concurrent writer won the race and the caller should retry once.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{apply_window, BucketState, BucketStore};
use crate::error::{BackendError, LimitError};

#[derive(Debug, Serialize, Deserialize)]
struct Item {
    remaining: u64,
    reset_unix: u64,
    #[serde(default)]
    version: u64,
}

pub struct TableStore {
    client: Client,
    base_url: String,
    table: String,
    region: String,
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("base_url", &self.base_url)
            .field("table", &self.table)
            .field("region", &self.region)
            .finish()
    }
}

impl TableStore {
    pub fn new(host: String, port: u16, table: String, region: String) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("http://{host}:{port}"),
            table,
            region,
        }
    }

    fn item_url(&self, key: &str) -> String {
        format!("{}/tables/{}/items/{}", self.base_url, self.table, key)
    }

    async fn fetch(&self, key: &str) -> Result<Option<Item>, BackendError> {
        let resp = self
            .client
            .get(self.item_url(key))
            .header("X-Table-Region", &self.region)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json::<Item>().await?))
    }

    /// Attempt one compare-and-set write. Returns `Ok(true)` on success,
    /// `Ok(false)` if a concurrent writer won the race (`412`).
    async fn put_if_match(&self, key: &str, item: &Item, expected_version: u64) -> Result<bool, BackendError> {
        let resp = self
            .client
            .put(self.item_url(key))
            .header("X-Table-Region", &self.region)
            .header("If-Match", expected_version.to_string())
            .json(item)
            .send()
            .await?;

        if resp.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(false);
        }
        resp.error_for_status()?;
        Ok(true)
    }
}

#[async_trait]
impl BucketStore for TableStore {
    async fn add(
        &self,
        _name: &str,
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

        // One retry on a lost compare-and-set race, so a bucket update
        // stays atomic without looping forever under sustained contention.
        for _ in 0..2 {
            let now = SystemTime::now();
            let existing = match self.fetch(key).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "table-store backend unavailable");
                    return (zero, Some(LimitError::Backend(e)));
                }
            };

            let (remaining, reset, version) = match &existing {
                Some(item) => (
                    item.remaining,
                    SystemTime::UNIX_EPOCH + Duration::from_secs(item.reset_unix),
                    item.version,
                ),
                None => (capacity, now + refill, 0),
            };

            let (state, ok) = apply_window(capacity, refill, n, remaining, reset, now);

            let next = Item {
                remaining: state.remaining,
                reset_unix: state.reset_unix(),
                version: version + 1,
            };

            match self.put_if_match(key, &next, version).await {
                Ok(true) => {
                    return (
                        state,
                        if ok { None } else { Some(LimitError::Full) },
                    )
                }
                Ok(false) => continue, // lost the race, retry once
                Err(e) => {
                    tracing::warn!(error = %e, "table-store backend write failed");
                    return (zero, Some(LimitError::Backend(e)));
                }
            }
        }

        let err = BackendError("table-store compare-and-set contention exceeded retry budget".into());
        (zero, Some(LimitError::Backend(err)))
    }
}
