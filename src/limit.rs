//! A single named rate-limit rule.

use std::sync::Arc;
use std::time::Duration;

use crate::error::LimitError;
use crate::keyer::Keyer;
use crate::matcher::MatchSet;
use crate::request::Request;
use crate::storage::{BucketState, BucketStore};

/// Immutable once constructed. Shares its storage adapter with sibling
/// `Limit`s in the same [`crate::rate_limiter::RateLimiter`].
#[derive(Debug)]
pub struct Limit {
    name: String,
    match_set: MatchSet,
    keyer: Keyer,
    capacity: u64,
    refill: Duration,
    store: Arc<dyn BucketStore>,
}

impl Limit {
    pub fn new(
        name: impl Into<String>,
        match_set: MatchSet,
        keyer: Keyer,
        capacity: u64,
        refill: Duration,
        store: Arc<dyn BucketStore>,
    ) -> Self {
        Self {
            name: name.into(),
            match_set,
            keyer,
            capacity,
            refill,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this limit's matcher set applies to `request`. Does not
    /// consider key availability; see [`Limit::add`].
    pub fn applies(&self, request: &Request) -> bool {
        self.match_set.applies(request)
    }

    /// Derive the key, charge one token against the backing bucket, and
    /// report the resulting state.
    ///
    /// Returns `None` if a configured key source (a header, or
    /// `remoteaddr`) is missing from the request. That makes the limit a
    /// non-match for this request, distinct from charging it and getting
    /// rejected.
    pub async fn add(&self, request: &Request) -> Option<(BucketState, Option<LimitError>)> {
        let key = self.keyer.key_for(request)?;
        Some(
            self.store
                .add(&self.name, &key, self.capacity, self.refill, 1)
                .await,
        )
    }
}
