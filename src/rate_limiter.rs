//! Ordered aggregation of [`Limit`]s.

use std::time::SystemTime;

use crate::error::LimitError;
use crate::limit::Limit;
use crate::request::Request;
use crate::storage::BucketState;

/// Per-limit result reported back to callers after a decision, whether or
/// not that limit ultimately rejected the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub name: String,
    pub capacity: u64,
    pub remaining: u64,
    pub reset: SystemTime,
}

impl Status {
    fn from_state(name: &str, state: BucketState) -> Self {
        Self {
            name: name.to_owned(),
            capacity: state.capacity,
            remaining: state.remaining,
            reset: state.reset,
        }
    }

    /// The synthetic status reported when no limit matched a request:
    /// "unrestricted".
    pub fn nil() -> Self {
        Self {
            name: "Unknown".to_owned(),
            capacity: 1,
            remaining: 1,
            reset: SystemTime::now(),
        }
    }

    pub fn is_nil(&self) -> bool {
        self.name == "Unknown" && self.capacity == 1
    }

    pub fn reset_unix(&self) -> u64 {
        self.reset
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Owns an ordered sequence of [`Limit`]s. Immutable after construction:
/// reconfiguration always builds a new `RateLimiter` and swaps it in (see
/// [`crate::daemon::Daemon`]).
#[derive(Debug)]
pub struct RateLimiter {
    limits: Vec<Limit>,
}

/// The per-request result of evaluating every matching limit.
#[derive(Debug)]
pub struct Decision {
    /// One entry per limit whose matcher (and keyer) applied, in
    /// configuration order, up to and including the first rejecting
    /// limit.
    pub statuses: Vec<Status>,
    /// `Err` if the first rejecting limit failed closed (`Full`) or the
    /// backend it depends on errored (`Backend`).
    pub outcome: Result<(), LimitError>,
}

impl Decision {
    /// The status to report in response headers: the matching status with
    /// minimum `Remaining`, tie-broken by earliest `Reset`, then earliest
    /// configuration order. Falls back to [`Status::nil`] when no limit
    /// matched.
    pub fn reported(&self) -> Status {
        self.statuses
            .iter()
            .min_by(|a, b| a.remaining.cmp(&b.remaining).then(a.reset.cmp(&b.reset)))
            .cloned()
            .unwrap_or_else(Status::nil)
    }
}

impl RateLimiter {
    pub fn new(limits: Vec<Limit>) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &[Limit] {
        &self.limits
    }

    /// Evaluate every limit against `request`, in configuration order,
    /// stopping at the first one that rejects.
    pub async fn decide(&self, request: &Request) -> Decision {
        let mut statuses = Vec::new();

        for limit in &self.limits {
            if !limit.applies(request) {
                continue;
            }

            let Some((state, err)) = limit.add(request).await else {
                // Matcher matched but a configured key source (header,
                // remoteaddr) was missing, so treat it as a non-match.
                continue;
            };

            tracing::trace!(
                limit = limit.name(),
                remaining = state.remaining,
                "rate limit evaluated"
            );
            statuses.push(Status::from_state(limit.name(), state));

            if let Some(err) = err {
                return Decision {
                    statuses,
                    outcome: Err(err),
                };
            }
        }

        Decision {
            statuses,
            outcome: Ok(()),
        }
    }
}
