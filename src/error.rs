//! Error kinds for the rate-limit decision engine.
//!
//! `ConfigError` is only ever surfaced at startup or reload. `ErrorFull`
//! and `BackendError` are recovered locally by the enforcement handler.
//! `UpstreamError` is a pass-through from the forwarder.

use thiserror::Error;

/// Malformed configuration: invalid regex, unknown storage type, missing
/// required field. Never produced while handling a request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("unknown storage backend type {0:?}")]
    UnknownStorageType(String),
    #[error("missing required configuration field {0:?}")]
    MissingField(&'static str),
    #[error("limit name {0:?} is used more than once")]
    DuplicateLimitName(String),
    #[error("failed to initialize storage backend: {0}")]
    Storage(String),
    #[error("invalid upstream address {0:?}: expected host:port")]
    InvalidUpstream(String),
    #[error("failed to read configuration file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Storage-backend failure while servicing a single `Add`.
///
/// This is not an enum with `ConfigError` because it can occur mid-request
/// and must never unwind the request pipeline; see [`crate::handler`] for
/// the fail-open handling.
#[derive(Debug, Error, Clone)]
#[error("storage backend error: {0}")]
pub struct BackendError(pub String);

impl From<redis::RedisError> for BackendError {
    fn from(e: redis::RedisError) -> Self {
        BackendError(e.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError(e.to_string())
    }
}

/// Outcome of asking a [`crate::limit::Limit`] or
/// [`crate::rate_limiter::RateLimiter`] to charge a request.
#[derive(Debug, Clone)]
pub enum LimitError {
    /// A matching limit denied the request; the bucket has no capacity
    /// left in the current window.
    Full,
    /// The storage backend could not be reached or timed out.
    Backend(BackendError),
}

impl std::fmt::Display for LimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitError::Full => write!(f, "rate limit exceeded"),
            LimitError::Backend(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LimitError {}
