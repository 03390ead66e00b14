//! External configuration document loading.
//!
//! The document itself is a plain structured-document format, out of
//! scope for the rate-limit decision engine itself. This module only
//! exists to turn it into the engine's own types
//! ([`crate::rate_limiter::RateLimiter`], an upstream [`HttpPeer`]). The
//! layering here (CLI path -> file contents -> typed document) follows
//! `river`'s `render_config` in shape, simplified to a single YAML source
//! since this document has no CLI/env override surface.

pub mod cli;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pingora_core::upstreams::peer::HttpPeer;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ConfigError;
use crate::keyer::Keyer;
use crate::limit::Limit;
use crate::matcher::{MatchSet, Matcher};
use crate::rate_limiter::RateLimiter;
use crate::storage::StorageConfig;

#[derive(Debug, Deserialize)]
pub struct Document {
    pub proxy: ProxyDoc,
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
pub struct ProxyDoc {
    #[serde(default = "default_handler")]
    pub handler: String,
    pub listen: String,
    pub upstreams: Vec<String>,
    /// Observe and report, never reject. Placed alongside the other
    /// handler settings rather than as a separate top-level key.
    #[serde(default)]
    pub passive: bool,
}

fn default_handler() -> String {
    "http".to_owned()
}

#[derive(Debug, Deserialize, Default)]
struct KeysDoc {
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    remoteaddr: bool,
}

#[derive(Debug, Deserialize, Default)]
struct PathsDoc {
    #[serde(default)]
    match_any: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HeaderMatchDoc {
    name: String,
    #[serde(rename = "match", default)]
    pattern: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MatchSetDoc {
    #[serde(default)]
    paths: PathsDoc,
    #[serde(default)]
    headers: Vec<HeaderMatchDoc>,
}

#[derive(Debug, Deserialize)]
struct LimitDoc {
    interval: u64,
    max: u64,
    #[serde(default)]
    keys: KeysDoc,
    #[serde(default)]
    matches: MatchSetDoc,
    #[serde(default)]
    excludes: MatchSetDoc,
}

fn build_matchers(doc: &MatchSetDoc) -> Result<Vec<Matcher>, ConfigError> {
    let mut matchers = Vec::new();

    if !doc.paths.match_any.is_empty() {
        let mut alts = Vec::with_capacity(doc.paths.match_any.len());
        for pattern in &doc.paths.match_any {
            alts.push(Matcher::path(pattern)?);
        }
        matchers.push(if alts.len() == 1 {
            alts.into_iter().next().unwrap()
        } else {
            Matcher::Any(alts)
        });
    }

    for header in &doc.headers {
        matchers.push(match &header.pattern {
            Some(pattern) => Matcher::header_value(&header.name, pattern)?,
            None => Matcher::header_present(&header.name),
        });
    }

    Ok(matchers)
}

fn build_limit(
    name: &str,
    doc: &LimitDoc,
    store: Arc<dyn crate::storage::BucketStore>,
) -> Result<Limit, ConfigError> {
    let match_set = MatchSet {
        matches: build_matchers(&doc.matches)?,
        excludes: build_matchers(&doc.excludes)?,
    };
    let keyer = Keyer {
        headers: doc.keys.headers.clone(),
        remoteaddr: doc.keys.remoteaddr,
    };
    Ok(Limit::new(
        name,
        match_set,
        keyer,
        doc.max,
        Duration::from_secs(doc.interval),
        store,
    ))
}

/// Read and parse the configuration document at `path`.
pub fn load(path: &Path) -> Result<Document, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let doc: Document = serde_yaml::from_str(&contents)?;
    Ok(doc)
}

/// Build a [`RateLimiter`] from a parsed document. Limit names must be
/// unique within the limiter; limits evaluate in the order they appear in
/// the `limits` mapping, which also determines the tie-break order used
/// when picking which status to report.
pub fn build_rate_limiter(doc: &Document) -> Result<RateLimiter, ConfigError> {
    let store: Arc<dyn crate::storage::BucketStore> = Arc::from(doc.storage.build()?);

    let mut seen = std::collections::HashSet::new();
    let mut limits = Vec::with_capacity(doc.limits.len());

    for (key, value) in doc.limits.iter() {
        let name = key
            .as_str()
            .ok_or(ConfigError::MissingField("limits.<name>"))?
            .to_owned();
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateLimitName(name));
        }
        let limit_doc: LimitDoc = serde_yaml::from_value(Value::clone(value))?;
        limits.push(build_limit(&name, &limit_doc, store.clone())?);
    }

    Ok(RateLimiter::new(limits))
}

/// Resolve the single configured upstream into a pingora peer.
///
/// Only one upstream is supported for now, matching `river`'s own
/// single-peer `MyProxy` (the document field is a list so a future
/// version can add load balancing without a schema change).
pub fn upstream_peer(doc: &Document) -> Result<HttpPeer, ConfigError> {
    let raw = doc
        .proxy
        .upstreams
        .first()
        .ok_or(ConfigError::MissingField("proxy.upstreams"))?;

    let (tls, rest) = if let Some(stripped) = raw.strip_prefix("https://") {
        (true, stripped)
    } else if let Some(stripped) = raw.strip_prefix("http://") {
        (false, stripped)
    } else {
        (false, raw.as_str())
    };

    let addr: SocketAddr = rest
        .parse()
        .map_err(|_| ConfigError::InvalidUpstream(raw.clone()))?;

    Ok(HttpPeer::new(addr, tls, String::new()))
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = r#"
proxy:
  handler: http
  listen: "0.0.0.0:8082"
  upstreams: [ "http://127.0.0.1:9000" ]
storage:
  type: memory
  max_buckets: 1024
limits:
  basic-simple:
    interval: 60
    max: 200
    keys:
      headers: [ "Authorization" ]
    matches:
      paths: { match_any: [ "^/resources/" ] }
  bearer-special:
    interval: 60
    max: 200
    keys:
      headers: [ "Authorization" ]
    matches:
      paths: { match_any: [ "^/special/" ] }
"#;

    #[test]
    fn parses_sample_document_and_preserves_limit_order() {
        let doc: Document = serde_yaml::from_str(SAMPLE).unwrap();
        let names: Vec<_> = doc
            .limits
            .keys()
            .map(|k| k.as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["basic-simple", "bearer-special"]);
    }

    #[test]
    fn builds_rate_limiter_with_matching_limit_count() {
        let doc: Document = serde_yaml::from_str(SAMPLE).unwrap();
        let limiter = build_rate_limiter(&doc).unwrap();
        assert_eq!(limiter.limits().len(), 2);
    }

    #[test]
    fn unknown_storage_type_fails_to_parse() {
        let bad = SAMPLE.replace("type: memory", "type: smoke-signal");
        let doc: Result<Document, _> = serde_yaml::from_str(&bad);
        assert!(doc.is_err());
    }

    #[test]
    fn resolves_single_upstream_peer() {
        let doc: Document = serde_yaml::from_str(SAMPLE).unwrap();
        assert!(upstream_peer(&doc).is_ok());
    }
}
