//! Uniform request view used by matchers, keyers, and the rate limiter.
//!
//! This is deliberately decoupled from `pingora_proxy::Session`: it is an
//! owned, cloneable value so that matcher/keyer/limit logic can be unit
//! tested without standing up a live proxy session.

use std::net::IpAddr;

/// A single HTTP request, as seen by the rate limiter.
///
/// Header names are stored case-insensitively; a request may carry more
/// than one value for a given header name (e.g. repeated `X-Forwarded-For`
/// entries), preserved in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    path: String,
    headers: Vec<(String, String)>,
    remoteaddr: Option<IpAddr>,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: Vec::new(),
            remoteaddr: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_remoteaddr(mut self, addr: IpAddr) -> Self {
        self.remoteaddr = Some(addr);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn remoteaddr(&self) -> Option<IpAddr> {
        self.remoteaddr
    }

    /// True if at least one header with this name (case-insensitive) is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// All values for a header name (case-insensitive), in arrival order.
    pub fn header_values(&self, name: &str) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, comma-joined in arrival order.
    ///
    /// `None` if the header is entirely absent, matching the "missing key
    /// sources make the limit a non-match" rule for keyers.
    pub fn joined_header(&self, name: &str) -> Option<String> {
        let mut values = self.header_values(name).peekable();
        values.peek()?;
        Some(values.collect::<Vec<_>>().join(","))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::new("/x").with_header("Authorization", "Basic 12345");
        assert!(req.has_header("authorization"));
        assert!(req.has_header("AUTHORIZATION"));
        assert_eq!(req.joined_header("authorization").as_deref(), Some("Basic 12345"));
    }

    #[test]
    fn multi_valued_header_joins_in_order() {
        let req = Request::new("/x")
            .with_header("X-Forwarded-For", "1.1.1.1")
            .with_header("X-Forwarded-For", "2.2.2.2");
        assert_eq!(
            req.joined_header("x-forwarded-for").as_deref(),
            Some("1.1.1.1,2.2.2.2")
        );
    }

    #[test]
    fn missing_header_is_none() {
        let req = Request::new("/x");
        assert_eq!(req.joined_header("Authorization"), None);
    }
}
