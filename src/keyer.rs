//! Turns a request into the bucket key a [`crate::limit::Limit`] charges.
//!
//! A missing configured key source (a header that isn't present, or
//! `remoteaddr` when none is known) makes the limit a non-match for that
//! request rather than keying on a placeholder value. The limit's own name
//! is *not* part of this key. Storage indexes buckets by `(limit-name,
//! key)` as a pair, so the name is supplied separately when the key reaches
//! [`crate::storage`].

use crate::request::Request;

/// Builds the key material for one [`crate::limit::Limit`], from its
/// configured header and `remoteaddr` sources.
///
/// Each configured header's own multiple values are joined by `,` in
/// arrival order before the header list itself is joined by `|`.
#[derive(Debug, Clone, Default)]
pub struct Keyer {
    pub headers: Vec<String>,
    pub remoteaddr: bool,
}

impl Keyer {
    /// Compute the key for `request`, or `None` if any configured source
    /// is missing. A `Keyer` with no configured sources always returns the
    /// empty string, giving a single global bucket for its limit.
    pub fn key_for(&self, request: &Request) -> Option<String> {
        let mut parts = Vec::with_capacity(self.headers.len() + 1);

        for header in &self.headers {
            parts.push(request.joined_header(header)?);
        }

        if self.remoteaddr {
            parts.push(request.remoteaddr()?.to_string());
        }

        Some(parts.join("|"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn keys_on_header_value() {
        let keyer = Keyer {
            headers: vec!["Authorization".to_owned()],
            remoteaddr: false,
        };
        let req = Request::new("/x").with_header("Authorization", "Basic 12345");
        assert_eq!(keyer.key_for(&req), Some("Basic 12345".to_owned()));
    }

    #[test]
    fn missing_header_is_non_match() {
        let keyer = Keyer {
            headers: vec!["Authorization".to_owned()],
            remoteaddr: false,
        };
        assert_eq!(keyer.key_for(&Request::new("/x")), None);
    }

    #[test]
    fn keys_on_remoteaddr() {
        let keyer = Keyer {
            headers: vec![],
            remoteaddr: true,
        };
        let req = Request::new("/x").with_remoteaddr(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(keyer.key_for(&req), Some("127.0.0.1".to_owned()));
    }

    #[test]
    fn multiple_sources_join_with_pipe() {
        let keyer = Keyer {
            headers: vec!["Authorization".to_owned()],
            remoteaddr: true,
        };
        let req = Request::new("/x")
            .with_header("Authorization", "Basic 12345")
            .with_remoteaddr(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(keyer.key_for(&req), Some("Basic 12345|127.0.0.1".to_owned()));
    }

    #[test]
    fn no_key_sources_is_a_single_global_key() {
        let keyer = Keyer::default();
        let req = Request::new("/x");
        assert_eq!(keyer.key_for(&req), Some(String::new()));
    }
}
