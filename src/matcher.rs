//! Request matchers.
//!
//! A [`Matcher`] is a total, side-effect-free predicate over a
//! [`Request`]. Regex-bearing variants compile their pattern at
//! construction, so a bad pattern surfaces as a [`ConfigError`] during
//! configuration load rather than during request handling.

use regex::Regex;

use crate::error::ConfigError;
use crate::request::Request;

/// A single predicate over a request.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Matches if the request path matches the regex.
    Path(RegexShim),
    /// Matches if the named header is present at all (any value).
    HeaderPresent { name: String },
    /// Matches if the named header is present and at least one of its
    /// values matches the regex.
    HeaderValue { name: String, pattern: RegexShim },
    /// Matches iff every child matcher matches.
    All(Vec<Matcher>),
    /// Matches iff at least one child matcher matches.
    Any(Vec<Matcher>),
}

impl Matcher {
    pub fn path(pattern: &str) -> Result<Self, ConfigError> {
        Ok(Matcher::Path(RegexShim::new(pattern)?))
    }

    pub fn header_present(name: impl Into<String>) -> Self {
        Matcher::HeaderPresent { name: name.into() }
    }

    pub fn header_value(name: impl Into<String>, pattern: &str) -> Result<Self, ConfigError> {
        Ok(Matcher::HeaderValue {
            name: name.into(),
            pattern: RegexShim::new(pattern)?,
        })
    }

    /// Evaluate this predicate against `request`. Short-circuits on
    /// composite variants.
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Matcher::Path(re) => re.is_match(request.path()),
            Matcher::HeaderPresent { name } => request.has_header(name),
            Matcher::HeaderValue { name, pattern } => request
                .header_values(name)
                .any(|v| pattern.is_match(v)),
            Matcher::All(children) => children.iter().all(|m| m.matches(request)),
            Matcher::Any(children) => children.iter().any(|m| m.matches(request)),
        }
    }
}

/// A regex that carries `PartialEq` by comparing source patterns, so that
/// configuration structs built from it can derive equality for tests.
#[derive(Debug, Clone)]
pub struct RegexShim(Regex);

impl RegexShim {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(RegexShim)
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.0.is_match(haystack)
    }
}

impl PartialEq for RegexShim {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

/// The pair of matcher lists that governs whether a [`crate::limit::Limit`]
/// applies to a request: all of `matches` must pass, and none of
/// `excludes` may pass.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    pub matches: Vec<Matcher>,
    pub excludes: Vec<Matcher>,
}

impl MatchSet {
    pub fn applies(&self, request: &Request) -> bool {
        self.matches.iter().all(|m| m.matches(request))
            && !self.excludes.iter().any(|m| m.matches(request))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_matcher() {
        let m = Matcher::path("^/resources/").unwrap();
        assert!(m.matches(&Request::new("/resources/123")));
        assert!(!m.matches(&Request::new("/other")));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        assert!(matches!(
            Matcher::path("(unclosed"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn header_presence_and_value() {
        let req = Request::new("/x").with_header("Authorization", "Bearer abc");
        assert!(Matcher::header_present("Authorization").matches(&req));
        assert!(!Matcher::header_present("Cookie").matches(&req));

        let re = Matcher::header_value("Authorization", "^Bearer ").unwrap();
        assert!(re.matches(&req));
        let re_basic = Matcher::header_value("Authorization", "^Basic ").unwrap();
        assert!(!re_basic.matches(&req));
    }

    #[test]
    fn match_set_excludes_short_circuit_matches() {
        let req = Request::new("/special/1");
        let set = MatchSet {
            matches: vec![Matcher::path("^/special/").unwrap()],
            excludes: vec![Matcher::header_present("X-Skip")],
        };
        assert!(set.applies(&req));

        let req_skip = Request::new("/special/1").with_header("X-Skip", "1");
        assert!(!set.applies(&req_skip));
    }

    #[test]
    fn empty_match_set_applies_to_everything() {
        let set = MatchSet::default();
        assert!(set.applies(&Request::new("/anything")));
    }
}
