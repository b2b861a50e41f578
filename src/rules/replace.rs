//! Search-and-replace over the response body.

use std::borrow::Cow;

use axum::http::HeaderMap;
use regex::bytes::Regex;

use crate::rules::condition::{AllOf, Condition};
use crate::rules::{RequestHead, Rule};

/// Replaces every match of `search` in the body.
///
/// The replacement may reference capture groups as `$1` or `${name}`.
#[derive(Debug)]
pub struct ReplaceRule {
    name: String,
    when: AllOf,
    search: Regex,
    replacement: Vec<u8>,
}

impl ReplaceRule {
    pub fn new(name: &str, when: AllOf, search: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            when,
            search: Regex::new(search)?,
            replacement: replacement.as_bytes().to_vec(),
        })
    }
}

impl Rule for ReplaceRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, request: &RequestHead, headers: &HeaderMap) -> bool {
        self.when.matches(request, headers)
    }

    fn execute(&self, _request: &RequestHead, _headers: &mut HeaderMap, body: Vec<u8>) -> Vec<u8> {
        let replaced = match self.search.replace_all(&body, self.replacement.as_slice()) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        replaced.unwrap_or(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::condition::PathCondition;
    use axum::body::Body;
    use axum::http::Request;

    fn head(uri: &str) -> RequestHead {
        RequestHead::from_request(&Request::builder().uri(uri).body(Body::empty()).unwrap())
    }

    #[test]
    fn test_replace_with_captures() {
        let rule = ReplaceRule::new(
            "swap",
            AllOf::default(),
            r"(?P<first>\w+)@(?P<second>\w+)",
            "${second} at ${first}",
        )
        .unwrap();
        let body = rule.execute(&head("/"), &mut HeaderMap::new(), b"mail: alice@example".to_vec());
        assert_eq!(body, b"mail: example at alice");
    }

    #[test]
    fn test_no_match_keeps_body() {
        let rule = ReplaceRule::new("noop", AllOf::default(), "absent", "present").unwrap();
        let body = rule.execute(&head("/"), &mut HeaderMap::new(), b"unchanged".to_vec());
        assert_eq!(body, b"unchanged");
    }

    #[test]
    fn test_conditions_gate_matching() {
        let when = AllOf::new(vec![Box::new(PathCondition::new("^/docs/").unwrap())]);
        let rule = ReplaceRule::new("docs", when, "a", "b").unwrap();
        assert!(rule.matches(&head("/docs/intro"), &HeaderMap::new()));
        assert!(!rule.matches(&head("/blog/intro"), &HeaderMap::new()));
        assert_eq!(rule.name(), "docs");
    }
}
