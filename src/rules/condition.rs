//! Rule conditions.
//!
//! # Responsibilities
//! - Match the request path (regex, case-sensitive)
//! - Match the response `Content-Type` (regex, missing header = "")
//! - Match an arbitrary response header
//! - Combine conditions with AND semantics, negate single conditions
//!
//! # Design Decisions
//! - Patterns are unanchored unless the pattern anchors itself
//! - Empty AllOf = always matches (wildcard)

use axum::http::{header::CONTENT_TYPE, HeaderMap, HeaderName};
use regex::Regex;

use crate::rules::RequestHead;

/// A single predicate over a request/response pair.
pub trait Condition: Send + Sync + std::fmt::Debug {
    fn matches(&self, request: &RequestHead, headers: &HeaderMap) -> bool;
}

/// Matches the request path.
#[derive(Debug, Clone)]
pub struct PathCondition {
    pattern: Regex,
}

impl PathCondition {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Condition for PathCondition {
    fn matches(&self, request: &RequestHead, _headers: &HeaderMap) -> bool {
        self.pattern.is_match(request.path())
    }
}

/// Matches the response `Content-Type`.
#[derive(Debug, Clone)]
pub struct ContentTypeCondition {
    pattern: Regex,
}

impl ContentTypeCondition {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Condition for ContentTypeCondition {
    fn matches(&self, _request: &RequestHead, headers: &HeaderMap) -> bool {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        self.pattern.is_match(content_type)
    }
}

#[derive(Debug)]
pub enum HeaderConditionError {
    Name(String),
    Pattern(regex::Error),
}

/// Matches any value of a named response header.
#[derive(Debug, Clone)]
pub struct HeaderCondition {
    name: HeaderName,
    pattern: Regex,
}

impl HeaderCondition {
    pub fn new(name: &str, pattern: &str) -> Result<Self, HeaderConditionError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HeaderConditionError::Name(e.to_string()))?;
        let pattern = Regex::new(pattern).map_err(HeaderConditionError::Pattern)?;
        Ok(Self { name, pattern })
    }
}

impl Condition for HeaderCondition {
    fn matches(&self, _request: &RequestHead, headers: &HeaderMap) -> bool {
        headers
            .get_all(&self.name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| self.pattern.is_match(value))
    }
}

/// Inverts a condition.
#[derive(Debug)]
pub struct Not {
    inner: Box<dyn Condition>,
}

impl Not {
    pub fn new(inner: impl Condition + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Condition for Not {
    fn matches(&self, request: &RequestHead, headers: &HeaderMap) -> bool {
        !self.inner.matches(request, headers)
    }
}

/// Combines multiple conditions with AND semantics.
#[derive(Debug, Default)]
pub struct AllOf {
    conditions: Vec<Box<dyn Condition>>,
}

impl AllOf {
    pub fn new(conditions: Vec<Box<dyn Condition>>) -> Self {
        Self { conditions }
    }
}

impl Condition for AllOf {
    fn matches(&self, request: &RequestHead, headers: &HeaderMap) -> bool {
        self.conditions.iter().all(|c| c.matches(request, headers))
    }
}
