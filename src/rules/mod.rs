//! Response rewriting rules.
//!
//! # Data Flow
//! ```text
//! RuleConfig[] (filter.rules in the config file)
//!     → RuleSet::compile (regex compilation, registration order kept)
//!     → immutable RuleSet shared via Arc
//!
//! Per response:
//!     should_record: any rule matches → record the body
//!     transform:     every matching rule runs, in order, on the
//!                    previous rule's output
//! ```
//!
//! # Design Decisions
//! - Conditions are regular expressions, matched with AND semantics
//! - An absent condition always matches
//! - Rules never see encoded bytes

pub mod condition;
pub mod header;
pub mod replace;

use axum::http::{HeaderMap, Method, Request, Uri, Version};
use thiserror::Error;

use crate::config::schema::RuleConfig;
use condition::{AllOf, Condition, ContentTypeCondition, HeaderCondition, Not, PathCondition};
use header::SetHeaderRule;
use replace::ReplaceRule;

/// The parts of a request rules may look at.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// A predicate plus transform over a response.
pub trait Rule: Send + Sync + std::fmt::Debug {
    /// Configured rule name, used in logs.
    fn name(&self) -> &str;

    /// Whether this rule applies, given the request and the response headers.
    fn matches(&self, request: &RequestHead, headers: &HeaderMap) -> bool;

    /// Transforms the decoded body. May also edit the response headers.
    fn execute(&self, request: &RequestHead, headers: &mut HeaderMap, body: Vec<u8>) -> Vec<u8>;
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule `{rule}`: invalid {field} pattern: {source}")]
    Pattern {
        rule: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("rule `{0}` has no action, set `search` or `set_header`")]
    MissingAction(String),

    #[error("rule `{0}`: `search` and `replace` must be set together")]
    IncompleteReplace(String),

    #[error("rule `{rule}`: invalid header: {reason}")]
    InvalidHeader { rule: String, reason: String },
}

/// Ordered rule collection. Registration order is evaluation order.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles configured rules, keeping their order.
    ///
    /// A config entry with both `search` and `set_header` yields a replace
    /// rule followed by a header rule sharing the same conditions.
    pub fn compile(configs: &[RuleConfig]) -> Result<Self, RuleError> {
        let mut set = Self::new();
        for config in configs {
            let name = if config.name.is_empty() { "unnamed" } else { config.name.as_str() };

            let replace = match (&config.search, &config.replace) {
                (Some(search), Some(replace)) => Some((search, replace)),
                (None, None) => None,
                _ => return Err(RuleError::IncompleteReplace(name.to_string())),
            };
            if replace.is_none() && config.set_header.is_none() {
                return Err(RuleError::MissingAction(name.to_string()));
            }

            if let Some((search, replace)) = replace {
                let rule = ReplaceRule::new(name, conditions(name, config)?, search, replace)
                    .map_err(pattern_error(name, "search"))?;
                set.push(rule);
            }
            if let Some(set_header) = &config.set_header {
                let rule = SetHeaderRule::new(
                    name,
                    conditions(name, config)?,
                    &set_header.name,
                    &set_header.value,
                )
                .map_err(|reason| RuleError::InvalidHeader {
                    rule: name.to_string(),
                    reason,
                })?;
                set.push(rule);
            }
        }
        Ok(set)
    }

    pub fn push(&mut self, rule: impl Rule + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|rule| rule.as_ref())
    }

    /// True if any rule matches; decides whether a body gets recorded.
    pub fn should_record(&self, request: &RequestHead, headers: &HeaderMap) -> bool {
        self.rules.iter().any(|rule| rule.matches(request, headers))
    }
}

fn pattern_error<'a>(
    rule: &'a str,
    field: &'static str,
) -> impl FnOnce(regex::Error) -> RuleError + 'a {
    move |source| RuleError::Pattern {
        rule: rule.to_string(),
        field,
        source,
    }
}

fn conditions(name: &str, config: &RuleConfig) -> Result<AllOf, RuleError> {
    let mut all: Vec<Box<dyn Condition>> = Vec::new();
    if let Some(path) = &config.path {
        all.push(Box::new(PathCondition::new(path).map_err(pattern_error(name, "path"))?));
    }
    if let Some(path) = &config.path_exclude {
        let excluded = PathCondition::new(path).map_err(pattern_error(name, "path_exclude"))?;
        all.push(Box::new(Not::new(excluded)));
    }
    if let Some(content_type) = &config.content_type {
        all.push(Box::new(
            ContentTypeCondition::new(content_type).map_err(pattern_error(name, "content_type"))?,
        ));
    }
    if let Some(content_type) = &config.content_type_exclude {
        let excluded = ContentTypeCondition::new(content_type)
            .map_err(pattern_error(name, "content_type_exclude"))?;
        all.push(Box::new(Not::new(excluded)));
    }
    if let Some(header) = &config.header {
        let condition = HeaderCondition::new(&header.name, &header.pattern).map_err(|error| {
            match error {
                condition::HeaderConditionError::Name(reason) => RuleError::InvalidHeader {
                    rule: name.to_string(),
                    reason,
                },
                condition::HeaderConditionError::Pattern(source) => {
                    pattern_error(name, "header")(source)
                }
            }
        })?;
        all.push(Box::new(condition));
    }
    Ok(AllOf::new(all))
}
