//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, limits and timeouts
//! - Compile every rule to surface pattern errors before startup
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FilterConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::FilterConfig;
use crate::rules::{RuleError, RuleSet};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("upstream.address `{0}` is not a valid host:port")]
    UpstreamAddress(String),

    #[error("filter.max_buffer_size must be greater than zero")]
    ZeroBufferSize,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("observability.log_format must be `pretty` or `json`, got `{0}`")]
    LogFormat(String),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),

    #[error("filter.rules[{index}]: {source}")]
    Rule {
        index: usize,
        #[source]
        source: RuleError,
    },
}

/// Checks a parsed configuration, collecting every problem found.
pub fn validate_config(config: &FilterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    let upstream_ok = Authority::from_str(&config.upstream.address)
        .map(|authority| authority.port_u16().is_some())
        .unwrap_or(false);
    if !upstream_ok {
        errors.push(ValidationError::UpstreamAddress(config.upstream.address.clone()));
    }

    if config.filter.max_buffer_size == 0 {
        errors.push(ValidationError::ZeroBufferSize);
    }
    for (index, rule) in config.filter.rules.iter().enumerate() {
        if let Err(source) = RuleSet::compile(std::slice::from_ref(rule)) {
            errors.push(ValidationError::Rule { index, source });
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }

    let observability = &config.observability;
    if !matches!(observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::LogFormat(observability.log_format.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
