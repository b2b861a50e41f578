//! Buffering response filter.
//!
//! Sits in front of an upstream server, records response bodies up to a
//! configured ceiling and rewrites them with an ordered set of rules before
//! they reach the client. Bodies past the ceiling stream through unchanged.

pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rules;

pub use config::schema::FilterConfig;
pub use error::{FilterError, HandlerError};
pub use filter::{FilterHandler, ResponseInterceptor, ResponseSink};
pub use http::FilterServer;
pub use lifecycle::Shutdown;
pub use rules::{Rule, RuleSet};
