//! Middleware of the HTTP surface.

pub mod filter;

pub use filter::{filter_middleware, FilterSettings, FilterState, NextHandler, UpstreamLog};
