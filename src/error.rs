//! Error types of the interception core.
//!
//! Handler failures are split into a soft class ([`HandlerError::LogOnly`])
//! that never aborts finalization, and everything else, which does.

use std::io;

use thiserror::Error;

/// An error reported by a downstream handler next to its status code.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Diagnostic output that an upstream adapter pushed through its error
    /// channel. The response is still finalized; the error is surfaced last.
    #[error("upstream log output: {0}")]
    LogOnly(String),

    /// The upstream could not produce a complete response.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("handler I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HandlerError {
    /// Returns true for the soft, log-only error class.
    pub fn is_log_only(&self) -> bool {
        matches!(self, HandlerError::LogOnly(_))
    }
}

/// Error returned by the response filter after finalization.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A write to the real sink failed.
    #[error("failed to write response: {0}")]
    Io(#[from] io::Error),

    /// The real sink accepted fewer bytes than the body holds.
    #[error("short write: {written} of {expected} bytes reached the client")]
    ShortWrite { written: usize, expected: usize },
}

impl FilterError {
    /// Returns true if this only carries a deferred log-only handler error.
    pub fn is_log_only(&self) -> bool {
        matches!(self, FilterError::Handler(error) if error.is_log_only())
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FilterError::Handler(HandlerError::LogOnly(_)) => "log_only",
            FilterError::Handler(HandlerError::Upstream(_)) => "upstream",
            FilterError::Handler(HandlerError::Io(_)) => "handler_io",
            FilterError::Io(_) => "io",
            FilterError::ShortWrite { .. } => "short_write",
        }
    }
}
