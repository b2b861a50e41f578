//! Response interception core.
//!
//! # Data Flow
//! ```text
//! request
//!     → orchestrator.rs (upgrade bypass, wrap the real sink)
//!     → downstream handler writes through interceptor.rs
//!         (Recording: buffer up to the ceiling | Passthrough: forward)
//!     → orchestrator.rs finalizes:
//!         passthrough → nothing left but the header commit
//!         recorded    → codec.rs decode → rules → Content-Length → codec.rs encode
//!     → real sink (sink.rs)
//! ```
//!
//! # Design Decisions
//! - One interceptor per response; no state outlives the response
//! - Status and headers are staged and committed exactly once
//! - Exceeding the buffer ceiling is not an error: the interceptor flushes
//!   what it holds and streams the rest unmodified

pub mod codec;
pub mod interceptor;
pub mod orchestrator;
pub mod sink;

pub use codec::{CodecError, ContentEncoding};
pub use interceptor::{BodyWrite, RecordPredicate, ResponseInterceptor};
pub use orchestrator::{rewrite_response, FilterHandler, Handler, Outcome};
pub use sink::{body_allowed_for_status, is_upgrade_request, MemorySink, ResponseSink};
