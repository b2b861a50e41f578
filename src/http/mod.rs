//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout, request ID, trace layers)
//!     → middleware/filter.rs (buffer and rewrite the response)
//!     → proxy.rs (forward to the upstream)
//!     → sink.rs (stream the filtered response back to the client)
//! ```

pub mod middleware;
pub mod proxy;
pub mod server;
pub mod sink;

pub use middleware::{FilterSettings, FilterState};
pub use proxy::ProxyState;
pub use server::FilterServer;
pub use sink::{PendingResponse, StreamingSink};
