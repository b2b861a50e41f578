//! The response writer abstraction.
//!
//! A [`ResponseSink`] follows the usual writer contract: headers stay mutable
//! until [`write_head`](ResponseSink::write_head) commits them together with
//! the status, body bytes follow through [`write`](ResponseSink::write). A
//! body write before any explicit head implies `200 OK`.

use std::io;

use axum::http::{header::UPGRADE, HeaderMap, Method, Request, StatusCode};

/// Destination of one HTTP response.
pub trait ResponseSink: Send {
    /// Headers that will be sent with the response head.
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sends the status line and the current header set.
    fn write_head(&mut self, status: StatusCode);

    /// Writes body bytes and returns how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Gives up any wrapping and returns the sink that talks to the client,
    /// e.g. to complete a protocol upgrade.
    fn take_over(&mut self) -> &mut dyn ResponseSink;

    /// Writes the whole buffer, retrying on partial writes.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "response sink accepted no bytes",
                    ))
                }
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

/// Whether a response with this status may carry a body.
///
/// Informational (1xx), `204 No Content` and `304 Not Modified` responses
/// never do.
pub fn body_allowed_for_status(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Returns true for `GET` requests asking for a websocket upgrade.
///
/// The header value is compared exactly.
pub fn is_upgrade_request<B>(request: &Request<B>) -> bool {
    request.method() == Method::GET
        && request
            .headers()
            .get(UPGRADE)
            .map(|value| value.as_bytes() == b"websocket")
            .unwrap_or(false)
}

/// A sink that keeps the whole response in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: Vec<u8>,
    writes: usize,
    head_writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of the committed head, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Number of non-empty body writes received.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Number of `write_head` calls received, including ignored repeats.
    pub fn head_count(&self) -> usize {
        self.head_writes
    }
}

impl ResponseSink for MemorySink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, status: StatusCode) {
        self.head_writes += 1;
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        if !buf.is_empty() {
            self.writes += 1;
            self.body.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn take_over(&mut self) -> &mut dyn ResponseSink {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_body_allowed_for_status() {
        for code in [200, 208, 404, 500, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(body_allowed_for_status(status), "{code} should allow a body");
        }
        for code in 100..200 {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!body_allowed_for_status(status), "{code} should forbid a body");
        }
        assert!(!body_allowed_for_status(StatusCode::NO_CONTENT));
        assert!(!body_allowed_for_status(StatusCode::NOT_MODIFIED));
    }

    #[test]
    fn test_upgrade_detection() {
        let upgrade = Request::builder()
            .method(Method::GET)
            .header("Upgrade", "websocket")
            .body(Body::empty())
            .unwrap();
        assert!(is_upgrade_request(&upgrade));

        let post = Request::builder()
            .method(Method::POST)
            .header("Upgrade", "websocket")
            .body(Body::empty())
            .unwrap();
        assert!(!is_upgrade_request(&post));

        // Exact match only.
        let shouting = Request::builder()
            .method(Method::GET)
            .header("Upgrade", "WebSocket")
            .body(Body::empty())
            .unwrap();
        assert!(!is_upgrade_request(&shouting));

        let plain = Request::builder().body(Body::empty()).unwrap();
        assert!(!is_upgrade_request(&plain));
    }

    #[test]
    fn test_memory_sink_implicit_ok() {
        let mut sink = MemorySink::new();
        sink.write_all(b"abc").unwrap();
        assert_eq!(sink.status(), Some(StatusCode::OK));
        assert_eq!(sink.body(), b"abc");

        sink.write_head(StatusCode::NOT_FOUND);
        assert_eq!(sink.status(), Some(StatusCode::OK));
        assert_eq!(sink.head_count(), 1);
    }
}
