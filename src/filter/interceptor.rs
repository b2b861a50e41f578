//! Buffering decorator around the real response sink.
//!
//! # States
//! ```text
//! Init ──first non-empty write, predicate true──▶ Recording
//!   │                                               │ write would exceed ceiling:
//!   │                                               │ one combined flush
//!   └──first non-empty write, predicate false──▶ Passthrough
//!
//! any ──finalize_headers / write_final_body / write_recorded_unchanged──▶ Finalized
//! ```
//!
//! Status and headers are staged in memory and reach the real sink in a
//! single commit. In Passthrough mode that commit happens right before the
//! first forwarded byte; otherwise the orchestrator triggers it once the
//! handler has returned, so rules can still change headers.

use std::io;

use axum::http::{
    header::{CONTENT_LENGTH, HeaderValue},
    HeaderMap, StatusCode,
};

use crate::filter::codec::{CodecError, ContentEncoding};
use crate::filter::sink::{body_allowed_for_status, ResponseSink};
use crate::observability::metrics;

/// Decides, once, whether a response body gets recorded.
pub type RecordPredicate<'a> = Box<dyn FnOnce(&HeaderMap) -> bool + Send + 'a>;

/// Byte counts of a final body write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyWrite {
    pub written: usize,
    pub expected: usize,
}

impl BodyWrite {
    pub fn is_short(&self) -> bool {
        self.written < self.expected
    }
}

/// Per-response interception state. Never shared across responses.
pub struct ResponseInterceptor<'a, S: ResponseSink + ?Sized> {
    delegate: &'a mut S,
    headers: HeaderMap,
    buffer: Option<Vec<u8>>,
    maximum_buffer_size: usize,
    status_set: Option<StatusCode>,
    body_allowed: bool,
    first_content_written: bool,
    should_record: Option<RecordPredicate<'a>>,
    recording: bool,
    headers_committed: bool,
    skipped: bool,
}

impl<'a, S: ResponseSink + ?Sized> ResponseInterceptor<'a, S> {
    /// Wraps `delegate`. Staged headers start as a copy of the delegate's.
    pub fn new(
        delegate: &'a mut S,
        should_record: RecordPredicate<'a>,
        maximum_buffer_size: usize,
    ) -> Self {
        let headers = delegate.headers().clone();
        Self {
            delegate,
            headers,
            buffer: None,
            maximum_buffer_size,
            status_set: None,
            body_allowed: true,
            first_content_written: false,
            should_record: Some(should_record),
            recording: false,
            headers_committed: false,
            skipped: false,
        }
    }

    /// Last status passed to `write_head`, not yet forwarded.
    pub fn status(&self) -> Option<StatusCode> {
        self.status_set
    }

    pub fn is_body_allowed(&self) -> bool {
        self.body_allowed
    }

    /// True while the body is held in the buffer, waiting for finalization.
    pub fn is_intercepting_required(&self) -> bool {
        self.recording && self.buffer.is_some()
    }

    /// True once the delegate was handed out through `take_over`.
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn first_content_written(&self) -> bool {
        self.first_content_written
    }

    pub fn headers_committed(&self) -> bool {
        self.headers_committed
    }

    /// Bytes recorded so far; empty unless recording.
    pub fn recorded(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }

    pub fn was_something_recorded(&self) -> bool {
        self.buffer.as_ref().is_some_and(|buffer| !buffer.is_empty())
    }

    /// The recorded body, decoded according to the staged `Content-Encoding`.
    pub fn decoded_recorded(&self) -> Result<Vec<u8>, CodecError> {
        match ContentEncoding::from_headers(&self.headers)? {
            Some(encoding) => encoding.decode(self.recorded(), self.maximum_buffer_size),
            None => Ok(self.recorded().to_vec()),
        }
    }

    /// Commits staged status and headers to the real sink.
    ///
    /// The status given to `write_head` wins over `status`. Only the first
    /// call has an effect.
    pub fn finalize_headers(&mut self, status: StatusCode) {
        if self.headers_committed {
            return;
        }
        self.headers_committed = true;
        self.delegate.headers_mut().clone_from(&self.headers);
        self.delegate.write_head(self.status_set.unwrap_or(status));
    }

    /// Writes `body` as the complete response body.
    ///
    /// Re-encodes when the staged `Content-Encoding` still names a supported
    /// codec and sets a present `Content-Length` to the emitted length.
    pub fn write_final_body(&mut self, body: &[u8], status: StatusCode) -> io::Result<BodyWrite> {
        let encoded: Vec<u8>;
        let payload = match ContentEncoding::from_headers(&self.headers) {
            Ok(Some(encoding)) => {
                encoded = encoding.encode(body).map_err(io::Error::other)?;
                encoded.as_slice()
            }
            Ok(None) => body,
            Err(error) => {
                tracing::warn!(%error, "emitting rewritten body without re-encoding");
                body
            }
        };
        if self.headers.contains_key(CONTENT_LENGTH) {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
        }
        self.buffer = None;
        self.finalize_headers(status);
        let written = if payload.is_empty() { 0 } else { self.delegate.write(payload)? };
        Ok(BodyWrite { written, expected: payload.len() })
    }

    /// Commits headers, then flushes the recorded bytes verbatim.
    pub fn write_recorded_unchanged(&mut self, status: StatusCode) -> io::Result<BodyWrite> {
        let body = self.buffer.take().unwrap_or_default();
        self.finalize_headers(status);
        let written = if body.is_empty() { 0 } else { self.delegate.write(&body)? };
        Ok(BodyWrite { written, expected: body.len() })
    }

    fn decide_recording(&mut self, first_write: usize) {
        self.first_content_written = true;
        let predicate = self.should_record.take();
        self.recording = predicate.is_some_and(|should_record| should_record(&self.headers));
        if self.recording {
            self.buffer = Some(Vec::with_capacity(first_write.min(self.maximum_buffer_size)));
            metrics::record_body_mode("recorded");
        } else {
            metrics::record_body_mode("passthrough");
        }
    }

    /// Flushes buffer and `incoming` in one write and leaves Recording for good.
    fn overflow(&mut self, incoming: &[u8]) -> io::Result<usize> {
        let mut combined = self.buffer.take().unwrap_or_default();
        let buffered = combined.len();
        combined.extend_from_slice(incoming);
        self.recording = false;

        tracing::debug!(
            buffered,
            incoming = incoming.len(),
            maximum = self.maximum_buffer_size,
            "Buffer ceiling exceeded, switching to passthrough"
        );
        metrics::record_overflow();

        self.finalize_headers(StatusCode::OK);
        let written = self.delegate.write(&combined)?;
        if written < buffered {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("flushed {written} of {buffered} buffered bytes"),
            ));
        }
        Ok(written - buffered)
    }
}

impl<S: ResponseSink + ?Sized> ResponseSink for ResponseInterceptor<'_, S> {
    fn headers(&self) -> &HeaderMap {
        if self.skipped {
            self.delegate.headers()
        } else {
            &self.headers
        }
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        if self.skipped {
            self.delegate.headers_mut()
        } else {
            &mut self.headers
        }
    }

    fn write_head(&mut self, status: StatusCode) {
        if self.skipped {
            self.delegate.write_head(status);
            return;
        }
        self.status_set = Some(status);
        self.body_allowed = body_allowed_for_status(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.skipped {
            return self.delegate.write(buf);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.body_allowed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "response status does not allow a body",
            ));
        }
        if !self.first_content_written {
            self.decide_recording(buf.len());
        }

        if self.recording {
            let buffered = self.buffer.as_ref().map_or(0, Vec::len);
            if buffered + buf.len() > self.maximum_buffer_size {
                return self.overflow(buf);
            }
            if let Some(buffer) = self.buffer.as_mut() {
                buffer.extend_from_slice(buf);
            }
            return Ok(buf.len());
        }

        self.finalize_headers(StatusCode::OK);
        self.delegate.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.skipped || (self.first_content_written && !self.recording) {
            self.delegate.flush()
        } else {
            Ok(())
        }
    }

    fn take_over(&mut self) -> &mut dyn ResponseSink {
        if !self.skipped {
            self.skipped = true;
            if let Some(recorded) = self.buffer.take() {
                self.finalize_headers(StatusCode::OK);
                if let Err(error) = self.delegate.write_all(&recorded) {
                    tracing::warn!(%error, "Failed to flush recorded bytes on take over");
                }
            } else if !self.headers_committed {
                self.delegate.headers_mut().clone_from(&self.headers);
            }
            self.recording = false;
        }
        self.delegate.take_over()
    }
}
