//! A [`ResponseSink`] backed by an axum response.
//!
//! # Responsibilities
//! - Hand the response head to the waiting request future once committed
//! - Stream body chunks to the client as they are written
//!
//! # Design Decisions
//! - The head travels over a `oneshot`, so the client sees nothing until the
//!   filter commits it
//! - Body chunks go through an unbounded channel; the sink itself never blocks
//! - A dropped receiver (client gone) turns into `BrokenPipe` on write

use std::io;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::filter::ResponseSink;

type Frame = Result<Bytes, io::Error>;

/// Status line and headers of a response about to be streamed.
#[derive(Debug)]
struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
}

/// Writer half: used by the filter task.
pub struct StreamingSink {
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: mpsc::UnboundedSender<Frame>,
}

/// Reader half: turned into the response returned to axum.
pub struct PendingResponse {
    head_rx: oneshot::Receiver<ResponseHead>,
    body_rx: mpsc::UnboundedReceiver<Frame>,
}

impl StreamingSink {
    pub fn new() -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        let sink = Self {
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx,
        };
        (sink, PendingResponse { head_rx, body_rx })
    }

    pub fn head_sent(&self) -> bool {
        self.head_tx.is_none()
    }

    /// Completes the response, committing `status` if no head was written.
    pub fn finish(mut self, status: StatusCode) {
        if !self.head_sent() {
            self.write_head(status);
        }
    }

    /// Ends the body stream with an error so the client sees a truncated
    /// response instead of a clean end.
    ///
    /// Before the head is committed this sends nothing, and the waiting
    /// request resolves to `None`.
    pub fn abort(self, error: impl std::fmt::Display) {
        if self.head_sent() {
            // Receiver may already be gone; nothing left to tell anyone.
            let _ = self.body_tx.send(Err(io::Error::other(error.to_string())));
        }
    }
}

impl ResponseSink for StreamingSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, status: StatusCode) {
        if let Some(head_tx) = self.head_tx.take() {
            let head = ResponseHead {
                status,
                headers: self.headers.clone(),
            };
            if head_tx.send(head).is_err() {
                tracing::debug!(%status, "Client went away before the response head");
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.head_sent() {
            self.write_head(StatusCode::OK);
        }
        self.body_tx
            .send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))?;
        Ok(buf.len())
    }

    fn take_over(&mut self) -> &mut dyn ResponseSink {
        self
    }
}

impl PendingResponse {
    /// Waits for the head and builds a streaming response.
    ///
    /// Returns `None` if the writer half was dropped without committing one.
    pub async fn into_response(self) -> Option<Response> {
        let head = self.head_rx.await.ok()?;
        let body = futures_util::stream::unfold(self.body_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        Some(response)
    }
}
