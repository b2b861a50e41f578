//! Response filtering middleware.
//!
//! # Responsibilities
//! - Run every non-upgrade response through a [`FilterHandler`]
//! - Replay the inner service's response into the filter's sink
//! - Surface upstream diagnostics as log-only handler errors
//!
//! # Design Decisions
//! - Upgrade requests never reach the filter; they get the inner response as is
//! - The filter runs in its own task so the body can stream while the
//!   request future has already returned the head to axum
//! - Settings are read once per request; a reload never changes a response
//!   mid-flight

use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::{future::BoxFuture, StreamExt};

use crate::config::schema::FilterSection;
use crate::error::HandlerError;
use crate::filter::{is_upgrade_request, FilterHandler, Handler, Outcome, ResponseSink};
use crate::http::sink::StreamingSink;
use crate::observability::metrics;
use crate::rules::{RuleError, RuleSet};

/// Diagnostic text an upstream adapter attaches to an otherwise valid
/// response. Reported after the response completed, never to the client.
#[derive(Debug, Clone)]
pub struct UpstreamLog(pub String);

/// Compiled filter settings; swapped atomically on config reload.
#[derive(Debug)]
pub struct FilterSettings {
    pub rules: Arc<RuleSet>,
    pub max_buffer_size: usize,
}

impl FilterSettings {
    pub fn from_config(config: &FilterSection) -> Result<Self, RuleError> {
        Ok(Self {
            rules: Arc::new(RuleSet::compile(&config.rules)?),
            max_buffer_size: config.max_buffer_size,
        })
    }
}

/// Middleware state.
#[derive(Clone)]
pub struct FilterState {
    settings: Arc<ArcSwap<FilterSettings>>,
}

impl FilterState {
    pub fn new(settings: FilterSettings) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
        }
    }

    /// Replaces the settings used by subsequent requests.
    pub fn update(&self, settings: FilterSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn settings(&self) -> Arc<FilterSettings> {
        self.settings.load_full()
    }
}

/// Adapts the rest of the middleware stack to [`Handler`].
///
/// `Next` can run once; a second call reports an error.
pub struct NextHandler {
    next: Mutex<Option<Next>>,
}

impl NextHandler {
    pub fn new(next: Next) -> Self {
        Self {
            next: Mutex::new(Some(next)),
        }
    }

    fn take(&self) -> Option<Next> {
        match self.next.lock() {
            Ok(mut next) => next.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Handler for NextHandler {
    fn serve<'a>(
        &'a self,
        sink: &'a mut dyn ResponseSink,
        request: Request<Body>,
    ) -> BoxFuture<'a, Outcome<HandlerError>> {
        Box::pin(async move {
            match self.take() {
                Some(next) => replay(sink, next.run(request).await).await,
                None => Outcome::failed(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    HandlerError::Upstream("inner service already consumed".into()),
                ),
            }
        })
    }
}

/// Writes `response` into `sink`: headers, status, then body frames.
pub async fn replay(sink: &mut dyn ResponseSink, response: Response) -> Outcome<HandlerError> {
    let (parts, body) = response.into_parts();
    let status = parts.status;
    let log = parts.extensions.get::<UpstreamLog>().cloned();

    sink.headers_mut().extend(parts.headers);
    sink.write_head(status);

    let mut frames = body.into_data_stream();
    while let Some(frame) = frames.next().await {
        let result = match frame {
            Ok(bytes) => sink.write_all(&bytes).map_err(HandlerError::from),
            Err(e) => Err(HandlerError::Upstream(e.to_string())),
        };
        if let Err(error) = result {
            return Outcome::failed(status, error);
        }
    }

    match log {
        Some(UpstreamLog(message)) => Outcome::failed(status, HandlerError::LogOnly(message)),
        None => Outcome::ok(status),
    }
}

/// Axum middleware applying the current filter settings.
pub async fn filter_middleware(
    State(state): State<FilterState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    if is_upgrade_request(&request) {
        tracing::debug!(uri = %request.uri(), "Upgrade request, filter bypassed");
        metrics::record_body_mode("bypass");
        return next.run(request).await;
    }

    let settings = state.settings();
    let handler = FilterHandler::new(
        NextHandler::new(next),
        settings.rules.clone(),
        settings.max_buffer_size,
    );
    let path = request.uri().path().to_string();
    let (mut sink, pending) = StreamingSink::new();

    tokio::spawn(async move {
        let outcome = handler.serve(&mut sink, request).await;
        match outcome.result {
            Ok(()) => sink.finish(outcome.status),
            Err(error) if error.is_log_only() => {
                tracing::warn!(path = %path, %error, "Upstream reported diagnostics");
                metrics::record_error(error.kind());
                sink.finish(outcome.status);
            }
            Err(error) => {
                tracing::error!(path = %path, status = %outcome.status, %error, "Response filtering failed");
                metrics::record_error(error.kind());
                sink.abort(error);
            }
        }
    });

    match pending.into_response().await {
        Some(response) => {
            metrics::record_request(&method, response.status().as_u16(), start);
            response
        }
        None => {
            metrics::record_request(&method, StatusCode::BAD_GATEWAY.as_u16(), start);
            (StatusCode::BAD_GATEWAY, "Response could not be produced").into_response()
        }
    }
}
