//! Interception orchestration.
//!
//! [`rewrite_response`] runs a downstream [`Handler`] against a
//! [`ResponseInterceptor`] and finalizes the response once the handler has
//! returned. [`FilterHandler`] binds a [`RuleSet`] to it.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{
    header::{CONTENT_LENGTH, HeaderValue},
    HeaderMap, Request, StatusCode,
};
use futures_util::future::BoxFuture;

use crate::error::{FilterError, HandlerError};
use crate::filter::interceptor::ResponseInterceptor;
use crate::filter::sink::{is_upgrade_request, ResponseSink};
use crate::observability::metrics;
use crate::rules::{RequestHead, RuleSet};

/// Status of a handled response plus the error reported with it, if any.
///
/// The status is meaningful even when `result` is an error.
#[derive(Debug)]
pub struct Outcome<E> {
    pub status: StatusCode,
    pub result: Result<(), E>,
}

impl<E> Outcome<E> {
    pub fn ok(status: StatusCode) -> Self {
        Self { status, result: Ok(()) }
    }

    pub fn failed(status: StatusCode, error: impl Into<E>) -> Self {
        Self { status, result: Err(error.into()) }
    }
}

impl Outcome<FilterError> {
    fn finish(status: StatusCode, deferred: Option<HandlerError>) -> Self {
        match deferred {
            Some(error) => Self::failed(status, error),
            None => Self::ok(status),
        }
    }
}

impl From<Outcome<HandlerError>> for Outcome<FilterError> {
    fn from(outcome: Outcome<HandlerError>) -> Self {
        Self {
            status: outcome.status,
            result: outcome.result.map_err(FilterError::from),
        }
    }
}

/// The downstream request handler.
///
/// Writes status, headers and body through `sink` in the order it wants them
/// observed, and must not touch `sink` after the returned future completes.
pub trait Handler: Send + Sync {
    fn serve<'a>(
        &'a self,
        sink: &'a mut dyn ResponseSink,
        request: Request<Body>,
    ) -> BoxFuture<'a, Outcome<HandlerError>>;
}

impl<F> Handler for F
where
    F: Fn(&mut dyn ResponseSink, Request<Body>) -> Outcome<HandlerError> + Send + Sync,
{
    fn serve<'a>(
        &'a self,
        sink: &'a mut dyn ResponseSink,
        request: Request<Body>,
    ) -> BoxFuture<'a, Outcome<HandlerError>> {
        Box::pin(async move { self(sink, request) })
    }
}

/// Runs `next` with an interceptor in front of `sink` and finalizes the
/// response.
///
/// `should_record` is consulted once, on the first non-empty body write.
/// `retrieve_body` runs after the handler returned and a body was recorded;
/// it returns the (decoded, transformed) body when one was captured, or
/// `None` to flush the recorded bytes unchanged.
pub async fn rewrite_response<'a, S, H, P, R>(
    sink: &'a mut S,
    request: Request<Body>,
    should_record: P,
    retrieve_body: R,
    maximum_buffer_size: usize,
    next: &H,
) -> Outcome<FilterError>
where
    S: ResponseSink + ?Sized,
    H: Handler + ?Sized,
    P: FnOnce(&HeaderMap) -> bool + Send + 'a,
    R: FnOnce(&mut ResponseInterceptor<'a, S>) -> Option<Vec<u8>>,
{
    if is_upgrade_request(&request) {
        tracing::debug!(uri = %request.uri(), "Upgrade request, interception bypassed");
        metrics::record_body_mode("bypass");
        return next.serve(sink.take_over(), request).await.into();
    }

    let mut interceptor =
        ResponseInterceptor::new(sink, Box::new(should_record), maximum_buffer_size);
    let outcome = next.serve(&mut interceptor, request).await;
    let status = outcome.status;
    if interceptor.is_skipped() {
        return outcome.into();
    }

    let deferred = match outcome.result {
        Ok(()) => None,
        Err(error) if error.is_log_only() => {
            tracing::debug!(%error, "Deferring log-only handler error");
            Some(error)
        }
        Err(error) => return Outcome::failed(status, error),
    };

    if !interceptor.is_intercepting_required() || !interceptor.is_body_allowed() {
        if interceptor.was_something_recorded() && !interceptor.is_body_allowed() {
            // Recorded bytes are dropped along with the forbidden body.
            interceptor.headers_mut().remove(CONTENT_LENGTH);
        }
        interceptor.finalize_headers(status);
        return Outcome::finish(status, deferred);
    }

    let write = match retrieve_body(&mut interceptor) {
        Some(body) => {
            if !interceptor.is_body_allowed() {
                // The status was switched to one without a body after capture.
                interceptor.headers_mut().remove(CONTENT_LENGTH);
                interceptor.finalize_headers(status);
                return Outcome::finish(status, deferred);
            }
            if interceptor.headers().contains_key(CONTENT_LENGTH) {
                interceptor
                    .headers_mut()
                    .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            }
            interceptor.write_final_body(&body, status)
        }
        None => interceptor.write_recorded_unchanged(status),
    };

    match write {
        Err(error) => Outcome::failed(status, error),
        Ok(write) if write.is_short() => Outcome::failed(
            status,
            FilterError::ShortWrite {
                written: write.written,
                expected: write.expected,
            },
        ),
        Ok(_) => Outcome::finish(status, deferred),
    }
}

/// Applies a [`RuleSet`] to the responses of a downstream handler.
pub struct FilterHandler<H> {
    next: H,
    rules: Arc<RuleSet>,
    maximum_buffer_size: usize,
}

impl<H: Handler> FilterHandler<H> {
    pub fn new(next: H, rules: Arc<RuleSet>, maximum_buffer_size: usize) -> Self {
        Self {
            next,
            rules,
            maximum_buffer_size,
        }
    }

    /// Serves `request` through the downstream handler, rewriting the
    /// response where a rule matches.
    pub async fn serve<S>(&self, sink: &mut S, request: Request<Body>) -> Outcome<FilterError>
    where
        S: ResponseSink + ?Sized,
    {
        let head = RequestHead::from_request(&request);
        let rules = &*self.rules;
        rewrite_response(
            sink,
            request,
            |headers| rules.should_record(&head, headers),
            |interceptor| transform_recorded(rules, &head, interceptor),
            self.maximum_buffer_size,
            &self.next,
        )
        .await
    }
}

/// Threads the recorded body through every matching rule, in order.
///
/// Each rule is matched against the headers as left by the previous one.
/// The body is decoded lazily on the first match; `None` means no rule
/// matched or the body could not be decoded.
fn transform_recorded<S>(
    rules: &RuleSet,
    head: &RequestHead,
    interceptor: &mut ResponseInterceptor<'_, S>,
) -> Option<Vec<u8>>
where
    S: ResponseSink + ?Sized,
{
    let mut body: Option<Vec<u8>> = None;
    let mut applied = 0;
    for rule in rules.iter() {
        if !rule.matches(head, interceptor.headers()) {
            continue;
        }
        let current = match body.take() {
            Some(current) => current,
            None => match interceptor.decoded_recorded() {
                Ok(decoded) => decoded,
                Err(error) => {
                    tracing::warn!(%error, path = %head.path(), "Recorded body left untouched");
                    return None;
                }
            },
        };
        body = Some(rule.execute(head, interceptor.headers_mut(), current));
        tracing::debug!(rule = rule.name(), path = %head.path(), "Rule applied");
        applied += 1;
    }
    if applied > 0 {
        metrics::record_rules_applied(applied);
    }
    body
}
