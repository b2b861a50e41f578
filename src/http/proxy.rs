//! Forwarding to the upstream server.
//!
//! # Responsibilities
//! - Forward every request to the single configured upstream
//! - Strip hop-by-hop headers in both directions
//! - Tunnel protocol upgrades (websocket) byte for byte
//! - Tag responses carrying `Warning` headers with an [`UpstreamLog`]
//!
//! # Design Decisions
//! - Plain HTTP to the upstream through the hyper-util pooled client
//! - Upstream failures map to `502 Bad Gateway`; no retries

use std::str::FromStr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{self, HeaderMap, HeaderName},
        uri::{Authority, InvalidUri, PathAndQuery, Scheme},
        Request, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};

use crate::filter::is_upgrade_request;
use crate::http::middleware::UpstreamLog;

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// State of the forwarding handler.
#[derive(Clone)]
pub struct ProxyState {
    client: Client<HttpConnector, Body>,
    upstream: Authority,
}

impl ProxyState {
    pub fn new(upstream: &str, connect_timeout: Duration) -> Result<Self, InvalidUri> {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self {
            client,
            upstream: Authority::from_str(upstream)?,
        })
    }

    pub fn upstream(&self) -> &Authority {
        &self.upstream
    }

    fn upstream_uri(&self, uri: &Uri) -> Result<Uri, axum::http::Error> {
        let path = uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.upstream.clone())
            .path_and_query(path)
            .build()
    }
}

/// Removes hop-by-hop headers, including those named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Forwards the request to the upstream and returns its response.
pub async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    if is_upgrade_request(&request) {
        return tunnel(state, request, &request_id).await;
    }

    let (mut parts, body) = request.into_parts();
    let uri = match state.upstream_uri(&parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Unroutable request URI");
            return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
        }
    };
    strip_hop_by_hop(&mut parts.headers);
    parts.uri = uri;

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        uri = %parts.uri,
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            let warnings: Vec<&str> = parts
                .headers
                .get_all(header::WARNING)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            if !warnings.is_empty() {
                let log = UpstreamLog(warnings.join("; "));
                parts.extensions.insert(log);
            }
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Forwards an upgrade handshake and, on `101`, splices the two upgraded
/// connections together.
async fn tunnel(state: ProxyState, mut request: Request<Body>, request_id: &str) -> Response {
    let client_upgrade = hyper::upgrade::on(&mut request);
    let (mut parts, body) = request.into_parts();
    parts.uri = match state.upstream_uri(&parts.uri) {
        Ok(uri) => uri,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response(),
    };

    let mut response = match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream upgrade failed");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let upstream_upgrade = hyper::upgrade::on(&mut response);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok((client, upstream)) => {
                    let mut client = TokioIo::new(client);
                    let mut upstream = TokioIo::new(upstream);
                    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                        Ok((sent, received)) => {
                            tracing::debug!(request_id = %request_id, sent, received, "Tunnel closed")
                        }
                        Err(e) => {
                            tracing::debug!(request_id = %request_id, error = %e, "Tunnel aborted")
                        }
                    }
                }
                Err(e) => tracing::warn!(request_id = %request_id, error = %e, "Upgrade failed"),
            }
        });
    }

    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive, x-session".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-session", "abc".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "text/html".parse().unwrap());

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_upstream_uri_keeps_path_and_query() {
        let state = ProxyState::new("127.0.0.1:3000", Duration::from_secs(1)).unwrap();
        let uri = state.upstream_uri(&Uri::from_static("/search?q=rust")).unwrap();
        assert_eq!(uri, "http://127.0.0.1:3000/search?q=rust");
        assert_eq!(state.upstream().port_u16(), Some(3000));
    }
}
