//! End-to-end tests: client → filter → mock upstream.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use response_filter::config::schema::{RuleConfig, SetHeaderConfig};
use response_filter::config::FilterConfig;

mod common;

use common::MockResponse;

fn brand_config() -> FilterConfig {
    let mut config = FilterConfig::default();
    config.filter.rules.push(RuleConfig {
        name: "brand".into(),
        content_type: Some("^text/html".into()),
        search: Some("Acme".into()),
        replace: Some("ACME Corporation".into()),
        ..RuleConfig::default()
    });
    config
}

#[tokio::test]
async fn test_body_rewritten_and_length_updated() {
    let upstream =
        common::start_mock_backend(MockResponse::new(200, "text/html", "<p>Hello Acme!</p>")).await;
    let filter = common::start_filter(brand_config(), upstream).await;

    let res = common::client().get(filter.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let expected = "<p>Hello ACME Corporation!</p>";
    assert_eq!(
        res.headers()["content-length"].to_str().unwrap(),
        expected.len().to_string()
    );
    assert_eq!(res.text().await.unwrap(), expected);
}

#[tokio::test]
async fn test_non_matching_response_passes_through() {
    let upstream = common::start_mock_backend(MockResponse::new(
        200,
        "application/json",
        r#"{"vendor":"Acme"}"#,
    ))
    .await;
    let filter = common::start_filter(brand_config(), upstream).await;

    let res = common::client().get(filter.url("/api")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), r#"{"vendor":"Acme"}"#);
}

#[tokio::test]
async fn test_oversized_body_streams_unmodified() {
    let body = format!("Acme {}", "x".repeat(256));
    let upstream = common::start_mock_backend(MockResponse::new(200, "text/html", body.clone())).await;

    let mut config = brand_config();
    config.filter.max_buffer_size = 64;
    let filter = common::start_filter(config, upstream).await;

    let res = common::client().get(filter.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), body);
}

#[tokio::test]
async fn test_gzip_body_rewritten_and_reencoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"Welcome to Acme").unwrap();
    let compressed = encoder.finish().unwrap();

    let upstream = common::start_mock_backend(
        MockResponse::new(200, "text/html; charset=utf-8", compressed)
            .header("Content-Encoding", "gzip"),
    )
    .await;
    let filter = common::start_filter(brand_config(), upstream).await;

    let res = common::client().get(filter.url("/")).send().await.unwrap();
    assert_eq!(res.headers()["content-encoding"], "gzip");
    let length: usize = res.headers()["content-length"].to_str().unwrap().parse().unwrap();
    let bytes = res.bytes().await.unwrap();
    assert_eq!(bytes.len(), length);

    let mut decoded = String::new();
    GzDecoder::new(&bytes[..]).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, "Welcome to ACME Corporation");
}

#[tokio::test]
async fn test_set_header_rule_scoped_by_path() {
    let upstream = common::start_mock_backend(MockResponse::new(200, "text/plain", "body")).await;

    let mut config = FilterConfig::default();
    config.filter.rules.push(RuleConfig {
        name: "tag".into(),
        path: Some("^/docs/".into()),
        set_header: Some(SetHeaderConfig {
            name: "x-filtered".into(),
            value: "yes".into(),
        }),
        ..RuleConfig::default()
    });
    let filter = common::start_filter(config, upstream).await;
    let client = common::client();

    let res = client.get(filter.url("/docs/intro")).send().await.unwrap();
    assert_eq!(res.headers()["x-filtered"], "yes");
    assert_eq!(res.text().await.unwrap(), "body");

    let res = client.get(filter.url("/blog")).send().await.unwrap();
    assert!(res.headers().get("x-filtered").is_none());
}

#[tokio::test]
async fn test_not_modified_keeps_empty_body() {
    let upstream = common::start_mock_backend(
        MockResponse::new(304, "text/html", "").header("ETag", "\"v1\""),
    )
    .await;
    let filter = common::start_filter(brand_config(), upstream).await;

    let res = common::client().get(filter.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 304);
    assert_eq!(res.headers()["etag"], "\"v1\"");
    assert!(res.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_warning_does_not_disturb_response() {
    let upstream = common::start_mock_backend(
        MockResponse::new(200, "text/html", "Acme").header("Warning", "199 - \"stale config\""),
    )
    .await;
    let filter = common::start_filter(brand_config(), upstream).await;

    let res = common::client().get(filter.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ACME Corporation");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let upstream = common::closed_port().await;
    let filter = common::start_filter(brand_config(), upstream).await;

    let res = common::client().get(filter.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn test_request_id_propagated() {
    let upstream = common::start_mock_backend(MockResponse::new(200, "text/plain", "ok")).await;
    let filter = common::start_filter(FilterConfig::default(), upstream).await;
    let client = common::client();

    let res = client.get(filter.url("/")).send().await.unwrap();
    assert!(res.headers().contains_key("x-request-id"));

    let res = client
        .get(filter.url("/"))
        .header("x-request-id", "trace-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-42");
}

#[tokio::test]
async fn test_reloaded_rules_apply_to_new_requests() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let upstream = common::start_programmable_backend(move |_path| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { MockResponse::new(200, "text/html", "Acme") }
    })
    .await;
    let filter = common::start_filter(brand_config(), upstream).await;
    let client = common::client();

    let res = client.get(filter.url("/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "ACME Corporation");

    let mut reloaded = FilterConfig::default();
    reloaded.upstream.address = upstream.to_string();
    reloaded.filter.rules.push(RuleConfig {
        name: "rename".into(),
        search: Some("Acme".into()),
        replace: Some("Initech".into()),
        ..RuleConfig::default()
    });
    filter.updates.send(reloaded).unwrap();

    let mut body = String::new();
    for _ in 0..50 {
        body = client.get(filter.url("/")).send().await.unwrap().text().await.unwrap();
        if body == "Initech" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(body, "Initech");
    assert!(hits.load(Ordering::SeqCst) >= 2);
}
