//! Router behaviour over an HTTP-only extractor and a local site.

use assetlens::{AssetExtractor, ExtractorConfig, NoopRenderer};
use assetlens_server::router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<html><head>
<style>body { color: #336699; }</style>
</head><body><h1 style="font-family: 'Site Sans', sans-serif">hi</h1>
<img src="/logo.webp"><script src="/main.js"></script></body></html>"#;

fn app() -> Router {
    let config = ExtractorConfig {
        http_fallback_timeout: Duration::from_secs(5),
        resource_timeout: Duration::from_secs(5),
        stream_poll_interval: Duration::from_millis(50),
        cached_replay_delay: Duration::from_millis(5),
        ..ExtractorConfig::default()
    };
    router(AssetExtractor::in_memory(Arc::new(NoopRenderer), config))
}

async fn site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_extract(app: &Router, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/extract")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// The JSON payloads of every `data:` line in an SSE body.
async fn sse_events(app: &Router, uri: &str) -> Vec<Value> {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    String::from_utf8(body)
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect()
}

fn names(events: &[Value]) -> Vec<&str> {
    events.iter().filter_map(|e| e["event"].as_str()).collect()
}

#[tokio::test]
async fn test_health_and_index() {
    let app = app();
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    for uri in ["/", "/api"] {
        let (status, body) = get_json(&app, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cache_available"], true);
        assert_eq!(body["endpoints"]["stream"], "/api/extract/sse");
    }
}

#[tokio::test]
async fn test_extract_then_read_back() {
    let server = site().await;
    let app = app();
    let url = format!("{}/", server.uri());

    let (status, result) = post_extract(&app, json!({ "url": url })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["cached"], false);
    assert_eq!(result["colors"]["from_css"][0]["hex"], "#336699");
    assert_eq!(result["fonts"][0]["name"], "Site Sans");
    assert_eq!(result["assets"]["scripts"][0], format!("{}/main.js", server.uri()));
    let id = result["result_id"].as_str().unwrap().to_string();

    let (status, again) = post_extract(&app, json!({ "url": url })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["cached"], true);
    assert_eq!(again["result_id"], id.as_str());

    let (status, by_id) = get_json(&app, &format!("/api/cache/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["url"], url.as_str());

    let (status, listing) = get_json(&app, "/api/cache?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["limit"], 5);
    assert_eq!(listing["offset"], 0);
    assert_eq!(listing["results"][0]["id"], id.as_str());

    let (status, forced) = post_extract(&app, json!({ "url": url, "force_refresh": true })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(forced["cached"], false);
    assert_ne!(forced["result_id"], id.as_str());
}

#[tokio::test]
async fn test_error_statuses() {
    let server = site().await;
    let app = app();

    let (status, body) = post_extract(&app, json!({ "url": "not a url" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid URL"));

    let (status, body) = post_extract(&app, json!({ "url": format!("{}/gone", server.uri()) })).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("404"));

    let (status, body) = get_json(&app, "/api/cache/unknown-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_sse_rejects_bad_input_without_start() {
    let app = app();
    let events = sse_events(&app, "/api/extract/sse?url=nope").await;
    assert_eq!(
        events,
        vec![
            json!({ "event": "error", "message": "Invalid URL format" }),
            json!({ "event": "end" }),
        ]
    );

    let events = sse_events(&app, "/api/extract-sse").await;
    assert_eq!(events[0]["message"], "Missing URL parameter");
}

#[tokio::test]
async fn test_sse_live_then_cached() {
    let server = site().await;
    let app = app();
    let uri = format!("/api/extract/sse?url={}/", server.uri());

    let live = sse_events(&app, &uri).await;
    let seq = names(&live);
    assert_eq!(seq.first(), Some(&"start"));
    assert_eq!(&seq[seq.len() - 2..], &["complete", "end"]);
    assert!(seq[1..seq.len() - 2].iter().all(|e| *e == "progress"));
    let stages: Vec<&str> = live.iter().filter_map(|e| e["stage"].as_str()).collect();
    assert!(stages.contains(&"fallback_request"));
    assert!(stages.contains(&"assets_extracted"));
    assert_eq!(stages.last(), Some(&"extraction_complete"));
    let id = live[live.len() - 2]["result"]["result_id"].clone();

    let cached = sse_events(&app, &uri).await;
    assert_eq!(names(&cached), vec!["start", "cached_result", "complete", "end"]);
    assert_eq!(cached[1]["result_id"], id);
    assert_eq!(cached[2]["result"]["cached"], true);
}
