//! HTTP surface tests driven through the router without binding a socket.

mod common;

use assert_json_diff::assert_json_include;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{blank_page, landing_page, pipeline, StubCapture};
use facsimile::{CloneResult, Provenance};
use facsimile_runtime::rest::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(capture: StubCapture) -> axum::Router {
    let pipeline = Arc::new(pipeline(capture, Vec::new(), Duration::from_secs(5)));
    router(AppState { pipeline })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app(StubCapture {
        outcome: Ok(landing_page()),
    })
    .oneshot(Request::get("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_json_include!(
        actual: body_json(response).await,
        expected: json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")})
    );
}

#[tokio::test]
async fn test_clone_returns_fallback_result() {
    let response = app(StubCapture {
        outcome: Ok(landing_page()),
    })
    .oneshot(post_json("/api/v1/clone", json!({"url": "https://acme.test"})))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result: CloneResult = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(result.provenance, Provenance::Fallback);
    assert!(result.html.starts_with("<!DOCTYPE html>"));
    assert_eq!(result.images, vec!["https://acme.test/hero.png".to_string()]);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let response = app(StubCapture {
        outcome: Ok(landing_page()),
    })
    .oneshot(post_json("/api/v1/clone", json!({"address": "https://acme.test"})))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "E_INVALID_INPUT");
}

#[tokio::test]
async fn test_empty_url_is_bad_request() {
    let response = app(StubCapture {
        outcome: Ok(landing_page()),
    })
    .oneshot(post_json("/api/v1/clone", json!({"url": ""})))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_manifest_is_unprocessable() {
    let response = app(StubCapture {
        outcome: Ok(blank_page()),
    })
    .oneshot(post_json("/api/v1/clone", json!({"url": "https://spa.test"})))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_json_include!(
        actual: body_json(response).await,
        expected: json!({"error": {"code": "E_EMPTY_MANIFEST"}})
    );
}

#[tokio::test]
async fn test_capture_endpoint_returns_manifest() {
    let response = app(StubCapture {
        outcome: Ok(landing_page()),
    })
    .oneshot(post_json("/api/v1/capture", json!({"url": "https://acme.test"})))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["final_url"], "https://acme.test/");
}

#[tokio::test]
async fn test_refine_endpoint() {
    let response = app(StubCapture {
        outcome: Ok(landing_page()),
    })
    .oneshot(post_json(
        "/api/v1/refine",
        json!({"html": "<html><body><h1>Acme</h1></body></html>", "instruction": "bolder"}),
    ))
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result: CloneResult = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(result.provenance, Provenance::Fallback);
    assert!(result.html.contains("<h1>Acme</h1>"));
}
