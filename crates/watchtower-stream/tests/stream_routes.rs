//! Router-level tests for the stream endpoints.
//!
//! These exercise the auth gate and error contract without any live
//! dependencies; a token that never parses fails before the JWKS fetch.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use watchtower_stream::{
    router, AuthConfig, Hub, HubConfig, SseAuth, StreamState,
};

fn test_state() -> StreamState {
    StreamState {
        logs: Hub::new("logs", HubConfig::default()),
        metrics: Hub::new("metrics", HubConfig::default()),
        alerts: Hub::new("alerts", HubConfig::default()),
        auth: Arc::new(SseAuth::new(AuthConfig {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
        })),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_bearer_is_unauthorized() {
    let app = router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/logs/svcA/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "bearer is required");
}

#[tokio::test]
async fn empty_bearer_is_unauthorized() {
    let app = router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/logs/svcA/stream?bearer=%20%20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_token_is_unauthorized() {
    let app = router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/metrics/svcA/stream?bearer=not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Invalid authentication token");
}

#[tokio::test]
async fn all_three_streams_are_gated() {
    for path in [
        "/api/v1/logs/svcA/stream",
        "/api/v1/metrics/svcA/stream",
        "/api/v1/alerts/svcA/stream",
    ] {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "path {path}");
    }
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = router(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/traces/svcA/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
