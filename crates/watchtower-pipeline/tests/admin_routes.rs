//! Router-level tests for the pipeline's HTTP surface.
//!
//! These cover the routes that answer without live dependencies; topic
//! creation against a real broker is exercised in deployment, not here.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use watchtower_pipeline::server::{app_router, AdminState};
use watchtower_pipeline::topics::TopicManager;
use watchtower_stream::{AuthConfig, Hub, HubConfig, SseAuth, StreamState};

fn test_app() -> axum::Router {
    let stream_state = StreamState {
        logs: Hub::new("logs", HubConfig::default()),
        metrics: Hub::new("metrics", HubConfig::default()),
        alerts: Hub::new("alerts", HubConfig::default()),
        auth: Arc::new(SseAuth::new(AuthConfig {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
        })),
    };
    let admin_state = AdminState {
        topics: TopicManager::new("localhost:9092").unwrap(),
    };
    app_router(stream_state, admin_state)
}

#[tokio::test]
async fn health_answers_ok() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn provisioning_blank_project_is_bad_request() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/projects/%20/topics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_routes_require_auth() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/logs/svcA/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
