//! HTTP surface of the pipeline process.
//!
//! Combines the stream router (the three SSE endpoints) with the topic
//! provisioning admin route and a health probe.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use watchtower_stream::{ApiError, StreamState};

use crate::topics::TopicManager;

/// State for the admin routes.
#[derive(Clone)]
pub struct AdminState {
    pub topics: Arc<TopicManager>,
}

/// Assemble the full application router.
pub fn app_router(stream_state: StreamState, admin_state: AdminState) -> Router {
    let admin = Router::new()
        .route("/api/v1/projects/{project}/topics", post(provision_topics))
        .route("/api/v1/health", get(health))
        .with_state(admin_state);

    watchtower_stream::router(stream_state)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Idempotently create both bus topics for a project.
async fn provision_topics(
    State(state): State<AdminState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = project.trim().to_string();
    if project.is_empty() {
        return Err(ApiError::BadRequest("project name is required".into()));
    }

    state
        .topics
        .ensure_project_topics(&project)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "topics provisioned", "project": project })),
    ))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
