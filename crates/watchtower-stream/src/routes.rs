//! Event-stream endpoints.
//!
//! Three symmetric routes, one per hub. The wire format is plain SSE:
//! a `data: connected` greeting, one `data: <json>` frame per record, and a
//! `data: {"type":"heartbeat"}` frame every thirty seconds to keep
//! intermediaries from reaping idle connections.
//!
//! The response body is a channel-backed stream: a writer task owns the
//! subscriber queue and pushes formatted frames; when the browser goes away
//! the channel errors and the task unregisters the client.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header;
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use watchtower_core::record::{AlertEvent, LogRecord, MetricRecord};

use crate::auth::{sse_auth, SseAuth, UserClaims};
use crate::error::ApiError;
use crate::hub::Hub;

/// Interval between heartbeat frames.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shared state for the stream router.
#[derive(Clone)]
pub struct StreamState {
    pub logs: Arc<Hub<LogRecord>>,
    pub metrics: Arc<Hub<MetricRecord>>,
    pub alerts: Arc<Hub<AlertEvent>>,
    pub auth: Arc<SseAuth>,
}

/// Build the stream router. All routes require a valid bearer token.
pub fn router(state: StreamState) -> Router {
    Router::new()
        .route("/api/v1/logs/{project}/stream", get(stream_logs))
        .route("/api/v1/metrics/{project}/stream", get(stream_metrics))
        .route("/api/v1/alerts/{project}/stream", get(stream_alerts))
        .layer(middleware::from_fn_with_state(state.clone(), sse_auth))
        .with_state(state)
}

async fn stream_logs(
    State(state): State<StreamState>,
    Path(project): Path<String>,
    Extension(user): Extension<UserClaims>,
) -> Result<Response, ApiError> {
    stream_from_hub(&state.logs, project, user)
}

async fn stream_metrics(
    State(state): State<StreamState>,
    Path(project): Path<String>,
    Extension(user): Extension<UserClaims>,
) -> Result<Response, ApiError> {
    stream_from_hub(&state.metrics, project, user)
}

async fn stream_alerts(
    State(state): State<StreamState>,
    Path(project): Path<String>,
    Extension(user): Extension<UserClaims>,
) -> Result<Response, ApiError> {
    stream_from_hub(&state.alerts, project, user)
}

/// Register the caller on a hub and stream its queue as SSE frames.
fn stream_from_hub<T>(
    hub: &Arc<Hub<T>>,
    project: String,
    user: UserClaims,
) -> Result<Response, ApiError>
where
    T: Clone + Serialize + Send + 'static,
{
    let project = project.trim().to_string();
    if project.is_empty() {
        return Err(ApiError::BadRequest("project name is required".into()));
    }

    let client_id = user.unique_name;
    hub.register(&client_id, &project);

    let Some(receiver) = hub.get_client_channel(&client_id) else {
        tracing::error!(client_id = %client_id, "no client channel after registration");
        hub.unregister(&client_id);
        return Err(ApiError::Internal(anyhow::anyhow!(
            "failed to get client channel"
        )));
    };

    let (frame_tx, frame_rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);

    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        let exit = write_frames(&hub, &client_id, receiver, frame_tx).await;
        tracing::debug!(client_id = %client_id, ?exit, "stream writer exiting");
        hub.unregister(&client_id);
    });

    let body = Body::from_stream(ReceiverStream::new(frame_rx));
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body)
        .map_err(|e| ApiError::Internal(e.into()))
}

/// Why the writer task stopped.
#[derive(Debug)]
enum WriterExit {
    ClientGone,
    QueueClosed,
}

async fn write_frames<T>(
    hub: &Arc<Hub<T>>,
    client_id: &str,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
    frames: mpsc::Sender<Result<Bytes, Infallible>>,
) -> WriterExit
where
    T: Clone + Serialize + Send + 'static,
{
    if frames
        .send(Ok(Bytes::from_static(b"data: connected\n\n")))
        .await
        .is_err()
    {
        return WriterExit::ClientGone;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately; the greeting already went out.
    heartbeat.tick().await;

    let mut receiver = receiver.lock().await;

    loop {
        tokio::select! {
            record = receiver.recv() => {
                let Some(record) = record else {
                    return WriterExit::QueueClosed;
                };

                let json = match serde_json::to_string(&record) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(client_id, "failed to serialize record: {e}");
                        continue;
                    }
                };

                let frame = Bytes::from(format!("data: {json}\n\n"));
                if frames.send(Ok(frame)).await.is_err() {
                    return WriterExit::ClientGone;
                }
                hub.update_client_activity(client_id);
            }
            _ = heartbeat.tick() => {
                let frame = Bytes::from_static(b"data: {\"type\":\"heartbeat\"}\n\n");
                if frames.send(Ok(frame)).await.is_err() {
                    return WriterExit::ClientGone;
                }
                hub.update_client_activity(client_id);
            }
        }
    }
}
