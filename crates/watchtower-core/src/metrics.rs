//! Prometheus plumbing shared by the Watchtower binaries.
//!
//! Each binary installs the global recorder once at startup via
//! [`init_metrics`] and exposes it with [`serve_metrics`]; after that,
//! components record through the `metrics` macros directly. All metric
//! names are described here, in one place, so `/metrics` carries help text
//! for the full pipeline regardless of which components a process runs.
//!
//! Names are prefixed by component (`gateway_`, `consumer_`, `indexer_`,
//! `hub_`, `alerts_`) and suffixed by unit (`_total`, `_seconds`). Labels
//! stay low-cardinality: record kind, worker role, or hub name, never
//! per-service or per-client values.

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the global Prometheus recorder and describe every pipeline
/// metric.
///
/// Call once per process, before anything records.
///
/// # Panics
///
/// Panics if a recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder already installed");

    describe_pipeline_metrics();

    handle
}

/// Serve the rendered recorder state on `/metrics`.
///
/// Binds the listener, then spawns the server in the background and
/// returns.
pub async fn serve_metrics(port: u16, handle: PrometheusHandle) -> std::io::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics exposed on http://{addr}/metrics");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("metrics server error: {e}");
        }
    });

    Ok(())
}

fn describe_pipeline_metrics() {
    describe_gateway_metrics();
    describe_consumer_metrics();
    describe_indexer_metrics();
    describe_hub_metrics();
    describe_alert_metrics();
}

fn describe_gateway_metrics() {
    describe_counter!(
        "gateway_records_received_total",
        "Records received on ingest streams (label: kind)"
    );
    describe_counter!(
        "gateway_records_produced_total",
        "Records acknowledged by the bus (label: kind)"
    );
    describe_counter!(
        "gateway_records_dropped_total",
        "Records dropped after encode or produce failure (label: kind)"
    );
    describe_counter!(
        "gateway_auth_failures_total",
        "Streams rejected by the credential check"
    );
    describe_gauge!("gateway_open_streams", "Currently open ingest streams");
}

fn describe_consumer_metrics() {
    describe_counter!(
        "consumer_messages_total",
        "Messages read from the bus (label: role)"
    );
    describe_counter!(
        "consumer_decode_failures_total",
        "Messages that failed envelope or payload decode (label: role)"
    );
    describe_counter!(
        "consumer_process_failures_total",
        "Messages whose processor returned an error (label: role)"
    );
    describe_counter!(
        "consumer_resubscribes_total",
        "Topic-set changes that triggered a re-subscription (label: role)"
    );
    describe_gauge!(
        "consumer_subscribed_topics",
        "Topics in the current subscription (label: role)"
    );
}

fn describe_indexer_metrics() {
    describe_counter!(
        "indexer_documents_flushed_total",
        "Documents written by bulk flushes (label: kind)"
    );
    describe_counter!(
        "indexer_flush_failures_total",
        "Bulk flushes that failed (label: kind)"
    );
    describe_counter!(
        "indexer_documents_dropped_total",
        "Documents dropped by the retained-buffer cap (label: kind)"
    );
    describe_histogram!(
        "indexer_flush_duration_seconds",
        "Time spent on bulk writes"
    );
    describe_gauge!(
        "indexer_service_batches",
        "Live per-service batches (label: kind)"
    );
}

fn describe_hub_metrics() {
    describe_gauge!("hub_clients", "Connected subscribers (label: hub)");
    describe_gauge!(
        "hub_projects",
        "Projects with at least one subscriber (label: hub)"
    );
    describe_counter!(
        "hub_records_broadcast_total",
        "Records accepted onto project aggregators (label: hub)"
    );
    describe_counter!(
        "hub_records_dropped_total",
        "Records dropped by full aggregator or client queues (label: hub)"
    );
    describe_counter!(
        "hub_stale_clients_reaped_total",
        "Clients removed by the stale sweep (label: hub)"
    );
}

fn describe_alert_metrics() {
    describe_counter!("alerts_events_total", "Alert events received from pub/sub");
    describe_counter!(
        "alerts_parse_failures_total",
        "Alert payloads that failed JSON parsing"
    );
    describe_counter!(
        "alerts_mails_sent_total",
        "Alert e-mails handed to the mailer"
    );
    describe_counter!(
        "alerts_mail_failures_total",
        "Alert e-mails the mailer rejected"
    );
    describe_counter!("alerts_indexed_total", "Alert documents indexed");
}

#[cfg(test)]
mod tests {
    use super::*;

    // The process-global recorder installs at most once, so the whole
    // lifecycle runs in a single test rather than racing across several.
    #[test]
    fn recorder_lifecycle() {
        let first = PrometheusBuilder::new().install_recorder().ok();
        if let Some(handle) = &first {
            // Describing twice must not panic or duplicate.
            describe_pipeline_metrics();
            describe_pipeline_metrics();

            metrics::counter!("gateway_records_received_total", "kind" => "logs").increment(1);
            metrics::gauge!("hub_clients", "hub" => "logs").set(2.0);

            let rendered = handle.render();
            assert!(rendered.contains("gateway_records_received_total"));
            assert!(rendered.contains("hub_clients"));
        }

        // A second install attempt is always rejected.
        assert!(PrometheusBuilder::new().install_recorder().is_err());
    }

    #[test]
    fn metric_names_follow_component_prefixes() {
        for name in [
            "gateway_records_received_total",
            "consumer_messages_total",
            "indexer_documents_flushed_total",
            "hub_records_broadcast_total",
            "alerts_events_total",
        ] {
            let prefix = name.split('_').next().unwrap();
            assert!(
                ["gateway", "consumer", "indexer", "hub", "alerts"].contains(&prefix),
                "unexpected prefix in {name}"
            );
        }
    }
}
