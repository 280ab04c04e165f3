//! Watchtower pipeline daemon.
//!
//! Runs the whole server side of the data plane in one process: the log and
//! metric consumer workers, the batch indexers, the three live hubs with
//! their SSE surface, and the alert bridge.
//!
//! # Graceful Shutdown
//!
//! SIGINT (or a fatal worker error) flips the shutdown channel: consumers
//! drain their current claim, the indexers final-flush, the hubs tear
//! down, and the process waits up to five seconds before forcing exit.

use anyhow::Context;
use clap::Parser;
use elasticsearch::http::transport::Transport;
use elasticsearch::Elasticsearch;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use watchtower_core::metrics::{init_metrics, serve_metrics};
use watchtower_core::record::{LOG_TOPIC_PREFIX, METRIC_TOPIC_PREFIX};
use watchtower_core::{EnvelopeCodec, SchemaRegistry};
use watchtower_pipeline::alerts::AlertBridge;
use watchtower_pipeline::consumer::{
    ConsumerConfig, ConsumerWorker, LogHandler, MetricHandler,
};
use watchtower_pipeline::indexer::{BatchIndexer, IndexerConfig};
use watchtower_pipeline::mailer::Mailer;
use watchtower_pipeline::server::{app_router, AdminState};
use watchtower_pipeline::topics::TopicManager;
use watchtower_pipeline::Config;
use watchtower_stream::{AuthConfig, Hub, HubConfig, SseAuth, StreamState};

/// How long to wait for workers after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Cadence of the stale-subscriber sweep.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Watchtower pipeline daemon.
#[derive(Parser, Debug)]
#[command(name = "watchtower-pipeline")]
#[command(about = "Consumer fabric, batch indexer, and live delivery", long_about = None)]
#[command(version)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;

    tracing::info!("Watchtower pipeline starting...");

    if config.metrics_port > 0 {
        let handle = init_metrics();
        serve_metrics(config.metrics_port, handle).await?;
    }

    // Shared clients
    let transport = Transport::single_node(&config.elasticsearch_url)
        .context("invalid Elasticsearch URL")?;
    let es = Elasticsearch::new(transport);

    let registry = Arc::new(SchemaRegistry::new(config.schema_registry_url.clone()));
    let codec = EnvelopeCodec::new(registry);

    let topics = TopicManager::new(&config.kafka_brokers)?;

    // Hubs and the SSE surface
    let log_hub = Hub::new("logs", HubConfig::default());
    let metric_hub = Hub::new("metrics", HubConfig::default());
    let alert_hub = Hub::new("alerts", HubConfig::default());

    let auth = Arc::new(SseAuth::new(AuthConfig {
        tenant_id: config.tenant_id.clone(),
        client_id: config.client_id.clone(),
    }));

    let stream_state = StreamState {
        logs: Arc::clone(&log_hub),
        metrics: Arc::clone(&metric_hub),
        alerts: Arc::clone(&alert_hub),
        auth,
    };
    let admin_state = AdminState {
        topics: Arc::clone(&topics),
    };

    // Indexers
    let log_indexer = BatchIndexer::new(es.clone(), IndexerConfig::logs());
    let metric_indexer = BatchIndexer::new(es.clone(), IndexerConfig::metrics());

    // Shutdown fabric: workers stop when the channel flips; fatal worker
    // errors initiate shutdown themselves.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (error_tx, mut error_rx) = mpsc::channel::<anyhow::Error>(4);
    let mut workers = Vec::new();

    // Log consumer
    {
        let worker = ConsumerWorker::new(
            ConsumerConfig {
                brokers: config.kafka_brokers.clone(),
                group_id: "log-consumer-group".to_string(),
                topic_prefix: LOG_TOPIC_PREFIX,
            },
            Arc::clone(&topics),
            LogHandler {
                codec: codec.clone(),
                indexer: Arc::clone(&log_indexer),
                hub: Arc::clone(&log_hub),
            },
        )?;
        let shutdown = shutdown_rx.clone();
        let errors = error_tx.clone();
        workers.push(tokio::spawn(async move {
            tracing::info!("log consumer starting...");
            if let Err(e) = worker.run(shutdown).await {
                let _ = errors.send(anyhow::anyhow!("log consumer error: {e}")).await;
            }
        }));
    }

    // Metric consumer
    {
        let worker = ConsumerWorker::new(
            ConsumerConfig {
                brokers: config.kafka_brokers.clone(),
                group_id: "metrics-consumer-group".to_string(),
                topic_prefix: METRIC_TOPIC_PREFIX,
            },
            Arc::clone(&topics),
            MetricHandler {
                codec: codec.clone(),
                indexer: Arc::clone(&metric_indexer),
                hub: Arc::clone(&metric_hub),
            },
        )?;
        let shutdown = shutdown_rx.clone();
        let errors = error_tx.clone();
        workers.push(tokio::spawn(async move {
            tracing::info!("metric consumer starting...");
            if let Err(e) = worker.run(shutdown).await {
                let _ = errors
                    .send(anyhow::anyhow!("metric consumer error: {e}"))
                    .await;
            }
        }));
    }

    // Alert bridge
    {
        let redis =
            redis::Client::open(config.redis_url.clone()).context("invalid Redis URL")?;
        let mailer = config
            .mailer
            .clone()
            .map(Mailer::new)
            .transpose()
            .context("invalid mailer configuration")?;
        let bridge = AlertBridge::new(redis, es.clone(), Arc::clone(&alert_hub), mailer);
        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            tracing::info!("alert bridge starting...");
            bridge.run(shutdown).await;
        }));
    }

    // Stale-subscriber sweep
    {
        let log_hub = Arc::clone(&log_hub);
        let metric_hub = Arc::clone(&metric_hub);
        let alert_hub = Arc::clone(&alert_hub);
        let mut shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            let mut sweep = tokio::time::interval(STALE_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sweep.tick() => {
                        log_hub.cleanup_stale_clients();
                        metric_hub.cleanup_stale_clients();
                        alert_hub.cleanup_stale_clients();
                    }
                }
            }
        }));
    }

    // HTTP surface (SSE + admin)
    {
        let app = app_router(stream_state, admin_state);
        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        tracing::info!(addr = %config.bind_addr, "HTTP server listening");

        let mut shutdown = shutdown_rx.clone();
        let errors = error_tx.clone();
        workers.push(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                let _ = errors.send(anyhow::anyhow!("HTTP server error: {e}")).await;
            }
        }));
    }

    drop(error_tx);

    // Run until a signal or a fatal worker error.
    let mut fatal = None;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received");
        }
        error = error_rx.recv() => {
            if let Some(error) = error {
                tracing::error!("fatal worker error: {error}, initiating shutdown");
                fatal = Some(error);
            }
        }
    }

    tracing::info!("shutting down all services...");
    let _ = shutdown_tx.send(true);

    // Final flush before the workers are abandoned.
    if let Err(e) = log_indexer.close().await {
        tracing::error!("final log flush failed: {e}");
    }
    if let Err(e) = metric_indexer.close().await {
        tracing::error!("final metric flush failed: {e}");
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(workers)).await;
    match drained {
        Ok(_) => tracing::info!("all services shut down gracefully"),
        Err(_) => tracing::warn!("shutdown timed out, forcing exit"),
    }

    tracing::info!("pipeline shutdown complete");
    match fatal {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
