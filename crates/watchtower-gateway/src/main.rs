//! Watchtower ingest gateway daemon.
//!
//! Accepts authenticated client streams of log and metric records over gRPC
//! and publishes each record to its project's bus topic, waiting for broker
//! acknowledgement before moving on.
//!
//! # Graceful Shutdown
//!
//! SIGINT stops accepting new streams and lets open streams finish their
//! current records before the process exits.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use watchtower_core::metrics::{init_metrics, serve_metrics};
use watchtower_core::proto::{LogIngestServer, MetricIngestServer};
use watchtower_core::{EnvelopeCodec, SchemaRegistry};
use watchtower_gateway::auth::AuthService;
use watchtower_gateway::producer::BusProducer;
use watchtower_gateway::service::{IngestContext, LogIngestService, MetricIngestService};
use watchtower_gateway::Config;

/// Watchtower ingest gateway.
#[derive(Parser, Debug)]
#[command(name = "watchtower-gateway")]
#[command(about = "Streaming gRPC ingest gateway", long_about = None)]
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

    tracing::info!("Watchtower gateway starting...");

    if config.metrics_port > 0 {
        let handle = init_metrics();
        serve_metrics(config.metrics_port, handle).await?;
    }

    let auth = Arc::new(
        AuthService::connect(&config.postgres_dsn, config.private_key.clone())
            .await
            .context("failed to connect credential store")?,
    );

    let producer =
        Arc::new(BusProducer::new(&config.kafka_brokers).context("failed to create producer")?);

    let registry = Arc::new(SchemaRegistry::new(config.schema_registry_url.clone()));
    let codec = EnvelopeCodec::new(registry);

    let ctx = IngestContext {
        auth,
        producer,
        codec,
    };

    let addr = config
        .grpc_addr
        .parse()
        .context("invalid WATCHTOWER_GRPC_ADDR")?;

    tracing::info!(addr = %config.grpc_addr, "gRPC server listening");

    Server::builder()
        .add_service(LogIngestServer::new(LogIngestService::new(ctx.clone())))
        .add_service(MetricIngestServer::new(MetricIngestService::new(ctx)))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .context("gRPC server error")?;

    tracing::info!("gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        return;
    }
    tracing::info!("shutdown signal received, stopping gRPC server");
}
