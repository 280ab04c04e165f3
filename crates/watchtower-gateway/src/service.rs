//! Client-streaming ingest RPC implementations.
//!
//! Each open stream is authenticated once, then records flow until the
//! client half-closes, at which point a single ack is returned. Per-record
//! failures (empty service name, encode failure, produce failure) skip the
//! record and keep the stream alive: forward progress beats completeness
//! here, and total-loss conditions show up in broker-side metrics.

use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};

use watchtower_core::proto;
use watchtower_core::record::{log_topic, metric_topic, LogLevel};
use watchtower_core::{EnvelopeCodec, LOG_SUBJECT, METRIC_SUBJECT};

use crate::auth::AuthService;
use crate::producer::BusProducer;

/// Shared pieces of both ingest services.
#[derive(Clone)]
pub struct IngestContext {
    pub auth: Arc<AuthService>,
    pub producer: Arc<BusProducer>,
    pub codec: EnvelopeCodec,
}

/// Log ingestion RPC service.
pub struct LogIngestService {
    ctx: IngestContext,
}

impl LogIngestService {
    pub fn new(ctx: IngestContext) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl proto::LogIngest for LogIngestService {
    async fn receive_logs(
        &self,
        request: Request<Streaming<proto::Log>>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.ctx.auth.authenticate(request.metadata()).await?;
        tracing::info!("new log stream connected");
        metrics::gauge!("gateway_open_streams").increment(1.0);

        let mut stream = request.into_inner();
        let result = self.drain(&mut stream).await;

        metrics::gauge!("gateway_open_streams").decrement(1.0);
        result
    }
}

impl LogIngestService {
    async fn drain(
        &self,
        stream: &mut Streaming<proto::Log>,
    ) -> Result<Response<proto::Ack>, Status> {
        loop {
            let mut record = match stream.message().await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::info!("log stream finished");
                    return Ok(Response::new(proto::Ack { ack: true }));
                }
                Err(e) => {
                    tracing::warn!("failed to receive log: {e}");
                    return Err(Status::unknown(format!("failed to receive log: {e}")));
                }
            };

            metrics::counter!("gateway_records_received_total", "kind" => "logs").increment(1);

            let service = record.service_name.clone();
            if service.is_empty() {
                tracing::warn!("received log with empty service name, skipping");
                continue;
            }
            if record.level.parse::<LogLevel>().is_err() {
                tracing::debug!(level = %record.level, "log carries unknown level");
            }
            if record.timestamp.is_none() {
                record.timestamp = Some(proto::timestamp_now());
            }

            let frame = match self.ctx.codec.encode(LOG_SUBJECT, &record).await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(service = %service, "failed to encode log record: {e}");
                    metrics::counter!("gateway_records_dropped_total", "kind" => "logs")
                        .increment(1);
                    continue;
                }
            };

            let topic = log_topic(&service);
            match self.ctx.producer.send(&topic, &frame).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic = %topic, partition, offset, "delivered log record");
                    metrics::counter!("gateway_records_produced_total", "kind" => "logs")
                        .increment(1);
                }
                Err(e) => {
                    tracing::error!(topic = %topic, "failed to produce log record: {e}");
                    metrics::counter!("gateway_records_dropped_total", "kind" => "logs")
                        .increment(1);
                }
            }
        }
    }
}

/// Metric ingestion RPC service.
pub struct MetricIngestService {
    ctx: IngestContext,
}

impl MetricIngestService {
    pub fn new(ctx: IngestContext) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl proto::MetricIngest for MetricIngestService {
    async fn receive_metrics(
        &self,
        request: Request<Streaming<proto::Metrics>>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.ctx.auth.authenticate(request.metadata()).await?;
        tracing::info!("new metric stream connected");
        metrics::gauge!("gateway_open_streams").increment(1.0);

        let mut stream = request.into_inner();
        let result = self.drain(&mut stream).await;

        metrics::gauge!("gateway_open_streams").decrement(1.0);
        result
    }
}

impl MetricIngestService {
    async fn drain(
        &self,
        stream: &mut Streaming<proto::Metrics>,
    ) -> Result<Response<proto::Ack>, Status> {
        loop {
            let record = match stream.message().await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::info!("metric stream finished");
                    return Ok(Response::new(proto::Ack { ack: true }));
                }
                Err(e) => {
                    tracing::warn!("failed to receive metrics: {e}");
                    return Err(Status::unknown(format!("failed to receive metrics: {e}")));
                }
            };

            metrics::counter!("gateway_records_received_total", "kind" => "metrics").increment(1);

            let service = record.service_name.clone();
            if service.is_empty() {
                tracing::warn!("received metrics with empty service name, skipping");
                continue;
            }

            let frame = match self.ctx.codec.encode(METRIC_SUBJECT, &record).await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(service = %service, "failed to encode metric record: {e}");
                    metrics::counter!("gateway_records_dropped_total", "kind" => "metrics")
                        .increment(1);
                    continue;
                }
            };

            let topic = metric_topic(&service);
            match self.ctx.producer.send(&topic, &frame).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic = %topic, partition, offset, "delivered metric record");
                    metrics::counter!("gateway_records_produced_total", "kind" => "metrics")
                        .increment(1);
                }
                Err(e) => {
                    tracing::error!(topic = %topic, "failed to produce metric record: {e}");
                    metrics::counter!("gateway_records_dropped_total", "kind" => "metrics")
                        .increment(1);
                }
            }
        }
    }
}
