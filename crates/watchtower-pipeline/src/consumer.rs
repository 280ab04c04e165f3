//! Group-subscribed consumer workers with dynamic topic tracking.
//!
//! One worker per role (logs, metrics), each in its own consumer group.
//! The worker periodically re-lists topics matching its prefix and, when
//! the set changes, re-subscribes; the group rebalances at the claim
//! boundary so in-flight messages complete naturally.
//!
//! Per-message failures never stall the group: a message that fails to
//! decode or process is logged, its offset stored, and the worker moves on.
//! Offsets are stored only after the processing attempt and auto-committed
//! every two seconds.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use watchtower_core::record::{LogDocument, LogRecord, MetricDocument, MetricRecord};
use watchtower_core::EnvelopeCodec;
use watchtower_stream::Hub;

use crate::error::Result;
use crate::indexer::BatchIndexer;
use crate::topics::TopicManager;

/// How often the worker re-lists its topic set.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(120);

/// Decodes and processes one bus message for a worker role.
pub trait MessageHandler: Send + Sync {
    /// Role label used in logs and metrics.
    fn role(&self) -> &'static str;

    /// Handle one raw message. Malformed payloads are swallowed here after
    /// logging; a returned error means the processor failed, and the worker
    /// logs it and advances either way.
    fn handle(
        &self,
        payload: &[u8],
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Consumer configuration for one worker role.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic_prefix: &'static str,
}

/// A group-subscribed worker for one role.
pub struct ConsumerWorker<H> {
    consumer: StreamConsumer,
    handler: H,
    topics: Arc<TopicManager>,
    config: ConsumerConfig,
}

impl<H: MessageHandler> ConsumerWorker<H> {
    pub fn new(config: ConsumerConfig, topics: Arc<TopicManager>, handler: H) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "2000")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("partition.assignment.strategy", "roundrobin")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "60000")
            .set("socket.timeout.ms", "20000")
            .create()?;

        tracing::info!(group = %config.group_id, "Kafka consumer group created");

        Ok(Self {
            consumer,
            handler,
            topics,
            config,
        })
    }

    /// Run until the shutdown channel flips.
    ///
    /// The initial topic fetch must succeed; after that, list failures
    /// mean "no change this tick".
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let role = self.handler.role();

        let mut current = self
            .topics
            .list_topics_with_prefix(self.config.topic_prefix)
            .await?;
        self.subscribe(&current)?;

        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        refresh.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!(role, "consumer shutting down");
                    break;
                }
                _ = refresh.tick() => {
                    match self
                        .topics
                        .list_topics_with_prefix(self.config.topic_prefix)
                        .await
                    {
                        Ok(topics) => {
                            if topics != current {
                                if topics.is_empty() {
                                    tracing::warn!(role, "no valid topics found, skipping resubscribe");
                                    continue;
                                }
                                tracing::info!(role, count = topics.len(), "topic set changed, resubscribing");
                                metrics::counter!("consumer_resubscribes_total", "role" => role)
                                    .increment(1);
                                self.consumer.unsubscribe();
                                if let Err(e) = self.subscribe(&topics) {
                                    tracing::error!(role, "resubscribe failed: {e}");
                                    continue;
                                }
                                current = topics;
                            }
                        }
                        Err(e) => {
                            // No change this tick.
                            tracing::warn!(role, "error fetching topics: {e}");
                        }
                    }
                }
                message = self.consumer.recv(), if !current.is_empty() => {
                    match message {
                        Ok(message) => self.handle_message(&message).await,
                        Err(e) => tracing::error!(role, "consumer error: {e}"),
                    }
                }
            }
        }

        Ok(())
    }

    fn subscribe(&self, topics: &BTreeSet<String>) -> Result<()> {
        if topics.is_empty() {
            tracing::warn!(
                role = self.handler.role(),
                "no topics to subscribe to yet, waiting for discovery"
            );
            return Ok(());
        }

        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&refs)?;

        metrics::gauge!("consumer_subscribed_topics", "role" => self.handler.role())
            .set(topics.len() as f64);
        tracing::info!(
            role = self.handler.role(),
            topics = ?refs,
            "subscribed to topics"
        );
        Ok(())
    }

    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        let role = self.handler.role();
        metrics::counter!("consumer_messages_total", "role" => role).increment(1);

        tracing::debug!(
            role,
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "received message"
        );

        let payload = message.payload().unwrap_or_default();
        if let Err(e) = self
            .handler
            .handle(payload, message.topic(), message.partition(), message.offset())
            .await
        {
            metrics::counter!("consumer_process_failures_total", "role" => role).increment(1);
            tracing::warn!(
                role,
                topic = message.topic(),
                offset = message.offset(),
                "failed to process message: {e}"
            );
        }

        // Advance past the message whether or not it processed; a poison
        // pill must not halt the claim.
        if let Err(e) = self.consumer.store_offset_from_message(message) {
            tracing::error!(role, "failed to store offset: {e}");
        }
    }
}

/// Log-role handler: decode, broadcast live, hand to the batch indexer.
pub struct LogHandler {
    pub codec: EnvelopeCodec,
    pub indexer: Arc<BatchIndexer<LogDocument>>,
    pub hub: Arc<Hub<LogRecord>>,
}

impl MessageHandler for LogHandler {
    fn role(&self) -> &'static str {
        "logs"
    }

    async fn handle(&self, payload: &[u8], topic: &str, partition: i32, offset: i64) -> Result<()> {
        let log = match self.codec.decode_log(payload).await {
            Ok(log) => log,
            Err(e) => {
                // Counted here, not as a process failure; the offset is
                // stored either way.
                metrics::counter!("consumer_decode_failures_total", "role" => "logs").increment(1);
                tracing::warn!(topic, partition, offset, "failed to decode message: {e}");
                return Ok(());
            }
        };

        // Best-effort live delivery; the hub drops when nobody subscribes.
        self.hub
            .broadcast(&log.service_name, LogRecord::from(&log));

        let doc = LogDocument::from_proto(&log, topic, partition, offset);
        self.indexer.process(doc).await
    }
}

/// Metric-role handler: decode, broadcast live, hand to the batch indexer.
pub struct MetricHandler {
    pub codec: EnvelopeCodec,
    pub indexer: Arc<BatchIndexer<MetricDocument>>,
    pub hub: Arc<Hub<MetricRecord>>,
}

impl MessageHandler for MetricHandler {
    fn role(&self) -> &'static str {
        "metrics"
    }

    async fn handle(&self, payload: &[u8], topic: &str, partition: i32, offset: i64) -> Result<()> {
        let metrics_record = match self.codec.decode_metrics(payload).await {
            Ok(m) => m,
            Err(e) => {
                metrics::counter!("consumer_decode_failures_total", "role" => "metrics")
                    .increment(1);
                tracing::warn!(topic, partition, offset, "failed to decode message: {e}");
                return Ok(());
            }
        };

        self.hub.broadcast(
            &metrics_record.service_name,
            MetricRecord::from(&metrics_record),
        );

        let doc = MetricDocument::from_proto(&metrics_record, topic, partition, offset);
        self.indexer.process(doc).await
    }
}
