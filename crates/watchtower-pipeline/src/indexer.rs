//! Per-service batching and bulk writes to the search store.
//!
//! Each `service_name` owns a batch: documents accumulate until the batch
//! hits its size threshold or its flush timer fires, whichever first. The
//! timer restarts on every append; a size flush bypasses it.
//!
//! Bulk bodies use one `index` directive per document with the
//! deterministic id `"{topic}-{partition}-{offset}"`, so the at-least-once
//! bus delivery collapses to exactly-once in the store.
//!
//! On a failed flush the buffer is retained and retried on the next
//! append/flush cycle, capped at [`MAX_RETAINED_FACTOR`] times the batch
//! size; beyond the cap the oldest documents are dropped.

use elasticsearch::http::request::JsonBody;
use elasticsearch::params::Refresh;
use elasticsearch::{BulkParts, Elasticsearch};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use watchtower_core::record::{log_index, metric_index, LogDocument, MetricDocument};

use crate::error::{Error, Result};

/// Documents per batch before a size flush.
pub const BATCH_SIZE: usize = 100;

/// Flush interval for log batches.
pub const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Flush interval for metric batches.
pub const METRIC_FLUSH_INTERVAL: Duration = Duration::from_secs(20);

/// Retained-buffer cap, as a multiple of the batch size.
pub const MAX_RETAINED_FACTOR: usize = 100;

/// A document the batch indexer can write.
pub trait IndexedDocument: Serialize + Clone + Send + Sync + 'static {
    /// The service batch this document belongs to.
    fn service_name(&self) -> &str;

    /// Target index for a service's batch, chosen at flush time.
    fn index_name(service: &str) -> String;

    /// Deterministic id making bus redelivery idempotent.
    fn doc_id(&self) -> String;
}

impl IndexedDocument for LogDocument {
    fn service_name(&self) -> &str {
        &self.record.service_name
    }

    fn index_name(service: &str) -> String {
        log_index(service)
    }

    fn doc_id(&self) -> String {
        LogDocument::doc_id(self)
    }
}

impl IndexedDocument for MetricDocument {
    fn service_name(&self) -> &str {
        &self.record.service_name
    }

    fn index_name(service: &str) -> String {
        metric_index(service, chrono::Local::now().date_naive())
    }

    fn doc_id(&self) -> String {
        MetricDocument::doc_id(self)
    }
}

/// Tuning for one indexer instance.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Kind label for logs and metrics ("logs" / "metrics").
    pub kind: &'static str,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retained: usize,
}

impl IndexerConfig {
    pub fn logs() -> Self {
        Self {
            kind: "logs",
            batch_size: BATCH_SIZE,
            flush_interval: LOG_FLUSH_INTERVAL,
            max_retained: BATCH_SIZE * MAX_RETAINED_FACTOR,
        }
    }

    pub fn metrics() -> Self {
        Self {
            kind: "metrics",
            batch_size: BATCH_SIZE,
            flush_interval: METRIC_FLUSH_INTERVAL,
            max_retained: BATCH_SIZE * MAX_RETAINED_FACTOR,
        }
    }
}

struct BatchState<D> {
    buffer: Vec<D>,
    flush_task: Option<JoinHandle<()>>,
}

/// One per-service accumulator. The async mutex covers both the buffer and
/// the in-flight bulk call, so concurrent flushes on one batch are
/// impossible by construction.
struct ServiceBatch<D> {
    service: String,
    state: Mutex<BatchState<D>>,
}

/// Per-service batching indexer for one document kind.
pub struct BatchIndexer<D> {
    es: Elasticsearch,
    config: IndexerConfig,
    batches: RwLock<HashMap<String, Arc<ServiceBatch<D>>>>,
}

impl<D: IndexedDocument> BatchIndexer<D> {
    pub fn new(es: Elasticsearch, config: IndexerConfig) -> Arc<Self> {
        Arc::new(Self {
            es,
            config,
            batches: RwLock::new(HashMap::new()),
        })
    }

    /// Append a document to its service batch, flushing when the batch
    /// fills. Errors from a size-triggered flush propagate to the caller.
    pub async fn process(self: &Arc<Self>, doc: D) -> Result<()> {
        let service = doc.service_name();
        if service.is_empty() {
            return Err(Error::EmptyServiceName);
        }

        let batch = self.get_or_create_batch(service);
        self.add_document(&batch, doc).await
    }

    fn get_or_create_batch(&self, service: &str) -> Arc<ServiceBatch<D>> {
        if let Some(batch) = self.batches.read().get(service) {
            return Arc::clone(batch);
        }

        let mut batches = self.batches.write();
        let batch = Arc::clone(batches.entry(service.to_string()).or_insert_with(|| {
            Arc::new(ServiceBatch {
                service: service.to_string(),
                state: Mutex::new(BatchState {
                    buffer: Vec::with_capacity(self.config.batch_size),
                    flush_task: None,
                }),
            })
        }));
        metrics::gauge!("indexer_service_batches", "kind" => self.config.kind)
            .set(batches.len() as f64);
        batch
    }

    async fn add_document(self: &Arc<Self>, batch: &Arc<ServiceBatch<D>>, doc: D) -> Result<()> {
        let mut state = batch.state.lock().await;
        state.buffer.push(doc);

        if state.buffer.len() > self.config.max_retained {
            let excess = state.buffer.len() - self.config.max_retained;
            state.buffer.drain(..excess);
            metrics::counter!("indexer_documents_dropped_total", "kind" => self.config.kind)
                .increment(excess as u64);
            tracing::warn!(
                service = %batch.service,
                dropped = excess,
                "retained buffer over cap, dropping oldest documents"
            );
        }

        // Restart the flush timer on every append.
        if let Some(task) = state.flush_task.take() {
            task.abort();
        }

        if state.buffer.len() >= self.config.batch_size {
            return self.flush_locked(&batch.service, &mut state).await;
        }

        let indexer = Arc::clone(self);
        let timer_batch = Arc::clone(batch);
        let interval = self.config.flush_interval;
        state.flush_task = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let mut state = timer_batch.state.lock().await;
            if let Err(e) = indexer.flush_locked(&timer_batch.service, &mut state).await {
                tracing::error!(service = %timer_batch.service, "timed flush failed: {e}");
            }
        }));

        Ok(())
    }

    /// Flush one batch. Caller holds the batch lock. The buffer clears
    /// only after the store accepted the write.
    async fn flush_locked(&self, service: &str, state: &mut BatchState<D>) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        let index = D::index_name(service);
        let body = build_bulk_body(&index, &state.buffer)?;
        let count = state.buffer.len();

        let start = std::time::Instant::now();
        let response = self
            .es
            .bulk(BulkParts::Index(&index))
            .body(body.into_iter().map(JsonBody::new).collect::<Vec<_>>())
            .refresh(Refresh::False)
            .send()
            .await
            .inspect_err(|_| {
                metrics::counter!("indexer_flush_failures_total", "kind" => self.config.kind)
                    .increment(1);
            })?;

        let status = response.status_code();
        if !status.is_success() {
            metrics::counter!("indexer_flush_failures_total", "kind" => self.config.kind)
                .increment(1);
            return Err(Error::BulkRejected(format!(
                "bulk request for service {service} returned status {status}"
            )));
        }

        let body: Value = response.json().await?;
        if body["errors"].as_bool().unwrap_or(false) {
            metrics::counter!("indexer_flush_failures_total", "kind" => self.config.kind)
                .increment(1);
            return Err(Error::BulkRejected(format!(
                "bulk response for service {service} reported item errors"
            )));
        }

        metrics::counter!("indexer_documents_flushed_total", "kind" => self.config.kind)
            .increment(count as u64);
        metrics::histogram!("indexer_flush_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::info!(service, count, index = %index, "indexed documents");

        state.buffer.clear();
        Ok(())
    }

    /// Flush every batch, collecting failures.
    pub async fn flush_all(&self) -> Result<()> {
        let batches: Vec<Arc<ServiceBatch<D>>> =
            self.batches.read().values().cloned().collect();

        let mut failures = Vec::new();
        for batch in batches {
            let mut state = batch.state.lock().await;
            if let Err(e) = self.flush_locked(&batch.service, &mut state).await {
                failures.push(format!("service {}: {e}", batch.service));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::BulkRejected(format!(
                "flush errors: {}",
                failures.join("; ")
            )))
        }
    }

    /// Stop all timers and final-flush. Called on shutdown.
    pub async fn close(&self) -> Result<()> {
        let batches: Vec<Arc<ServiceBatch<D>>> =
            self.batches.read().values().cloned().collect();

        for batch in &batches {
            let mut state = batch.state.lock().await;
            if let Some(task) = state.flush_task.take() {
                task.abort();
            }
        }

        self.flush_all().await
    }

    /// Buffered document count for a service. Exposed for tests.
    pub async fn buffered(&self, service: &str) -> usize {
        let Some(batch) = self.batches.read().get(service).cloned() else {
            return 0;
        };
        batch.state.lock().await.buffer.len()
    }
}

/// Build the NDJSON action/document pairs for one bulk request.
fn build_bulk_body<D: IndexedDocument>(index: &str, docs: &[D]) -> Result<Vec<Value>> {
    let mut body = Vec::with_capacity(docs.len() * 2);
    for doc in docs {
        body.push(json!({
            "index": { "_index": index, "_id": doc.doc_id() }
        }));
        body.push(serde_json::to_value(doc)?);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use elasticsearch::http::transport::Transport;
    use watchtower_core::record::LogRecord;

    fn doc(service: &str, offset: i64) -> LogDocument {
        LogDocument {
            record: LogRecord {
                service_name: service.to_string(),
                build_details: None,
                level: "info".into(),
                message: format!("message {offset}"),
                stack: String::new(),
                request_id: String::new(),
                request_url: String::new(),
                request_method: String::new(),
                ip_address: String::new(),
                user_agent: String::new(),
                response_status: String::new(),
                response_time: String::new(),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
            topic: format!("logs-{service}"),
            partition: 0,
            offset,
        }
    }

    /// A client whose every request fails fast: nothing listens on port 9.
    fn unreachable_client() -> Elasticsearch {
        let transport = Transport::single_node("http://127.0.0.1:9").unwrap();
        Elasticsearch::new(transport)
    }

    #[test]
    fn test_build_bulk_body_pairs() {
        let docs = vec![doc("svcA", 1), doc("svcA", 2)];
        let body = build_bulk_body("logs-svcA", &docs).unwrap();

        assert_eq!(body.len(), 4);
        assert_eq!(body[0]["index"]["_index"], "logs-svcA");
        assert_eq!(body[0]["index"]["_id"], "logs-svcA-0-1");
        assert_eq!(body[1]["serviceName"], "svcA");
        assert_eq!(body[2]["index"]["_id"], "logs-svcA-0-2");
    }

    #[test]
    fn test_redelivery_produces_same_doc_id() {
        // Same bus coordinates, delivered twice: same id, one document.
        let first = doc("svcA", 7);
        let second = doc("svcA", 7);
        assert_eq!(
            IndexedDocument::doc_id(&first),
            IndexedDocument::doc_id(&second)
        );
    }

    #[tokio::test]
    async fn test_empty_service_name_rejected() {
        let indexer = BatchIndexer::new(unreachable_client(), IndexerConfig::logs());
        let err = indexer.process(doc("", 1)).await.unwrap_err();
        assert!(matches!(err, Error::EmptyServiceName));
    }

    #[tokio::test]
    async fn test_appends_below_threshold_do_not_flush() {
        let indexer = BatchIndexer::new(unreachable_client(), IndexerConfig::logs());

        for offset in 0..99 {
            indexer.process(doc("svcA", offset)).await.unwrap();
        }
        assert_eq!(indexer.buffered("svcA").await, 99);
    }

    #[tokio::test]
    async fn test_size_flush_failure_retains_buffer() {
        let indexer = BatchIndexer::new(unreachable_client(), IndexerConfig::logs());

        for offset in 0..99 {
            indexer.process(doc("svcA", offset)).await.unwrap();
        }
        // The hundredth append triggers a flush; the store is unreachable,
        // so the flush fails and the buffer is retained for retry.
        let err = indexer.process(doc("svcA", 99)).await.unwrap_err();
        assert!(matches!(err, Error::Elasticsearch(_)));
        assert_eq!(indexer.buffered("svcA").await, 100);
    }

    #[tokio::test]
    async fn test_batches_are_per_service() {
        let indexer = BatchIndexer::new(unreachable_client(), IndexerConfig::logs());

        indexer.process(doc("svcA", 1)).await.unwrap();
        indexer.process(doc("svcB", 1)).await.unwrap();
        indexer.process(doc("svcB", 2)).await.unwrap();

        assert_eq!(indexer.buffered("svcA").await, 1);
        assert_eq!(indexer.buffered("svcB").await, 2);
        assert_eq!(indexer.buffered("svcC").await, 0);
    }

    #[tokio::test]
    async fn test_retained_buffer_cap_drops_oldest() {
        let config = IndexerConfig {
            kind: "logs",
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            max_retained: 150,
        };
        let indexer = BatchIndexer::new(unreachable_client(), config);

        // Every size flush fails; the buffer keeps growing until the cap.
        for offset in 0..200 {
            let _ = indexer.process(doc("svcA", offset)).await;
        }
        assert!(indexer.buffered("svcA").await <= 150);
    }

    #[test]
    fn test_metric_index_dated_at_flush() {
        let today = chrono::Local::now().date_naive();
        let name = <MetricDocument as IndexedDocument>::index_name("svcA");
        assert_eq!(name, metric_index("svcA", today));
        assert!(name.starts_with("metrics-svcA-"));
    }
}
