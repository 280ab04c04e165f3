//! Synchronous-delivery Kafka producer.
//!
//! Every record is awaited through to broker acknowledgement under
//! `acks=all` with up to five internal retries; callers learn the
//! partition and offset the record landed on.

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

use crate::error::{Error, Result};

/// How long to wait for a delivery report before giving the record up.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(20);

/// Producer handle publishing envelope frames to per-project topics.
pub struct BusProducer {
    inner: FutureProducer,
}

impl BusProducer {
    /// Create a producer for the given broker list.
    pub fn new(brokers: &str) -> Result<Self> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("message.send.max.retries", "5")
            .set("socket.timeout.ms", "20000")
            .set("message.timeout.ms", "20000")
            .create()?;

        tracing::info!(brokers, "Kafka producer created");
        Ok(Self { inner })
    }

    /// Publish one value and wait for broker acknowledgement.
    ///
    /// Returns the `(partition, offset)` assigned to the record. Keys are
    /// unset; the broker balances across the topic's partitions.
    pub async fn send(&self, topic: &str, payload: &[u8]) -> Result<(i32, i64)> {
        let record = FutureRecord::<(), _>::to(topic).payload(payload);

        match self.inner.send(record, Timeout::After(DELIVERY_TIMEOUT)).await {
            Ok((partition, offset)) => Ok((partition, offset)),
            Err((e, _)) => Err(Error::Kafka(e)),
        }
    }
}
