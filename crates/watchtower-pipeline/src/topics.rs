//! Per-project topic provisioning and discovery.
//!
//! Every project owns exactly two topics, `logs-<project>` and
//! `metrics-<project>`, created idempotently with fixed settings. The
//! prefix listing feeds the consumer workers' dynamic subscription loop:
//! new projects enter the data plane without a restart.

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::types::RDKafkaErrorCode;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use watchtower_core::record::{log_topic, metric_topic};

use crate::error::{Error, Result};

/// Partitions per topic.
const NUM_PARTITIONS: i32 = 2;

/// Replication factor per topic.
const REPLICATION: i32 = 1;

/// Fixed settings applied to every project topic.
const TOPIC_SETTINGS: &[(&str, &str)] = &[
    ("cleanup.policy", "delete"),
    ("retention.ms", "604800000"), // 7 days
    ("segment.ms", "86400000"),    // 1 day
];

/// Timeout for metadata reads.
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Admin-surface handle for bus topics.
pub struct TopicManager {
    admin: AdminClient<DefaultClientContext>,
    /// Group-less consumer used only for metadata reads; the admin client
    /// cannot list topics.
    metadata: BaseConsumer,
}

impl TopicManager {
    /// Create a manager against the given broker list.
    pub fn new(brokers: &str) -> Result<Arc<Self>> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("socket.timeout.ms", "20000")
            .create()?;

        let metadata: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("socket.timeout.ms", "20000")
            .create()?;

        Ok(Arc::new(Self { admin, metadata }))
    }

    /// Idempotently create both topics for a project.
    ///
    /// A topic that already exists counts as success; any other creation
    /// error propagates.
    pub async fn ensure_project_topics(&self, project: &str) -> Result<()> {
        let names = project_topics(project);
        let topics: Vec<NewTopic<'_>> = names
            .iter()
            .map(|name| {
                let mut topic =
                    NewTopic::new(name, NUM_PARTITIONS, TopicReplication::Fixed(REPLICATION));
                for (key, value) in TOPIC_SETTINGS {
                    topic = topic.set(key, value);
                }
                topic
            })
            .collect();

        let results = self
            .admin
            .create_topics(topics.iter(), &AdminOptions::new())
            .await?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(topic = %topic, "created topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::info!(topic = %topic, "topic already exists");
                }
                Err((topic, code)) => {
                    tracing::error!(topic = %topic, "failed to create topic: {code}");
                    return Err(Error::Kafka(rdkafka::error::KafkaError::AdminOp(code)));
                }
            }
        }

        Ok(())
    }

    /// Current bus-advertised topics starting with `prefix`.
    ///
    /// Topics whose metadata carries an error are skipped with a log line.
    pub async fn list_topics_with_prefix(self: &Arc<Self>, prefix: &str) -> Result<BTreeSet<String>> {
        let manager = Arc::clone(self);
        let prefix = prefix.to_string();

        // Metadata fetch is a blocking librdkafka call.
        tokio::task::spawn_blocking(move || {
            let metadata = manager.metadata.fetch_metadata(None, METADATA_TIMEOUT)?;

            let mut matching = BTreeSet::new();
            for topic in metadata.topics() {
                if let Some(e) = topic.error() {
                    tracing::warn!(topic = topic.name(), "topic metadata error: {:?}", e);
                    continue;
                }
                if topic.name().starts_with(&prefix) {
                    matching.insert(topic.name().to_string());
                }
            }
            Ok(matching)
        })
        .await
        .expect("metadata task never panics")
    }
}

/// The two topics a project owns.
pub fn project_topics(project: &str) -> [String; 2] {
    [log_topic(project), metric_topic(project)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_topics() {
        let [logs, metrics] = project_topics("svcA");
        assert_eq!(logs, "logs-svcA");
        assert_eq!(metrics, "metrics-svcA");
    }

    #[test]
    fn test_topic_settings() {
        let settings: std::collections::HashMap<_, _> = TOPIC_SETTINGS.iter().copied().collect();
        assert_eq!(settings["cleanup.policy"], "delete");
        assert_eq!(settings["retention.ms"], "604800000");
        assert_eq!(settings["segment.ms"], "86400000");
        assert_eq!(NUM_PARTITIONS, 2);
        assert_eq!(REPLICATION, 1);
    }

    // Creation and listing tests would require a running broker
}
