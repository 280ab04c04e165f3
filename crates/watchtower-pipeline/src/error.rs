//! Error types for the consumer/indexer pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Bus client error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Search store transport error.
    #[error("Elasticsearch error: {0}")]
    Elasticsearch(#[from] elasticsearch::Error),

    /// The search store answered, but rejected the write.
    #[error("bulk write rejected: {0}")]
    BulkRejected(String),

    /// In-memory store error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Envelope codec or registry error.
    #[error(transparent)]
    Codec(#[from] watchtower_core::Error),

    /// Outbound HTTP error (mailer).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The mailer endpoint rejected a submission.
    #[error("mail send failed: {0}")]
    Mail(String),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record arrived without a service name.
    #[error("service name is required")]
    EmptyServiceName,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
