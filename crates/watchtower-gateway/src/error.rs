//! Error types for the ingest gateway.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// Bus producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Credential store error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Envelope codec or registry error.
    #[error(transparent)]
    Codec(#[from] watchtower_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
