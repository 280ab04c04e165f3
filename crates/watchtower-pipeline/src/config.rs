//! Pipeline configuration loaded from environment.

use crate::mailer::MailerConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address for the SSE and admin surface.
    pub bind_addr: String,

    /// Kafka broker list, comma-separated.
    pub kafka_brokers: String,

    /// Schema registry base URL.
    pub schema_registry_url: String,

    /// Search store base URL.
    pub elasticsearch_url: String,

    /// In-memory store URL (alert pub/sub).
    pub redis_url: String,

    /// Directory (tenant) id for stream token validation.
    pub tenant_id: String,

    /// Application (client) id for stream token validation.
    pub client_id: String,

    /// Mailer settings; absent disables alert e-mails.
    pub mailer: Option<MailerConfig>,

    /// Prometheus metrics port (0 to disable).
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WATCHTOWER_TENANT_ID`, `WATCHTOWER_CLIENT_ID`: token validation
    ///
    /// Optional:
    /// - `WATCHTOWER_BIND_ADDR` (default: "0.0.0.0:8080")
    /// - `WATCHTOWER_KAFKA_BROKERS` (default: "localhost:9092")
    /// - `WATCHTOWER_SCHEMA_REGISTRY_URL` (default: "http://localhost:8081")
    /// - `WATCHTOWER_ELASTICSEARCH_URL` (default: "http://localhost:9200")
    /// - `WATCHTOWER_REDIS_URL` (default: "redis://localhost:6379")
    /// - `WATCHTOWER_MAILER_ENDPOINT`, `WATCHTOWER_MAILER_ACCESS_KEY`,
    ///   `WATCHTOWER_MAILER_SENDER`: all three enable alert e-mails
    /// - `WATCHTOWER_METRICS_PORT` (default: 9092)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("WATCHTOWER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let kafka_brokers = std::env::var("WATCHTOWER_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string());

        let schema_registry_url = std::env::var("WATCHTOWER_SCHEMA_REGISTRY_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());

        let elasticsearch_url = std::env::var("WATCHTOWER_ELASTICSEARCH_URL")
            .unwrap_or_else(|_| "http://localhost:9200".to_string());

        let redis_url = std::env::var("WATCHTOWER_REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let tenant_id = std::env::var("WATCHTOWER_TENANT_ID")
            .map_err(|_| anyhow::anyhow!("WATCHTOWER_TENANT_ID environment variable is required"))?;
        let client_id = std::env::var("WATCHTOWER_CLIENT_ID")
            .map_err(|_| anyhow::anyhow!("WATCHTOWER_CLIENT_ID environment variable is required"))?;

        let mailer = match (
            std::env::var("WATCHTOWER_MAILER_ENDPOINT"),
            std::env::var("WATCHTOWER_MAILER_ACCESS_KEY"),
            std::env::var("WATCHTOWER_MAILER_SENDER"),
        ) {
            (Ok(endpoint), Ok(access_key), Ok(sender)) => Some(MailerConfig {
                endpoint,
                access_key,
                sender,
            }),
            _ => None,
        };

        let metrics_port = std::env::var("WATCHTOWER_METRICS_PORT")
            .ok()
            .map(|p| p.parse())
            .transpose()?
            .unwrap_or(9092);

        tracing::info!(
            bind_addr = %bind_addr,
            kafka_brokers = %kafka_brokers,
            elasticsearch_url = %elasticsearch_url,
            redis_url = %redis_url,
            mailer_enabled = mailer.is_some(),
            metrics_port,
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            kafka_brokers,
            schema_registry_url,
            elasticsearch_url,
            redis_url,
            tenant_id,
            client_id,
            mailer,
            metrics_port,
        })
    }
}
