//! Gateway configuration loaded from environment.

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// gRPC bind address (e.g., "0.0.0.0:50051").
    pub grpc_addr: String,

    /// Kafka broker list, comma-separated.
    pub kafka_brokers: String,

    /// Schema registry base URL.
    pub schema_registry_url: String,

    /// Credential store DSN.
    pub postgres_dsn: String,

    /// Shared secret for ingest stream HMACs.
    pub private_key: String,

    /// Prometheus metrics port (0 to disable).
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WATCHTOWER_POSTGRES_DSN`: credential store connection string
    /// - `WATCHTOWER_PRIVATE_KEY`: HMAC shared secret
    ///
    /// Optional:
    /// - `WATCHTOWER_GRPC_ADDR` (default: "0.0.0.0:50051")
    /// - `WATCHTOWER_KAFKA_BROKERS` (default: "localhost:9092")
    /// - `WATCHTOWER_SCHEMA_REGISTRY_URL` (default: "http://localhost:8081")
    /// - `WATCHTOWER_METRICS_PORT` (default: 9091)
    pub fn from_env() -> anyhow::Result<Self> {
        let grpc_addr =
            std::env::var("WATCHTOWER_GRPC_ADDR").unwrap_or_else(|_| "0.0.0.0:50051".to_string());

        let kafka_brokers = std::env::var("WATCHTOWER_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string());

        let schema_registry_url = std::env::var("WATCHTOWER_SCHEMA_REGISTRY_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());

        let postgres_dsn = std::env::var("WATCHTOWER_POSTGRES_DSN").map_err(|_| {
            anyhow::anyhow!("WATCHTOWER_POSTGRES_DSN environment variable is required")
        })?;

        let private_key = std::env::var("WATCHTOWER_PRIVATE_KEY").map_err(|_| {
            anyhow::anyhow!("WATCHTOWER_PRIVATE_KEY environment variable is required")
        })?;
        if private_key.is_empty() {
            anyhow::bail!("WATCHTOWER_PRIVATE_KEY must not be empty");
        }

        let metrics_port = std::env::var("WATCHTOWER_METRICS_PORT")
            .ok()
            .map(|p| p.parse())
            .transpose()?
            .unwrap_or(9091);

        tracing::info!(
            grpc_addr = %grpc_addr,
            kafka_brokers = %kafka_brokers,
            schema_registry_url = %schema_registry_url,
            metrics_port,
            "configuration loaded"
        );

        Ok(Self {
            grpc_addr,
            kafka_brokers,
            schema_registry_url,
            postgres_dsn,
            private_key,
            metrics_port,
        })
    }
}
