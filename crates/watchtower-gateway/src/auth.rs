//! Per-stream credential verification for ingest RPCs.
//!
//! Every ingest stream must carry `servicename` and `authorization`
//! metadata. The supplied token is an HMAC-SHA256 over
//! `"{servicename}.{stored_value}.{stored_timestamp}"` keyed with the
//! deployment's shared secret, where the stored fields come from the
//! credential store. Verification is constant time.
//!
//! All failures surface as `unauthenticated` with a generic message; the
//! caller learns nothing about which part failed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

/// One credential row from the store.
#[derive(Debug, sqlx::FromRow)]
struct KeyStore {
    value: String,
    timestamp: i64,
}

/// Stream authenticator backed by the credential store.
pub struct AuthService {
    pool: PgPool,
    private_key: String,
}

impl AuthService {
    /// Connect the credential pool and verify it responds.
    pub async fn connect(dsn: &str, private_key: String) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .max_lifetime(Duration::from_secs(5 * 60))
            .connect_lazy(dsn)?;

        // Fail fast when the store is unreachable at startup.
        tokio::time::timeout(Duration::from_secs(5), sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)??;

        tracing::info!("credential store connected");
        Ok(Self { pool, private_key })
    }

    /// Authenticate a stream from its metadata, returning the verified
    /// service name.
    pub async fn authenticate(&self, metadata: &MetadataMap) -> std::result::Result<String, Status> {
        let service_name = metadata
            .get("servicename")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::unauthenticated("servicename header is not provided"))?
            .to_string();

        let token = metadata
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::unauthenticated("authorization token is not provided"))?;
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let stored: Option<KeyStore> =
            sqlx::query_as("SELECT value, timestamp FROM key_stores WHERE key = $1")
                .bind(&service_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!("credential store error during auth: {e}");
                    Status::internal("database error")
                })?;

        let Some(stored) = stored else {
            tracing::warn!(service_name, "authentication failed: unknown service");
            metrics::counter!("gateway_auth_failures_total").increment(1);
            return Err(Status::unauthenticated("invalid credentials"));
        };

        let payload = format!("{}.{}.{}", service_name, stored.value, stored.timestamp);
        if !verify_token(&self.private_key, &payload, token) {
            tracing::warn!(service_name, "authentication failed: invalid token");
            metrics::counter!("gateway_auth_failures_total").increment(1);
            return Err(Status::unauthenticated("invalid credentials"));
        }

        Ok(service_name)
    }
}

/// Constant-time check of a hex-encoded HMAC-SHA256 tag.
fn verify_token(private_key: &str, payload: &str, supplied_hex: &str) -> bool {
    let Ok(supplied) = hex::decode(supplied_hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(private_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    mac.verify_slice(&supplied).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(private_key: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(private_key.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_token_accepted() {
        let payload = "svcA.k1.1700000000";
        let token = sign("secret", payload);
        assert!(verify_token("secret", payload, &token));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let payload = "svcA.k1.1700000000";
        let token = sign("other-secret", payload);
        assert!(!verify_token("secret", payload, &token));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = sign("secret", "svcA.k1.1700000000");
        assert!(!verify_token("secret", "svcB.k1.1700000000", &token));
    }

    #[test]
    fn test_non_hex_token_rejected() {
        assert!(!verify_token("secret", "svcA.k1.1700000000", "not hex!!"));
    }

    #[test]
    fn test_truncated_token_rejected() {
        let payload = "svcA.k1.1700000000";
        let token = sign("secret", payload);
        assert!(!verify_token("secret", payload, &token[..32]));
    }
}
