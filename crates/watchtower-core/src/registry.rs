//! Schema registry HTTP client.
//!
//! Resolves schema ids for subjects and looks schemas up by id. Latest-id
//! lookups are cached per subject: an id is immutable for a subject's
//! latest version within a process lifetime, and a restart picks up new
//! registrations.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Response shape of `GET /subjects/{subject}/versions/latest`.
#[derive(Debug, Deserialize)]
struct LatestSchemaResponse {
    id: u32,
}

/// Client for the schema registry's REST surface.
pub struct SchemaRegistry {
    base_url: String,
    http: reqwest::Client,
    id_cache: RwLock<HashMap<String, u32>>,
}

impl SchemaRegistry {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            id_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the latest schema id registered for `subject`.
    pub async fn latest_schema_id(&self, subject: &str) -> Result<u32> {
        if let Some(id) = self.id_cache.read().get(subject) {
            return Ok(*id);
        }

        let url = format!("{}/subjects/{}/versions/latest", self.base_url, subject);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SchemaMissing(subject.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "unexpected status {} for subject {}",
                response.status(),
                subject
            )));
        }

        let body: LatestSchemaResponse = response
            .json()
            .await
            .map_err(|e| Error::Registry(e.to_string()))?;

        self.id_cache.write().insert(subject.to_string(), body.id);
        Ok(body.id)
    }

    /// Check that a schema id is known to the registry.
    ///
    /// Consumers tolerate unknown ids (payloads are self-descriptive), so
    /// failures here are logged by the caller, never fatal.
    pub async fn schema_exists(&self, id: u32) -> Result<()> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Registry(format!("schema id {id} not registered")));
        }
        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "unexpected status {} for schema id {}",
                response.status(),
                id
            )));
        }

        Ok(())
    }

    /// Number of cached subject ids. Exposed for tests and metrics.
    pub fn cached_subjects(&self) -> usize {
        self.id_cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let registry = SchemaRegistry::new("http://registry:8081/");
        assert_eq!(registry.base_url, "http://registry:8081");
    }

    #[test]
    fn test_cache_starts_empty() {
        let registry = SchemaRegistry::new("http://registry:8081");
        assert_eq!(registry.cached_subjects(), 0);
    }

    // Lookup tests would require a running schema registry
}
