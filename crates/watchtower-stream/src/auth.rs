//! Bearer token authentication for the event-stream endpoints.
//!
//! Browsers cannot attach headers to an EventSource, so the token arrives
//! in the `bearer` query parameter. Validation is full RS256 against the
//! issuer's JWKS: signature, issuer, audience, expiry with leeway, and the
//! `Data.Read` scope.
//!
//! The JWKS is cached for five minutes; fetch failures are negatively
//! cached for one minute so an issuer outage does not turn into a fetch
//! storm.

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::ApiError;
use crate::routes::StreamState;

/// Required scope for reading any live stream.
const REQUIRED_SCOPE: &str = "Data.Read";

/// Positive JWKS cache lifetime.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Negative cache lifetime after a failed JWKS fetch.
const JWKS_ERROR_TTL: Duration = Duration::from_secs(60);

/// Clock skew tolerance, in seconds.
const LEEWAY_SECS: u64 = 5 * 60;

/// Directory/application identity the tokens must be issued for.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Directory (tenant) id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
}

impl AuthConfig {
    pub fn issuer(&self) -> String {
        format!("https://sts.windows.net/{}/", self.tenant_id)
    }

    pub fn audience(&self) -> String {
        format!("api://{}", self.client_id)
    }

    pub fn jwks_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/discovery/keys",
            self.tenant_id
        )
    }
}

/// Claims attached to the request after successful validation.
#[derive(Debug, Clone)]
pub struct UserClaims {
    pub unique_name: String,
    pub scp: String,
    pub name: String,
}

/// Raw claim set deserialized from the token.
#[derive(Debug, Deserialize)]
struct ClaimSet {
    #[serde(default)]
    unique_name: String,
    #[serde(default)]
    scp: String,
    #[serde(default)]
    name: String,
}

#[derive(Default)]
struct JwksCache {
    keys: Option<JwkSet>,
    fetched_at: Option<Instant>,
    error_at: Option<Instant>,
}

/// Validator for stream bearer tokens.
pub struct SseAuth {
    config: AuthConfig,
    http: reqwest::Client,
    cache: RwLock<JwksCache>,
}

impl SseAuth {
    pub fn new(config: AuthConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            config,
            http,
            cache: RwLock::new(JwksCache::default()),
        }
    }

    /// Validate a bearer token and extract its claims.
    pub async fn validate(&self, token: &str) -> Result<UserClaims, ApiError> {
        // Parse the header first; a malformed token never triggers a JWKS
        // fetch.
        let header = jsonwebtoken::decode_header(token).map_err(|_| ApiError::InvalidToken)?;
        let kid = header.kid.ok_or(ApiError::InvalidToken)?;

        let keys = self.cached_key_set().await?;
        let jwk = keys.find(&kid).ok_or(ApiError::InvalidToken)?;
        let key = DecodingKey::from_jwk(jwk).map_err(|_| ApiError::InvalidToken)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer()]);
        validation.set_audience(&[self.config.audience()]);
        validation.leeway = LEEWAY_SECS;

        let data = jsonwebtoken::decode::<ClaimSet>(token, &key, &validation)
            .map_err(|e| map_jwt_error(&e))?;

        if !has_required_scope(&data.claims.scp, REQUIRED_SCOPE) {
            return Err(ApiError::InsufficientScope);
        }

        Ok(UserClaims {
            unique_name: data.claims.unique_name,
            scp: data.claims.scp,
            name: data.claims.name,
        })
    }

    /// The cached JWKS, refreshed when stale.
    async fn cached_key_set(&self) -> Result<JwkSet, ApiError> {
        {
            let cache = self.cache.read().await;
            if let (Some(keys), Some(fetched_at)) = (&cache.keys, cache.fetched_at) {
                if fetched_at.elapsed() < JWKS_CACHE_TTL {
                    return Ok(keys.clone());
                }
            }
            if let Some(error_at) = cache.error_at {
                if error_at.elapsed() < JWKS_ERROR_TTL {
                    return Err(ApiError::InvalidToken);
                }
            }
        }

        let mut cache = self.cache.write().await;

        // Another request may have refreshed while we waited for the lock.
        if let (Some(keys), Some(fetched_at)) = (&cache.keys, cache.fetched_at) {
            if fetched_at.elapsed() < JWKS_CACHE_TTL {
                return Ok(keys.clone());
            }
        }

        match self.fetch_key_set().await {
            Ok(keys) => {
                cache.keys = Some(keys.clone());
                cache.fetched_at = Some(Instant::now());
                cache.error_at = None;
                Ok(keys)
            }
            Err(e) => {
                tracing::warn!("failed to fetch JWKS: {e}");
                cache.error_at = Some(Instant::now());
                Err(ApiError::InvalidToken)
            }
        }
    }

    async fn fetch_key_set(&self) -> anyhow::Result<JwkSet> {
        let url = self.config.jwks_url();
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<JwkSet>().await?)
    }
}

/// `scp` is a space-separated scope list.
fn has_required_scope(scp: &str, required: &str) -> bool {
    scp.split(' ').any(|scope| scope == required)
}

fn map_jwt_error(e: &jsonwebtoken::errors::Error) -> ApiError {
    use jsonwebtoken::errors::ErrorKind;

    match e.kind() {
        ErrorKind::ExpiredSignature => ApiError::TokenExpired,
        ErrorKind::ImmatureSignature => ApiError::TokenNotYetValid,
        ErrorKind::InvalidAudience => ApiError::InvalidAudience,
        ErrorKind::InvalidIssuer => ApiError::InvalidIssuer,
        ErrorKind::InvalidSignature => ApiError::InvalidSignature,
        _ => ApiError::InvalidToken,
    }
}

#[derive(Debug, Deserialize)]
struct BearerParam {
    bearer: Option<String>,
}

/// Middleware validating the `bearer` query parameter and attaching
/// [`UserClaims`] to the request.
pub async fn sse_auth(
    State(state): State<StreamState>,
    Query(params): Query<BearerParam>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = params
        .bearer
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::MissingBearer)?;

    let claims = state.auth.validate(token).await.inspect_err(|e| {
        tracing::debug!("token validation failed: {e}");
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_matching() {
        assert!(has_required_scope("Data.Read", "Data.Read"));
        assert!(has_required_scope("Data.Write Data.Read", "Data.Read"));
        assert!(!has_required_scope("Data.ReadWrite", "Data.Read"));
        assert!(!has_required_scope("", "Data.Read"));
    }

    #[test]
    fn test_issuer_audience_formats() {
        let config = AuthConfig {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
        };
        assert_eq!(config.issuer(), "https://sts.windows.net/tenant-1/");
        assert_eq!(config.audience(), "api://client-1");
        assert_eq!(
            config.jwks_url(),
            "https://login.microsoftonline.com/tenant-1/discovery/keys"
        );
    }

    #[tokio::test]
    async fn test_malformed_token_rejected_without_jwks_fetch() {
        let auth = SseAuth::new(AuthConfig {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
        });

        // Not a JWT at all; must fail before any network traffic.
        let err = auth.validate("not-a-token").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
        assert!(auth.cache.read().await.fetched_at.is_none());
    }

    #[test]
    fn test_jwt_error_mapping() {
        use jsonwebtoken::errors::ErrorKind;

        let expired: jsonwebtoken::errors::Error = ErrorKind::ExpiredSignature.into();
        assert!(matches!(map_jwt_error(&expired), ApiError::TokenExpired));

        let immature: jsonwebtoken::errors::Error = ErrorKind::ImmatureSignature.into();
        assert!(matches!(
            map_jwt_error(&immature),
            ApiError::TokenNotYetValid
        ));

        let audience: jsonwebtoken::errors::Error = ErrorKind::InvalidAudience.into();
        assert!(matches!(
            map_jwt_error(&audience),
            ApiError::InvalidAudience
        ));
    }
}
