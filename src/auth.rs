//! Authentication Module
//!
//! Two-stage FordPass token exchange. Username/password buys a short-lived
//! primary token, which is then traded for the bearer token the telemetry
//! endpoints actually accept.

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Primary authentication endpoint (username/password -> primary token)
pub const PRIMARY_AUTH_URL: &str =
    "https://us-central1-ford-connected-car.cloudfunctions.net/api/auth";

/// Token exchange endpoint (primary token -> bearer token)
pub const TOKEN_EXCHANGE_URL: &str = "https://accounts.autonomic.ai/v1/auth/oidc/token";

const APPLICATION_ID: &str = "71A3AD0A-CF46-4CCF-B473-FC7FE5BC4592";
const CLIENT_USER_AGENT: &str = "FordPass/2 CFNetwork/1475 Darwin/23.0.0";

const EXCHANGE_CLIENT_ID: &str = "fordpass-prod";
const SUBJECT_ISSUER: &str = "fordpass";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

/// The primary token exists only to be exchanged; 5 minutes is plenty.
const PRIMARY_TOKEN_TTL_SECS: i64 = 300;

/// Margin subtracted from the declared expiry so an in-flight request
/// never rides a token that lapses mid-call.
const EXPIRY_MARGIN_SECS: i64 = 60;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// FordPass account credentials, immutable for the process lifetime
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub vin: String,
}

/// Build the HTTP client shared by the auth and telemetry layers
pub(crate) fn build_client() -> reqwest::Client {
    let mut headers = HeaderMap::new();
    headers.insert("Accept", HeaderValue::from_static("*/*"));
    headers.insert("User-Agent", HeaderValue::from_static(CLIENT_USER_AGENT));
    headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("Application-Id", HeaderValue::from_static(APPLICATION_ID));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Cached token state. One shared expiry covers both stages: obtaining a
/// primary token arms the short window, a successful exchange overwrites it
/// with the service-declared lifetime.
#[derive(Debug)]
struct TokenCache {
    primary: Option<String>,
    exchange: Option<String>,
    expires_at: DateTime<Utc>,
}

impl TokenCache {
    fn empty() -> Self {
        Self {
            primary: None,
            exchange: None,
            expires_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn valid_exchange(&self, now: DateTime<Utc>) -> Option<&str> {
        match &self.exchange {
            Some(token) if now < self.expires_at => Some(token.as_str()),
            _ => None,
        }
    }

    fn valid_primary(&self, now: DateTime<Utc>) -> Option<&str> {
        match &self.primary {
            Some(token) if now < self.expires_at => Some(token.as_str()),
            _ => None,
        }
    }
}

/// Manages credential-to-token exchange and expiry-aware caching
pub struct TokenManager {
    credentials: Credentials,
    primary_url: String,
    exchange_url: String,
    client: reqwest::Client,
    cache: Mutex<TokenCache>,
}

impl TokenManager {
    /// Create a token manager against the production endpoints
    pub fn new(credentials: Credentials) -> Self {
        Self::with_endpoints(credentials, PRIMARY_AUTH_URL, TOKEN_EXCHANGE_URL)
    }

    /// Create a token manager against explicit endpoints
    pub fn with_endpoints(credentials: Credentials, primary_url: &str, exchange_url: &str) -> Self {
        Self {
            credentials,
            primary_url: primary_url.to_string(),
            exchange_url: exchange_url.to_string(),
            client: build_client(),
            cache: Mutex::new(TokenCache::empty()),
        }
    }

    /// Get a bearer token valid for the telemetry endpoints, refreshing
    /// through the two-stage exchange if the cached one is absent or stale.
    ///
    /// Refresh is lazy and serialized: the cache lock is held across the
    /// whole exchange, so concurrent callers await one in-flight refresh
    /// instead of racing their own.
    pub async fn valid_exchange_token(&self) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;

        let now = Utc::now();
        if let Some(token) = cache.valid_exchange(now) {
            debug!("Using cached exchange token");
            return Ok(token.to_string());
        }

        let primary = match cache.valid_primary(now) {
            Some(token) => token.to_string(),
            None => {
                let token = self.fetch_primary_token().await?;
                cache.primary = Some(token.clone());
                cache.expires_at = now + Duration::seconds(PRIMARY_TOKEN_TTL_SECS);
                token
            }
        };

        let (token, expires_in) = self.exchange_token(&primary).await?;
        cache.exchange = Some(token.clone());
        cache.expires_at = Utc::now() + Duration::seconds(expires_in - EXPIRY_MARGIN_SECS);

        info!("Exchange token refreshed, valid for {}s", expires_in - EXPIRY_MARGIN_SECS);
        Ok(token)
    }

    /// Stage one: POST credentials for a primary token
    async fn fetch_primary_token(&self) -> Result<String, AuthError> {
        debug!("Requesting primary token at: {}", self.primary_url);

        let response = self
            .client
            .post(&self.primary_url)
            .json(&PrimaryAuthRequest {
                username: &self.credentials.username,
                password: &self.credentials.password,
            })
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Primary(format!("{}/{}", status.as_u16(), body)));
        }

        let data = response
            .json::<PrimaryAuthResponse>()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;

        // A 200 transport response can still carry an application-level
        // rejection in the body.
        if data.status != 200 {
            let message = data.message.unwrap_or_else(|| "unknown error".to_string());
            return Err(AuthError::Primary(format!("{}/{}", data.status, message)));
        }

        data.access_token
            .ok_or_else(|| AuthError::Parse("primary auth response missing access_token".into()))
    }

    /// Stage two: exchange the primary token via the token-exchange grant
    async fn exchange_token(&self, primary_token: &str) -> Result<(String, i64), AuthError> {
        debug!("Exchanging primary token at: {}", self.exchange_url);

        let form = [
            ("subject_token", primary_token),
            ("subject_issuer", SUBJECT_ISSUER),
            ("client_id", EXCHANGE_CLIENT_ID),
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("subject_token_type", SUBJECT_TOKEN_TYPE),
        ];

        let response = self
            .client
            .post(&self.exchange_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!("{}/{}", status.as_u16(), body)));
        }

        let data = response
            .json::<TokenExchangeResponse>()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;

        Ok((data.access_token, data.expires_in))
    }
}

// Request/Response types

#[derive(Serialize)]
struct PrimaryAuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct PrimaryAuthResponse {
    status: i64,
    access_token: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("network error: {0}")]
    Network(String),

    #[error("primary authentication failed: {0}")]
    Primary(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_has_no_valid_tokens() {
        let cache = TokenCache::empty();
        let now = Utc::now();
        assert!(cache.valid_exchange(now).is_none());
        assert!(cache.valid_primary(now).is_none());
    }

    #[test]
    fn exchange_token_valid_until_expiry() {
        let now = Utc::now();
        let cache = TokenCache {
            primary: None,
            exchange: Some("tok".to_string()),
            expires_at: now + Duration::seconds(10),
        };
        assert_eq!(cache.valid_exchange(now), Some("tok"));
        assert!(cache.valid_exchange(now + Duration::seconds(10)).is_none());
        assert!(cache.valid_exchange(now + Duration::seconds(11)).is_none());
    }

    #[test]
    fn expired_primary_is_rejected() {
        let now = Utc::now();
        let cache = TokenCache {
            primary: Some("primary".to_string()),
            exchange: None,
            expires_at: now - Duration::seconds(1),
        };
        assert!(cache.valid_primary(now).is_none());
    }

    #[test]
    fn error_messages_carry_upstream_detail() {
        let err = AuthError::Primary("401/bad credentials".to_string());
        assert_eq!(
            err.to_string(),
            "primary authentication failed: 401/bad credentials"
        );

        let err = AuthError::Exchange("500/server error".to_string());
        assert_eq!(err.to_string(), "token exchange failed: 500/server error");
    }
}
