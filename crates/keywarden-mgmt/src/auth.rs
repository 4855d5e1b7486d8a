//! Management API authentication — static API token and `OAuth2` client credentials.

use crate::error::{MgmtError, MgmtResult};
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Credentials for the Management API.
///
/// The [`Debug`] impl redacts sensitive fields (tokens and secrets) to prevent
/// accidental credential exposure in log output.
#[derive(Clone)]
pub enum ApiCredentials {
    /// A pre-issued Management API token.
    StaticToken { token: String },

    /// `OAuth2` client credentials grant against the tenant token endpoint.
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaticToken { .. } => f
                .debug_struct("StaticToken")
                .field("token", &"[REDACTED]")
                .finish(),
            Self::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Token response from the tenant token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Cached access token with expiry.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<std::time::Instant>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => std::time::Instant::now() >= exp,
            None => false,
        }
    }
}

/// Authentication handler for Management API requests.
///
/// Supports a static API token and `OAuth2` client credentials (with caching).
#[derive(Debug, Clone)]
pub struct ManagementAuth {
    credentials: ApiCredentials,
    /// Tenant token endpoint, e.g. `https://{domain}/oauth/token`.
    token_url: String,
    /// Audience of the Management API, sent with the client credentials grant.
    audience: String,
    /// Cached access token (shared across clones).
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    /// HTTP client for token requests.
    http_client: reqwest::Client,
}

impl ManagementAuth {
    /// Create a new auth handler.
    #[must_use]
    pub fn new(
        credentials: ApiCredentials,
        token_url: String,
        audience: String,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            token_url,
            audience,
            cached_token: Arc::new(RwLock::new(None)),
            http_client,
        }
    }

    /// Get the Bearer token to use for requests.
    ///
    /// For a static token, returns it as-is. For client credentials, fetches
    /// (or returns the cached) access token.
    pub async fn get_bearer_token(&self) -> MgmtResult<String> {
        match &self.credentials {
            ApiCredentials::StaticToken { token } => Ok(token.clone()),
            ApiCredentials::ClientCredentials {
                client_id,
                client_secret,
            } => {
                // Check cache first.
                {
                    let cache = self.cached_token.read().await;
                    if let Some(cached) = cache.as_ref() {
                        if !cached.is_expired() {
                            return Ok(cached.access_token.clone());
                        }
                    }
                }

                // Fetch new token.
                debug!("Fetching access token from {}", self.token_url);
                let form = [
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("audience", self.audience.as_str()),
                ];

                let response = self
                    .http_client
                    .post(&self.token_url)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| MgmtError::Auth(format!("Token request failed: {e}")))?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<no body>".to_string());
                    return Err(MgmtError::Auth(format!(
                        "Token endpoint returned {status}: {body}"
                    )));
                }

                let token_response: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| MgmtError::Auth(format!("Failed to parse token response: {e}")))?;

                let _ = token_response.token_type; // acknowledged but unused

                let expires_at = token_response.expires_in.map(|secs| {
                    // Expire 30 seconds early to avoid using expired tokens.
                    std::time::Instant::now()
                        + std::time::Duration::from_secs(secs.saturating_sub(30))
                });

                let access_token = token_response.access_token.clone();

                // Cache the token.
                {
                    let mut cache = self.cached_token.write().await;
                    *cache = Some(CachedToken {
                        access_token: token_response.access_token,
                        expires_at,
                    });
                }

                Ok(access_token)
            }
        }
    }

    /// Apply authentication to a request builder.
    pub async fn apply(&self, builder: RequestBuilder) -> MgmtResult<RequestBuilder> {
        let token = self.get_bearer_token().await?;
        Ok(builder.bearer_auth(token))
    }

    /// Invalidate the cached token (e.g., on 401 response).
    pub async fn invalidate_cache(&self) {
        let mut cache = self.cached_token.write().await;
        *cache = None;
    }
}
