//! HTTP client for the encryption-key endpoints of the Management API.

use crate::auth::ManagementAuth;
use crate::error::{MgmtError, MgmtResult};
use crate::models::{
    CreateEncryptionKeyRequest, EncryptionKey, EncryptionKeyList, ImportWrappedKeyRequest,
    KeyType, WrappingKey,
};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Management API client for tenant encryption keys.
///
/// Wraps `reqwest::Client` with authentication and the API's error
/// conventions. Key state transitions happen asynchronously server-side;
/// this client only issues reads and one-shot mutations — observing a
/// transition to completion is the caller's concern.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    /// Base URL of the tenant, e.g. `https://tenant.example.auth0.com`.
    base_url: String,
    /// Authentication handler.
    auth: ManagementAuth,
    /// Underlying HTTP client.
    http_client: Client,
}

impl ManagementClient {
    /// Create a new client.
    pub fn new(base_url: String, auth: ManagementAuth, timeout: Duration) -> MgmtResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keywarden-mgmt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MgmtError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;

        // Normalize base URL: strip trailing slash.
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            base_url,
            auth,
            http_client,
        })
    }

    /// Create a client with a pre-built `reqwest::Client` (for testing).
    #[must_use]
    pub fn with_http_client(base_url: String, auth: ManagementAuth, http_client: Client) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            auth,
            http_client,
        }
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn keys_url(&self) -> String {
        format!("{}/api/v2/keys/encryption", self.base_url)
    }

    // ── Encryption Key Operations ─────────────────────────────────────

    /// List one page of encryption keys (GET /api/v2/keys/encryption).
    pub async fn list_keys(&self, page: u32, per_page: u32) -> MgmtResult<EncryptionKeyList> {
        let url = self.keys_url();
        debug!("GET {} (page={})", url, page);
        let builder = self.http_client.get(&url).query(&[
            ("include_totals", "true".to_string()),
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
        ]);
        let builder = self.auth.apply(builder).await?;
        let response = builder.send().await?;
        self.handle_response(response).await
    }

    /// List every encryption key, following pagination until exhausted.
    pub async fn list_all_keys(&self, per_page: u32) -> MgmtResult<Vec<EncryptionKey>> {
        let mut keys = Vec::new();
        let mut page = 0;
        loop {
            let batch = self.list_keys(page, per_page).await?;
            let has_next = batch.has_next();
            keys.extend(batch.keys);
            if !has_next {
                break;
            }
            page += 1;
        }
        Ok(keys)
    }

    /// Read a single encryption key (GET /api/v2/keys/encryption/:kid).
    pub async fn read_key(&self, kid: &str) -> MgmtResult<EncryptionKey> {
        let url = format!("{}/{}", self.keys_url(), kid);
        self.get(&url).await
    }

    /// Create an encryption key of the given type (POST /api/v2/keys/encryption).
    ///
    /// The returned key starts in `pre-activation`; it becomes visible to
    /// reads asynchronously.
    pub async fn create_key(&self, key_type: KeyType) -> MgmtResult<EncryptionKey> {
        let url = self.keys_url();
        self.post(&url, &CreateEncryptionKeyRequest { key_type }).await
    }

    /// Import customer-wrapped key material into a pre-activation key
    /// (POST /api/v2/keys/encryption/:kid).
    pub async fn import_wrapped_key(
        &self,
        kid: &str,
        wrapped_key: &str,
    ) -> MgmtResult<EncryptionKey> {
        let url = format!("{}/{}", self.keys_url(), kid);
        self.post(
            &url,
            &ImportWrappedKeyRequest {
                wrapped_key: wrapped_key.to_string(),
            },
        )
        .await
    }

    /// Generate the public wrapping key for a pre-activation root key
    /// (POST /api/v2/keys/encryption/:kid/wrapping-key).
    pub async fn create_wrapping_key(&self, kid: &str) -> MgmtResult<WrappingKey> {
        let url = format!("{}/{}/wrapping-key", self.keys_url(), kid);
        debug!("POST {}", url);
        let builder = self.http_client.post(&url);
        let builder = self.auth.apply(builder).await?;
        let response = builder.send().await?;
        self.handle_response(response).await
    }

    /// Rotate the tenant key hierarchy (POST /api/v2/keys/encryption/rekey).
    pub async fn rekey(&self) -> MgmtResult<()> {
        let url = format!("{}/rekey", self.keys_url());
        debug!("POST {}", url);
        let builder = self.http_client.post(&url);
        let builder = self.auth.apply(builder).await?;
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status.is_success() {
            Ok(())
        } else {
            self.handle_error_response(response).await
        }
    }

    /// Delete an encryption key (DELETE /api/v2/keys/encryption/:kid).
    ///
    /// Destruction is asynchronous; the key stays readable until it reaches
    /// `destroyed` or disappears.
    pub async fn delete_key(&self, kid: &str) -> MgmtResult<()> {
        let url = format!("{}/{}", self.keys_url(), kid);
        debug!("DELETE {}", url);
        let builder = self.http_client.delete(&url);
        let builder = self.auth.apply(builder).await?;
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status.is_success() {
            Ok(())
        } else {
            self.handle_error_response(response).await
        }
    }

    // ── Internal HTTP Methods ─────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: &str) -> MgmtResult<T> {
        debug!("GET {}", url);
        let builder = self.http_client.get(url);
        let builder = self.auth.apply(builder).await?;
        let response = builder.send().await?;
        self.handle_response(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> MgmtResult<T> {
        debug!("POST {}", url);
        let builder = self.http_client.post(url);
        let builder = self.auth.apply(builder).await?;
        let response = builder.json(body).send().await?;
        self.handle_response(response).await
    }

    // ── Response Handling ─────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> MgmtResult<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            serde_json::from_str(&body)
                .map_err(|e| MgmtError::Parse(format!("Failed to parse response: {e}")))
        } else {
            self.handle_error_response(response).await
        }
    }

    async fn handle_error_response<T>(&self, response: reqwest::Response) -> MgmtResult<T> {
        let status = response.status();

        // Check for Retry-After header (rate limiting).
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());

        match status {
            StatusCode::NOT_FOUND => Err(MgmtError::NotFound(body)),
            StatusCode::CONFLICT => Err(MgmtError::Conflict(body)),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Management API rate limited, retry after {:?}s", retry_after);
                Err(MgmtError::RateLimited {
                    retry_after_secs: retry_after,
                })
            }
            StatusCode::UNAUTHORIZED => {
                // Invalidate the cached token on 401.
                self.auth.invalidate_cache().await;
                Err(MgmtError::Auth(format!(
                    "Authentication failed (401): {body}"
                )))
            }
            _ => {
                let detail = if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    body
                };
                Err(MgmtError::Api {
                    status: status.as_u16(),
                    detail,
                })
            }
        }
    }
}
