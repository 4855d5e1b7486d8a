//! Async client for the tenant encryption-key endpoints of the Management API.
//!
//! Provides typed models, authentication (static token or `OAuth2` client
//! credentials), status-code error classification, and transient-error retry.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;

pub use auth::{ApiCredentials, ManagementAuth};
pub use client::ManagementClient;
pub use error::{MgmtError, MgmtResult};
pub use models::{EncryptionKey, EncryptionKeyList, KeyState, KeyType, WrappingKey};
pub use retry::RetryPolicy;

use std::time::Duration;

/// Build a [`ManagementClient`] for a tenant domain.
///
/// This is the single shared helper used to assemble the token endpoint,
/// Management API audience, and base URL from a bare domain, so callers
/// never concatenate URLs themselves.
pub fn build_management_client(
    domain: &str,
    credentials: ApiCredentials,
    audience: Option<String>,
    timeout: Duration,
) -> MgmtResult<ManagementClient> {
    let domain = domain.trim().trim_end_matches('/');
    if domain.is_empty() || domain.contains("://") {
        return Err(MgmtError::InvalidConfig(format!(
            "tenant domain must be a bare host name, got {domain:?}"
        )));
    }

    let base_url = format!("https://{domain}");
    let token_url = format!("{base_url}/oauth/token");
    let audience = audience.unwrap_or_else(|| format!("{base_url}/api/v2/"));

    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| MgmtError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

    let auth = ManagementAuth::new(credentials, token_url, audience, http_client);

    ManagementClient::new(base_url, auth, timeout)
}
