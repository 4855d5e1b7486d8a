//! Management API error types with transient/permanent classification.

use thiserror::Error;

/// Result alias for Management API operations.
pub type MgmtResult<T> = Result<T, MgmtError>;

/// Error returned by Management API operations.
#[derive(Debug, Error)]
pub enum MgmtError {
    /// Client-side configuration is invalid (bad domain, unbuildable HTTP client).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Authentication failed (401, token endpoint failure, unparseable token).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The requested entity does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with remote state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The API rate-limited the request (429).
    #[error("rate limited by the management API")]
    RateLimited {
        /// Value of the `Retry-After` header, if the API sent one.
        retry_after_secs: Option<u64>,
    },

    /// Any other non-success API response.
    #[error("management API error (HTTP {status}): {detail}")]
    Api { status: u16, detail: String },

    /// Transport-level failure (connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API returned a body that could not be deserialized.
    #[error("failed to parse API response: {0}")]
    Parse(String),

    /// A retried operation kept failing until its retry budget ran out.
    #[error("{message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl MgmtError {
    /// Whether this error is a 404 for the requested entity.
    ///
    /// Callers decide what a missing entity means: during key provisioning it
    /// is "not visible yet", during key removal it is "already gone".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, MgmtError::NotFound(_))
    }

    /// Whether the error is transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MgmtError::Network(_) | MgmtError::RateLimited { .. }
        )
    }

    /// Whether the error is a server-side (5xx) API response.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, MgmtError::Api { status, .. } if *status >= 500)
    }
}
