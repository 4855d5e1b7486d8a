//! Provider configuration, validated once at the boundary.

use keywarden_mgmt::ApiCredentials;
use std::time::Duration;
use thiserror::Error;

/// Environment variables the provider sources its configuration from.
const ENV_DOMAIN: &str = "AUTH0_DOMAIN";
const ENV_API_TOKEN: &str = "AUTH0_API_TOKEN";
const ENV_CLIENT_ID: &str = "AUTH0_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "AUTH0_CLIENT_SECRET";
const ENV_AUDIENCE: &str = "AUTH0_AUDIENCE";

/// Configuration error raised during [`ProviderConfig::validate`] or
/// provider construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a tenant domain is required")]
    MissingDomain,

    #[error("tenant domain must be a bare host name, got {domain:?}")]
    InvalidDomain { domain: String },

    #[error("either an API token or client credentials must be configured")]
    MissingCredentials,

    #[error("client credentials require both a client ID and a client secret")]
    IncompleteClientCredentials,

    #[error("an API token and client credentials are mutually exclusive")]
    ConflictingCredentials,

    #[error("failed to build the API client: {0}")]
    Client(String),
}

/// Statically-typed provider configuration.
///
/// Every field is resolved and checked here, once; nothing downstream reads
/// configuration by string path or re-validates.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Tenant domain, e.g. `tenant.example.auth0.com`. Required.
    pub domain: String,

    /// How to authenticate against the Management API. Required; exactly one
    /// method.
    pub credentials: ApiCredentials,

    /// Management API audience override (custom domains). Defaults to
    /// `https://{domain}/api/v2/`.
    pub audience: Option<String>,

    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Create a configuration with the default timeout and no audience
    /// override.
    #[must_use]
    pub fn new(domain: impl Into<String>, credentials: ApiCredentials) -> Self {
        Self {
            domain: domain.into(),
            credentials,
            audience: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the Management API audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Set the per-request HTTP timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve configuration from `AUTH0_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let domain = env_var(ENV_DOMAIN).ok_or(ConfigError::MissingDomain)?;

        let api_token = env_var(ENV_API_TOKEN);
        let client_id = env_var(ENV_CLIENT_ID);
        let client_secret = env_var(ENV_CLIENT_SECRET);

        let credentials = match (api_token, client_id, client_secret) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::ConflictingCredentials);
            }
            (Some(token), None, None) => ApiCredentials::StaticToken { token },
            (None, Some(client_id), Some(client_secret)) => ApiCredentials::ClientCredentials {
                client_id,
                client_secret,
            },
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(ConfigError::IncompleteClientCredentials);
            }
            (None, None, None) => return Err(ConfigError::MissingCredentials),
        };

        let mut config = Self::new(domain, credentials);
        if let Some(audience) = env_var(ENV_AUDIENCE) {
            config = config.with_audience(audience);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration. Called by [`crate::Provider::new`]; callers
    /// assembling a config by hand can invoke it directly for early feedback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let domain = self.domain.trim();
        if domain.is_empty() {
            return Err(ConfigError::MissingDomain);
        }
        if domain.contains("://") || domain.contains('/') {
            return Err(ConfigError::InvalidDomain {
                domain: self.domain.clone(),
            });
        }

        match &self.credentials {
            ApiCredentials::StaticToken { token } => {
                if token.is_empty() {
                    return Err(ConfigError::MissingCredentials);
                }
            }
            ApiCredentials::ClientCredentials {
                client_id,
                client_secret,
            } => {
                if client_id.is_empty() || client_secret.is_empty() {
                    return Err(ConfigError::IncompleteClientCredentials);
                }
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_config() -> ProviderConfig {
        ProviderConfig::new(
            "tenant.example.auth0.com",
            ApiCredentials::StaticToken {
                token: "tok".into(),
            },
        )
    }

    #[test]
    fn valid_token_config_passes() {
        token_config().validate().unwrap();
    }

    #[test]
    fn valid_client_credentials_config_passes() {
        ProviderConfig::new(
            "tenant.example.auth0.com",
            ApiCredentials::ClientCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
        )
        .validate()
        .unwrap();
    }

    #[test]
    fn empty_domain_is_rejected() {
        let mut config = token_config();
        config.domain = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDomain)
        ));
    }

    #[test]
    fn domain_with_scheme_is_rejected() {
        let mut config = token_config();
        config.domain = "https://tenant.example.auth0.com".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDomain { .. })
        ));
    }

    #[test]
    fn empty_token_is_rejected() {
        let config = ProviderConfig::new(
            "tenant.example.auth0.com",
            ApiCredentials::StaticToken { token: "".into() },
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn partial_client_credentials_are_rejected() {
        let config = ProviderConfig::new(
            "tenant.example.auth0.com",
            ApiCredentials::ClientCredentials {
                client_id: "id".into(),
                client_secret: "".into(),
            },
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompleteClientCredentials)
        ));
    }

    #[test]
    fn builder_setters_apply() {
        let config = token_config()
            .with_audience("https://custom.example/api/v2/")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(
            config.audience.as_deref(),
            Some("https://custom.example/api/v2/")
        );
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn from_env_resolves_credentials() {
        // Set and clear in one test to avoid races between parallel tests
        // over shared process environment.
        std::env::set_var(ENV_DOMAIN, "tenant.example.auth0.com");
        std::env::set_var(ENV_API_TOKEN, "tok");
        std::env::remove_var(ENV_CLIENT_ID);
        std::env::remove_var(ENV_CLIENT_SECRET);

        let config = ProviderConfig::from_env().unwrap();
        assert_eq!(config.domain, "tenant.example.auth0.com");
        assert!(matches!(
            config.credentials,
            ApiCredentials::StaticToken { .. }
        ));

        std::env::set_var(ENV_CLIENT_ID, "id");
        let err = ProviderConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingCredentials));

        std::env::remove_var(ENV_DOMAIN);
        std::env::remove_var(ENV_API_TOKEN);
        std::env::remove_var(ENV_CLIENT_ID);
    }
}
