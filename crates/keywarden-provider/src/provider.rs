//! Provider assembly.
//!
//! Construction is explicit: validate the configuration once, build the
//! shared API client, and hand out the resources the provider serves
//! through typed accessors. There is no registration side channel.

use crate::config::{ConfigError, ProviderConfig};
use crate::key_manager::KeyManager;
use keywarden_mgmt::{build_management_client, ManagementClient};
use std::sync::Arc;
use tracing::debug;

/// A configured provider holding the shared Management API client.
#[derive(Debug, Clone)]
pub struct Provider {
    client: Arc<ManagementClient>,
}

impl Provider {
    /// Validate `config` and construct the provider.
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = build_management_client(
            &config.domain,
            config.credentials.clone(),
            config.audience.clone(),
            config.timeout,
        )
        .map_err(|e| ConfigError::Client(e.to_string()))?;

        debug!(domain = %config.domain, "provider configured");

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Construct the provider from `AUTH0_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ProviderConfig::from_env()?)
    }

    /// The encryption-key-manager resource.
    #[must_use]
    pub fn key_manager(&self) -> KeyManager {
        KeyManager::new(Arc::clone(&self.client))
    }

    /// The shared Management API client.
    #[must_use]
    pub fn client(&self) -> Arc<ManagementClient> {
        Arc::clone(&self.client)
    }
}
