//! The encryption-key-manager resource.
//!
//! Manages the tenant key hierarchy: rotation of the tenant master key and
//! the provisioning lifecycle of a customer-provided root key. Each
//! mutation is a one-shot API call; the resulting server-side state
//! transition is observed to completion with [`wait_until`].

use crate::wait::{wait_until, PollPolicy, WaitError};
use keywarden_mgmt::models::{EncryptionKey, KeyState, KeyType, WrappingKey};
use keywarden_mgmt::retry::RetryPolicy;
use keywarden_mgmt::{ManagementClient, MgmtError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Page size used when listing all encryption keys.
const LIST_PAGE_SIZE: u32 = 5;

/// Error returned by key-manager operations.
#[derive(Debug, Error)]
pub enum KeyManagerError {
    /// A Management API call failed.
    #[error(transparent)]
    Api(#[from] MgmtError),

    /// A created root key never became readable.
    #[error("encryption key {kid} was not readable after {attempts} attempt(s)")]
    ProvisioningTimeout { kid: String, attempts: u32 },

    /// An imported root key never reached the `active` state.
    #[error("encryption key {kid} did not become active after {attempts} attempt(s)")]
    ActivationTimeout { kid: String, attempts: u32 },

    /// A deleted root key never reached `destroyed` nor disappeared.
    #[error("encryption key {kid} was not destroyed after {attempts} attempt(s)")]
    DestructionTimeout { kid: String, attempts: u32 },

    /// Wrapped key material was supplied before the provisioning step that
    /// generates the public wrapping key.
    #[error(
        "wrapped_key must not be supplied until the public wrapping key has been generated"
    )]
    WrappedKeyTooEarly,
}

/// Desired state for the key-manager resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyManagerSpec {
    /// Opaque rotation marker. Changing it to a new non-empty value rotates
    /// the tenant key hierarchy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_rotation_id: Option<String>,

    /// Present to provision a customer-provided root key, absent to remove
    /// one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_key: Option<RootKeySpec>,
}

/// Desired state for the customer-provided root key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootKeySpec {
    /// Base64-encoded root key wrapped with the public wrapping key.
    /// Supplied by the customer after reading the wrapping key from the
    /// observed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key: Option<String>,
}

/// Observed state of the key-manager resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyManagerState {
    pub key_rotation_id: Option<String>,

    /// The tracked customer-provided root key, if one is managed.
    pub root_key: Option<RootKeyState>,

    /// Every encryption key in the tenant.
    pub encryption_keys: Vec<EncryptionKey>,
}

/// Observed state of the customer-provided root key.
///
/// `public_wrapping_key`, `wrapping_algorithm`, and `wrapped_key` are only
/// known client-side (the API never returns them), so refreshes carry them
/// over from the previous state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootKeyState {
    pub kid: String,
    pub key_type: KeyType,
    pub state: KeyState,
    pub parent_kid: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub public_wrapping_key: Option<String>,
    pub wrapping_algorithm: Option<String>,
    pub wrapped_key: Option<String>,
}

impl RootKeyState {
    fn from_created(key: &EncryptionKey, wrapping: &WrappingKey) -> Self {
        Self {
            kid: key.kid.clone(),
            key_type: key.key_type,
            state: key.state,
            parent_kid: key.parent_kid.clone(),
            created_at: key.created_at,
            updated_at: key.updated_at,
            public_wrapping_key: Some(wrapping.public_key.clone()),
            wrapping_algorithm: wrapping.algorithm.clone(),
            wrapped_key: None,
        }
    }

    fn refreshed(key: &EncryptionKey, prior: &Self) -> Self {
        Self {
            kid: key.kid.clone(),
            key_type: key.key_type,
            state: key.state,
            parent_kid: key.parent_kid.clone(),
            created_at: key.created_at,
            updated_at: key.updated_at,
            public_wrapping_key: prior.public_wrapping_key.clone(),
            wrapping_algorithm: prior.wrapping_algorithm.clone(),
            wrapped_key: prior.wrapped_key.clone(),
        }
    }
}

/// Manages the key-manager resource lifecycle against the Management API.
pub struct KeyManager {
    client: Arc<ManagementClient>,
    poll: PollPolicy,
    retry: RetryPolicy,
}

impl KeyManager {
    /// Create a key manager with the default polling and retry policies.
    #[must_use]
    pub fn new(client: Arc<ManagementClient>) -> Self {
        Self {
            client,
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the polling budget used for state-transition waits.
    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Override the retry policy used for mutations.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bring a fresh resource to its desired state.
    pub async fn create(&self, spec: &KeyManagerSpec) -> Result<KeyManagerState, KeyManagerError> {
        self.apply(None, spec).await
    }

    /// Reconcile an existing resource with a changed desired state.
    pub async fn update(
        &self,
        prior: &KeyManagerState,
        spec: &KeyManagerSpec,
    ) -> Result<KeyManagerState, KeyManagerError> {
        self.apply(Some(prior), spec).await
    }

    /// Re-read remote state without mutating anything.
    pub async fn read(&self, prior: &KeyManagerState) -> Result<KeyManagerState, KeyManagerError> {
        self.refresh(prior.root_key.clone(), prior.key_rotation_id.clone())
            .await
    }

    /// Tear the resource down, destroying the tracked root key if present.
    pub async fn delete(&self, prior: &KeyManagerState) -> Result<(), KeyManagerError> {
        if let Some(root) = &prior.root_key {
            if !root.kid.is_empty() {
                self.remove_root_key(&root.kid).await?;
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        prior: Option<&KeyManagerState>,
        spec: &KeyManagerSpec,
    ) -> Result<KeyManagerState, KeyManagerError> {
        let api = self.client.as_ref();

        // Rotation fires on update only, when the marker changes to a new
        // non-empty value.
        if let Some(prior) = prior {
            let new_rotation = spec.key_rotation_id.as_deref().unwrap_or("");
            let old_rotation = prior.key_rotation_id.as_deref().unwrap_or("");
            if !new_rotation.is_empty() && new_rotation != old_rotation {
                info!(key_rotation_id = %new_rotation, "rotating tenant key hierarchy");
                self.retry
                    .execute("rekey", || async move { api.rekey().await })
                    .await?;
            }
        }

        let tracked = prior.and_then(|p| p.root_key.clone());
        let mut root_state = tracked.clone();

        match &spec.root_key {
            None => {
                // The root-key block was removed; destroy the tracked key.
                if let Some(t) = &tracked {
                    if !t.kid.is_empty() {
                        self.remove_root_key(&t.kid).await?;
                    }
                    root_state = None;
                }
            }
            Some(block) => {
                if let Some(wrapped) = block.wrapped_key.as_deref() {
                    let kid_known = tracked.as_ref().is_some_and(|t| !t.kid.is_empty());
                    let wrapping_known = tracked
                        .as_ref()
                        .and_then(|t| t.public_wrapping_key.as_deref())
                        .is_some_and(|w| !w.is_empty());
                    let pre_activation = tracked
                        .as_ref()
                        .is_some_and(|t| t.state == KeyState::PreActivation);

                    if kid_known && wrapping_known && pre_activation {
                        let kid = tracked.as_ref().map(|t| t.kid.clone()).unwrap_or_default();
                        self.import_wrapped_key(&kid, wrapped).await?;
                        if let Some(state) = root_state.as_mut() {
                            state.wrapped_key = Some(wrapped.to_string());
                        }
                    } else if !kid_known || !wrapping_known {
                        return Err(KeyManagerError::WrappedKeyTooEarly);
                    }
                }

                // No root key in progress yet; start provisioning one.
                if root_state.as_ref().map_or(true, |t| t.kid.is_empty()) {
                    let (key, wrapping) = self.provision_root_key().await?;
                    root_state = Some(RootKeyState::from_created(&key, &wrapping));
                }
            }
        }

        self.refresh(root_state, spec.key_rotation_id.clone()).await
    }

    /// Create a root key, wait until it is readable, and fetch its public
    /// wrapping key.
    ///
    /// A missing key is "not visible yet" here; any other read failure is
    /// fatal so provisioning delays stay distinguishable from permission or
    /// network problems.
    async fn provision_root_key(
        &self,
    ) -> Result<(EncryptionKey, WrappingKey), KeyManagerError> {
        let api = self.client.as_ref();

        let key = self
            .retry
            .execute("create_encryption_key", || async move {
                api.create_key(KeyType::CustomerProvidedRootKey).await
            })
            .await?;

        info!(kid = %key.kid, "created customer-provided root key, waiting for visibility");

        let kid = key.kid.as_str();
        wait_until(self.poll.max_attempts, self.poll.interval, || async move {
            match api.read_key(kid).await {
                Ok(_) => Ok(true),
                Err(err) if err.is_not_found() => Ok(false),
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|err| match err {
            WaitError::Probe(e) => KeyManagerError::Api(e),
            WaitError::Timeout { attempts } => KeyManagerError::ProvisioningTimeout {
                kid: kid.to_string(),
                attempts,
            },
        })?;

        // Fetched once; assumed available as soon as the key itself reads.
        let wrapping = api.create_wrapping_key(kid).await?;

        debug!(kid = %kid, "public wrapping key generated");

        Ok((key, wrapping))
    }

    /// Import customer-wrapped key material and wait for activation.
    async fn import_wrapped_key(
        &self,
        kid: &str,
        wrapped_key: &str,
    ) -> Result<(), KeyManagerError> {
        info!(kid = %kid, "importing wrapped root key material");
        let api = self.client.as_ref();

        self.retry
            .execute("import_wrapped_key", || async move {
                api.import_wrapped_key(kid, wrapped_key).await
            })
            .await?;

        wait_until(self.poll.max_attempts, self.poll.interval, || async move {
            match api.read_key(kid).await {
                Ok(key) => Ok(key.state == KeyState::Active),
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|err| match err {
            WaitError::Probe(e) => KeyManagerError::Api(e),
            WaitError::Timeout { attempts } => KeyManagerError::ActivationTimeout {
                kid: kid.to_string(),
                attempts,
            },
        })
    }

    /// Delete a root key and wait until it is destroyed or gone.
    ///
    /// A missing key counts as destroyed; the deletion already happened
    /// server-side.
    async fn remove_root_key(&self, kid: &str) -> Result<(), KeyManagerError> {
        info!(kid = %kid, "removing customer-provided root key");
        let api = self.client.as_ref();

        self.retry
            .execute("delete_encryption_key", || async move {
                api.delete_key(kid).await
            })
            .await?;

        wait_until(self.poll.max_attempts, self.poll.interval, || async move {
            match api.read_key(kid).await {
                Ok(key) => Ok(key.state == KeyState::Destroyed),
                Err(err) if err.is_not_found() => Ok(true),
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|err| match err {
            WaitError::Probe(e) => KeyManagerError::Api(e),
            WaitError::Timeout { attempts } => KeyManagerError::DestructionTimeout {
                kid: kid.to_string(),
                attempts,
            },
        })
    }

    /// Rebuild observed state from a full key listing.
    async fn refresh(
        &self,
        tracked: Option<RootKeyState>,
        key_rotation_id: Option<String>,
    ) -> Result<KeyManagerState, KeyManagerError> {
        let keys = self.client.list_all_keys(LIST_PAGE_SIZE).await?;

        let root_key = tracked.map(|prior| {
            // Prefer a key still going through activation over one already
            // active.
            let found = find_key(&keys, KeyType::CustomerProvidedRootKey, KeyState::PreActivation)
                .or_else(|| find_key(&keys, KeyType::CustomerProvidedRootKey, KeyState::Active));
            match found {
                Some(key) => RootKeyState::refreshed(key, &prior),
                None => prior,
            }
        });

        Ok(KeyManagerState {
            key_rotation_id,
            root_key,
            encryption_keys: keys,
        })
    }
}

fn find_key(keys: &[EncryptionKey], key_type: KeyType, state: KeyState) -> Option<&EncryptionKey> {
    keys.iter()
        .find(|k| k.key_type == key_type && k.state == state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_key_matches_type_and_state() {
        let keys = vec![
            EncryptionKey {
                kid: "a".into(),
                key_type: KeyType::TenantMasterKey,
                state: KeyState::Active,
                parent_kid: None,
                created_at: None,
                updated_at: None,
            },
            EncryptionKey {
                kid: "b".into(),
                key_type: KeyType::CustomerProvidedRootKey,
                state: KeyState::PreActivation,
                parent_kid: None,
                created_at: None,
                updated_at: None,
            },
        ];

        let found = find_key(
            &keys,
            KeyType::CustomerProvidedRootKey,
            KeyState::PreActivation,
        )
        .unwrap();
        assert_eq!(found.kid, "b");

        assert!(find_key(&keys, KeyType::EnvironmentRootKey, KeyState::Active).is_none());
    }

    #[test]
    fn spec_round_trips_through_serde() {
        let spec = KeyManagerSpec {
            key_rotation_id: Some("rotation-1".into()),
            root_key: Some(RootKeySpec {
                wrapped_key: Some("d3JhcHBlZA==".into()),
            }),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let parsed: KeyManagerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn empty_spec_deserializes_from_empty_object() {
        let spec: KeyManagerSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, KeyManagerSpec::default());
    }
}
