//! Wire models for the encryption-key endpoints of the Management API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of an encryption key in the tenant key hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// Root key generated and wrapped by the customer.
    CustomerProvidedRootKey,
    /// Root key managed by the hosting environment.
    EnvironmentRootKey,
    /// Per-tenant master key wrapped by a root key.
    TenantMasterKey,
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::CustomerProvidedRootKey => write!(f, "customer-provided-root-key"),
            KeyType::EnvironmentRootKey => write!(f, "environment-root-key"),
            KeyType::TenantMasterKey => write!(f, "tenant-master-key"),
        }
    }
}

/// Lifecycle state of an encryption key.
///
/// Keys transition server-side: `pre-activation` until the wrapped key
/// material arrives, `active` once usable, `destroyed` after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyState {
    PreActivation,
    Active,
    Deactivated,
    Destroyed,
}

impl KeyState {
    /// Whether no further automatic transition occurs from this state
    /// without external action.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, KeyState::Active | KeyState::Destroyed)
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyState::PreActivation => write!(f, "pre-activation"),
            KeyState::Active => write!(f, "active"),
            KeyState::Deactivated => write!(f, "deactivated"),
            KeyState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// An encryption key as returned by the Management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Key identifier assigned by the API.
    pub kid: String,

    #[serde(rename = "type")]
    pub key_type: KeyType,

    pub state: KeyState,

    /// Key ID of the parent wrapping key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of the encryption-key listing (`include_totals` response shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionKeyList {
    #[serde(default)]
    pub keys: Vec<EncryptionKey>,

    #[serde(default)]
    pub start: i64,

    #[serde(default)]
    pub limit: i64,

    #[serde(default)]
    pub total: i64,
}

impl EncryptionKeyList {
    /// Whether another page follows this one.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.start + self.limit < self.total
    }
}

/// Public wrapping key material for a customer-provided root key.
///
/// Fetched once after the root key becomes visible; the customer wraps
/// their key with it out of band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappingKey {
    /// Public wrapping key in PEM format.
    pub public_key: String,

    /// Wrapping algorithm, `CKM_RSA_AES_KEY_WRAP` for current tenants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

/// Request body for creating an encryption key.
#[derive(Debug, Clone, Serialize)]
pub struct CreateEncryptionKeyRequest {
    #[serde(rename = "type")]
    pub key_type: KeyType,
}

/// Request body for importing customer-wrapped key material.
#[derive(Debug, Clone, Serialize)]
pub struct ImportWrappedKeyRequest {
    /// Base64-encoded root key, wrapped with the public wrapping key.
    pub wrapped_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_deserializes_from_wire_format() {
        let key: EncryptionKey = serde_json::from_str(
            r#"{
                "kid": "kid_123",
                "type": "customer-provided-root-key",
                "state": "pre-activation",
                "parent_kid": "kid_parent",
                "created_at": "2024-05-01T12:00:00.000Z",
                "updated_at": "2024-05-01T12:30:00.000Z"
            }"#,
        )
        .unwrap();

        assert_eq!(key.kid, "kid_123");
        assert_eq!(key.key_type, KeyType::CustomerProvidedRootKey);
        assert_eq!(key.state, KeyState::PreActivation);
        assert_eq!(key.parent_kid.as_deref(), Some("kid_parent"));
        assert!(key.created_at.is_some());
    }

    #[test]
    fn key_deserializes_without_optional_fields() {
        let key: EncryptionKey = serde_json::from_str(
            r#"{"kid": "kid_1", "type": "tenant-master-key", "state": "active"}"#,
        )
        .unwrap();

        assert_eq!(key.key_type, KeyType::TenantMasterKey);
        assert!(key.parent_kid.is_none());
        assert!(key.created_at.is_none());
    }

    #[test]
    fn create_request_serializes_type_field() {
        let body = serde_json::to_value(CreateEncryptionKeyRequest {
            key_type: KeyType::CustomerProvidedRootKey,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"type": "customer-provided-root-key"})
        );
    }

    #[test]
    fn list_pagination() {
        let page = EncryptionKeyList {
            keys: vec![],
            start: 0,
            limit: 5,
            total: 7,
        };
        assert!(page.has_next());

        let page = EncryptionKeyList {
            keys: vec![],
            start: 5,
            limit: 5,
            total: 7,
        };
        assert!(!page.has_next());
    }

    #[test]
    fn terminal_states() {
        assert!(KeyState::Active.is_terminal());
        assert!(KeyState::Destroyed.is_terminal());
        assert!(!KeyState::PreActivation.is_terminal());
        assert!(!KeyState::Deactivated.is_terminal());
    }
}
