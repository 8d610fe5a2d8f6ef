/// Event payloads, one type per routing key
///
/// Payloads are self-contained snapshots: consumers get everything they
/// need without reading back from this service.
use crate::db::models::{Platform, Preference};
use serde::{Deserialize, Serialize};

/// Routing key constants
pub mod routing_keys {
    pub const ACCOUNT_REGISTERED: &str = "account.registered";
    pub const ACCOUNT_CREATED: &str = "account.created";
    pub const ACCOUNT_UPDATED: &str = "account.updated";
    pub const ACCOUNT_DELETED: &str = "account.deleted";
    pub const PREFERENCES_UPDATED: &str = "account.preferences.updated";
    pub const DEVICE_TOKEN_ADDED: &str = "account.device-token.added";
    pub const DEVICE_TOKEN_REMOVED: &str = "account.device-token.removed";
}

/// A payload that knows where it is routed
pub trait DomainEvent: Serialize {
    fn routing_key(&self) -> &'static str;
}

/// How an account came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationKind {
    /// Self-service sign-up
    Registered,
    /// Provisioned by another service
    Provisioned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreated {
    #[serde(skip, default = "default_creation_kind")]
    pub kind: CreationKind,
    pub account_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub preferences: Preference,
}

fn default_creation_kind() -> CreationKind {
    CreationKind::Provisioned
}

impl DomainEvent for AccountCreated {
    fn routing_key(&self) -> &'static str {
        match self.kind {
            CreationKind::Registered => routing_keys::ACCOUNT_REGISTERED,
            CreationKind::Provisioned => routing_keys::ACCOUNT_CREATED,
        }
    }
}

/// Profile fields tracked by update events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdated {
    pub account_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub changed_field_names: Vec<String>,
    pub old_data: AccountSnapshot,
    pub new_data: AccountSnapshot,
}

impl DomainEvent for AccountUpdated {
    fn routing_key(&self) -> &'static str {
        routing_keys::ACCOUNT_UPDATED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeleted {
    pub account_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl DomainEvent for AccountDeleted {
    fn routing_key(&self) -> &'static str {
        routing_keys::ACCOUNT_DELETED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdated {
    pub account_id: String,
    pub old_preferences: Preference,
    pub new_preferences: Preference,
    pub changed_field_names: Vec<String>,
}

impl DomainEvent for PreferencesUpdated {
    fn routing_key(&self) -> &'static str {
        routing_keys::PREFERENCES_UPDATED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenAdded {
    pub account_id: String,
    pub device_token: String,
    pub platform: Platform,
    /// Set when the token was taken over from another account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_account_id: Option<String>,
}

impl DomainEvent for DeviceTokenAdded {
    fn routing_key(&self) -> &'static str {
        routing_keys::DEVICE_TOKEN_ADDED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenRemoved {
    pub account_id: String,
    pub device_token: String,
}

impl DomainEvent for DeviceTokenRemoved {
    fn routing_key(&self) -> &'static str {
        routing_keys::DEVICE_TOKEN_REMOVED
    }
}
