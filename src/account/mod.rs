/// Account management
///
/// Handles registration, login, account CRUD and the cache-aside account
/// repository everything else reads through.

mod manager;
mod store;

pub use manager::AccountManager;
pub use store::{AccountMutation, AccountStore, WriteOutcome};

use crate::db::models::{AccountProfile, DeviceToken, Preference};
use serde::{Deserialize, Serialize};

/// Account as served to callers and held in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    #[serde(flatten)]
    pub profile: AccountProfile,
    pub preferences: Option<Preference>,
    /// Active tokens only
    pub device_tokens: Vec<DeviceToken>,
}

/// Self-service sign-up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Register/login response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub account: AccountProfile,
    pub preferences: Preference,
    pub token: String,
}

/// Account provisioned by another service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub email_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
}

/// Profile update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl UpdateAccountRequest {
    /// Names of the fields present in this request
    pub fn field_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.email.is_some() {
            names.push("email".to_string());
        }
        if self.display_name.is_some() {
            names.push("displayName".to_string());
        }
        names
    }
}

/// Internal account validation result
///
/// A missing account is `valid: false`, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountValidation {
    pub valid: bool,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preference>,
}

/// Everything a notifier needs to reach an account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub account_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub preferences: Preference,
    pub device_tokens: Vec<DeviceToken>,
}

/// Page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl PageMeta {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit_i - 1) / limit_i,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_rounds_up() {
        assert_eq!(PageMeta::new(1, 10, 0).total_pages, 0);
        assert_eq!(PageMeta::new(1, 10, 10).total_pages, 1);
        assert_eq!(PageMeta::new(1, 10, 11).total_pages, 2);
        assert_eq!(PageMeta::new(1, 3, 7).total_pages, 3);
    }

    #[test]
    fn test_page_meta_serializes_camel_case() {
        let json = serde_json::to_value(PageMeta::new(2, 5, 12)).unwrap();
        assert_eq!(json["totalPages"], 3);
    }

    #[test]
    fn test_update_request_field_names() {
        let req = UpdateAccountRequest {
            email: None,
            display_name: Some("Ann".into()),
        };
        assert_eq!(req.field_names(), vec!["displayName"]);
        assert!(UpdateAccountRequest::default().field_names().is_empty());
    }

    #[test]
    fn test_view_flattens_profile() {
        let record = crate::db::models::AccountRecord::new("a@x.com".into(), "h".into(), None);
        let view = AccountView {
            profile: record.profile(),
            preferences: None,
            device_tokens: vec![],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["email"], "a@x.com");
        assert_eq!(json["deviceTokens"], serde_json::json!([]));

        let back: AccountView = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }
}
