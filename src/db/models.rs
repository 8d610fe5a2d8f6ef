/// Account, preference and device-token records
use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Deactivated,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Deactivated => "deactivated",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl FromStr for AccountStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "deactivated" => Ok(AccountStatus::Deactivated),
            other => Err(ServiceError::Internal(format!(
                "Unknown account status in store: {}",
                other
            ))),
        }
    }
}

/// Push platform of a device token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            _ => Err(ServiceError::InvalidArgument(
                "Platform must be ios, android, or web".to_string(),
            )),
        }
    }
}

/// How often batched emails are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailFrequency {
    Immediate,
    Daily,
    Weekly,
    Never,
}

impl EmailFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailFrequency::Immediate => "immediate",
            EmailFrequency::Daily => "daily",
            EmailFrequency::Weekly => "weekly",
            EmailFrequency::Never => "never",
        }
    }
}

impl FromStr for EmailFrequency {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(EmailFrequency::Immediate),
            "daily" => Ok(EmailFrequency::Daily),
            "weekly" => Ok(EmailFrequency::Weekly),
            "never" => Ok(EmailFrequency::Never),
            _ => Err(ServiceError::InvalidArgument(
                "Email frequency must be immediate, daily, weekly, or never".to_string(),
            )),
        }
    }
}

/// Account row, including the password hash
///
/// Never cached and never serialized to callers; see [`AccountProfile`].
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn new(email: String, password_hash: String, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            display_name,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            active: self.status.is_active(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Caller-visible account fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub active: bool,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Preference row, one per account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub id: String,
    pub account_id: String,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub sms_enabled: bool,
    pub email_frequency: EmailFrequency,
    pub language: String,
    pub timezone: String,
    pub marketing_emails: bool,
    pub security_emails: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preference {
    /// Fixed defaults applied when a preference row is first materialized
    pub fn defaults_for(account_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            email_enabled: true,
            push_enabled: true,
            sms_enabled: false,
            email_frequency: EmailFrequency::Immediate,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            marketing_emails: false,
            security_emails: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overlay the present fields of a patch onto this row
    pub fn apply(mut self, patch: &PreferencePatch) -> Self {
        if let Some(v) = patch.email_enabled {
            self.email_enabled = v;
        }
        if let Some(v) = patch.push_enabled {
            self.push_enabled = v;
        }
        if let Some(v) = patch.sms_enabled {
            self.sms_enabled = v;
        }
        if let Some(v) = patch.email_frequency {
            self.email_frequency = v;
        }
        if let Some(ref v) = patch.language {
            self.language = v.clone();
        }
        if let Some(ref v) = patch.timezone {
            self.timezone = v.clone();
        }
        if let Some(v) = patch.marketing_emails {
            self.marketing_emails = v;
        }
        if let Some(v) = patch.security_emails {
            self.security_emails = v;
        }
        self
    }
}

/// Partial preference update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_frequency: Option<EmailFrequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing_emails: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_emails: Option<bool>,
}

impl PreferencePatch {
    /// Names of the fields present in this patch, in declaration order
    pub fn field_names(&self) -> Vec<String> {
        let fields: [(&str, bool); 8] = [
            ("emailEnabled", self.email_enabled.is_some()),
            ("pushEnabled", self.push_enabled.is_some()),
            ("smsEnabled", self.sms_enabled.is_some()),
            ("emailFrequency", self.email_frequency.is_some()),
            ("language", self.language.is_some()),
            ("timezone", self.timezone.is_some()),
            ("marketingEmails", self.marketing_emails.is_some()),
            ("securityEmails", self.security_emails.is_some()),
        ];

        fields
            .iter()
            .filter(|(_, present)| *present)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }
}

/// Device token row; the token string is the identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub token: String,
    pub account_id: String,
    pub platform: Platform,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
