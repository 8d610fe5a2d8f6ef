/// Per-account notification preferences
///
/// A preference row is materialized with fixed defaults the first time it
/// is needed. Both creation paths are upserts on the unique account id, so
/// concurrent first reads converge on one row.
use crate::{
    account::AccountStore,
    db::{
        self,
        models::{Preference, PreferencePatch},
        preferences,
    },
    error::{ServiceError, ServiceResult},
    events::{types::PreferencesUpdated, EventPublisher},
    metrics,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Channel switches of an account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub account_id: String,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub preferences: Preference,
}

pub struct PreferenceManager {
    store: Arc<AccountStore>,
    events: Arc<EventPublisher>,
}

impl PreferenceManager {
    pub fn new(store: Arc<AccountStore>, events: Arc<EventPublisher>) -> Self {
        Self { store, events }
    }

    /// Return the account's preferences, creating the default row if absent
    pub async fn get_or_create_defaults(&self, account_id: &str) -> ServiceResult<Preference> {
        let pool = self.store.pool();

        if let Some(existing) = preferences::find_by_account(pool, account_id).await? {
            return Ok(existing);
        }

        if !self.store.exists(account_id).await? {
            return Err(ServiceError::NotFound("Account not found".to_string()));
        }

        if preferences::insert_if_absent(pool, &Preference::defaults_for(account_id)).await? {
            // The cached view still says "no preferences"
            self.store.invalidate(account_id).await;
            metrics::record_mutation("preference", "create_default");
        }

        preferences::find_by_account(pool, account_id)
            .await?
            .ok_or_else(|| ServiceError::Internal("Preference row missing after upsert".to_string()))
    }

    /// Overwrite the fields present in `patch`; returns the new row
    pub async fn update_preferences(
        &self,
        account_id: &str,
        patch: PreferencePatch,
    ) -> ServiceResult<Preference> {
        self.store.read(account_id).await?;

        let mut tx = db::begin_write(self.store.pool()).await?;
        let old = preferences::find_by_account(&mut *tx, account_id)
            .await?
            .unwrap_or_else(|| Preference::defaults_for(account_id));

        preferences::upsert_patch(&mut *tx, &old, &patch, Utc::now()).await?;

        let new = preferences::find_by_account(&mut *tx, account_id)
            .await?
            .ok_or_else(|| ServiceError::Internal("Preference row missing after upsert".to_string()))?;
        tx.commit().await?;

        self.store.invalidate(account_id).await;
        metrics::record_mutation("preference", "update");

        let changed_field_names = patch.field_names();
        info!(account_id, changed = ?changed_field_names, "Preferences updated");

        self.events
            .emit(&PreferencesUpdated {
                account_id: account_id.to_string(),
                old_preferences: old,
                new_preferences: new.clone(),
                changed_field_names,
            })
            .await;

        Ok(new)
    }

    pub async fn can_receive_email(&self, account_id: &str) -> ServiceResult<bool> {
        Ok(self.get_or_create_defaults(account_id).await?.email_enabled)
    }

    pub async fn can_receive_push(&self, account_id: &str) -> ServiceResult<bool> {
        Ok(self.get_or_create_defaults(account_id).await?.push_enabled)
    }

    pub async fn notification_preferences(
        &self,
        account_id: &str,
    ) -> ServiceResult<NotificationPreferences> {
        let preferences = self.get_or_create_defaults(account_id).await?;
        Ok(NotificationPreferences {
            account_id: account_id.to_string(),
            email_enabled: preferences.email_enabled,
            push_enabled: preferences.push_enabled,
            preferences,
        })
    }
}
