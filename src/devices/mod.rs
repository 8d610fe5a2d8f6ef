/// Device push-token registry
///
/// A token string identifies a device globally. Registering a token that
/// another account holds moves it to the caller. Deactivation flips a flag
/// and keeps the row.
use crate::{
    account::AccountStore,
    db::{
        self,
        device_tokens,
        models::{DeviceToken, Platform},
    },
    error::{ServiceError, ServiceResult},
    events::{
        types::{DeviceTokenAdded, DeviceTokenRemoved},
        EventPublisher,
    },
    metrics,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct DeviceTokenRegistry {
    store: Arc<AccountStore>,
    events: Arc<EventPublisher>,
}

impl DeviceTokenRegistry {
    pub fn new(store: Arc<AccountStore>, events: Arc<EventPublisher>) -> Self {
        Self { store, events }
    }

    /// Bind `token` to `account_id` and mark it active
    pub async fn register(
        &self,
        account_id: &str,
        token: &str,
        platform: &str,
    ) -> ServiceResult<DeviceToken> {
        if token.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "Device token is required".to_string(),
            ));
        }
        let platform: Platform = platform.parse()?;

        if !self.store.exists(account_id).await? {
            return Err(ServiceError::NotFound("Account not found".to_string()));
        }

        let mut tx = db::begin_write(self.store.pool()).await?;
        let previous = device_tokens::find(&mut *tx, token).await?;
        device_tokens::upsert_active(&mut *tx, account_id, token, platform, Utc::now()).await?;
        let registered = device_tokens::find(&mut *tx, token)
            .await?
            .ok_or_else(|| ServiceError::Internal("Device token missing after upsert".to_string()))?;
        tx.commit().await?;

        let previous_account_id = previous
            .map(|row| row.account_id)
            .filter(|owner| owner != account_id);

        self.store.invalidate(account_id).await;
        if let Some(ref previous_owner) = previous_account_id {
            self.store.invalidate(previous_owner).await;
            info!(
                account_id,
                previous_account_id = %previous_owner,
                "Device token moved between accounts"
            );
        }
        metrics::record_mutation("device_token", "register");

        self.events
            .emit(&DeviceTokenAdded {
                account_id: account_id.to_string(),
                device_token: registered.token.clone(),
                platform: registered.platform,
                previous_account_id,
            })
            .await;

        Ok(registered)
    }

    /// Mark `token` inactive if `account_id` owns it
    pub async fn deactivate(&self, account_id: &str, token: &str) -> ServiceResult<()> {
        let affected =
            device_tokens::deactivate(self.store.pool(), account_id, token, Utc::now()).await?;
        if affected == 0 {
            return Err(ServiceError::NotFound("Device token not found".to_string()));
        }

        self.store.invalidate(account_id).await;
        metrics::record_mutation("device_token", "deactivate");

        self.events
            .emit(&DeviceTokenRemoved {
                account_id: account_id.to_string(),
                device_token: token.to_string(),
            })
            .await;

        Ok(())
    }

    /// Active tokens of an account
    pub async fn list_active(&self, account_id: &str) -> ServiceResult<Vec<DeviceToken>> {
        device_tokens::list_active(self.store.pool(), account_id).await
    }
}
