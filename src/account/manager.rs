/// Account lifecycle operations
///
/// Every mutation follows the same order: commit, invalidate the cached
/// view, publish the event, return. Publish outcomes never change the
/// result of the operation.
use super::{
    AccountMutation, AccountStore, AccountValidation, AccountView, AuthResponse, ContactInfo,
    CreateAccountRequest, LoginRequest, Paginated, RegisterRequest, UpdateAccountRequest,
};
use crate::{
    auth::TokenService,
    crypto::PasswordHasher,
    db::{
        device_tokens,
        models::{AccountProfile, AccountRecord, Preference},
    },
    error::{ServiceError, ServiceResult},
    events::{
        types::{AccountCreated, AccountDeleted, AccountSnapshot, AccountUpdated, CreationKind},
        EventPublisher,
    },
    preferences::PreferenceManager,
};
use std::sync::Arc;
use tracing::info;

/// Maximum page size for account listings
pub const MAX_PAGE_LIMIT: u32 = 100;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Account manager service
pub struct AccountManager {
    store: Arc<AccountStore>,
    preferences: Arc<PreferenceManager>,
    tokens: TokenService,
    hasher: PasswordHasher,
    events: Arc<EventPublisher>,
}

impl AccountManager {
    pub fn new(
        store: Arc<AccountStore>,
        preferences: Arc<PreferenceManager>,
        tokens: TokenService,
        hasher: PasswordHasher,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self {
            store,
            preferences,
            tokens,
            hasher,
            events,
        }
    }

    /// Self-service sign-up; returns a session token
    pub async fn register(&self, req: RegisterRequest) -> ServiceResult<AuthResponse> {
        let (record, preferences) = self
            .insert_account(&req.email, &req.password, req.display_name, |_| {})
            .await?;

        self.events
            .emit(&created_event(CreationKind::Registered, &record, &preferences))
            .await;

        info!(account_id = %record.id, "Account registered");

        Ok(AuthResponse {
            token: self.tokens.issue(&record.id)?,
            account: record.profile(),
            preferences,
        })
    }

    /// Exchange credentials for a session token
    ///
    /// Unknown email, deactivated account and wrong password are
    /// indistinguishable to the caller.
    pub async fn login(&self, req: LoginRequest) -> ServiceResult<AuthResponse> {
        let record = self
            .store
            .find_by_email(req.email.trim())
            .await?
            .filter(|r| r.status.is_active())
            .ok_or_else(|| ServiceError::Unauthenticated(INVALID_CREDENTIALS.to_string()))?;

        if !self.hasher.verify(&req.password, &record.password_hash)? {
            return Err(ServiceError::Unauthenticated(INVALID_CREDENTIALS.to_string()));
        }

        let preferences = self.preferences.get_or_create_defaults(&record.id).await?;

        Ok(AuthResponse {
            token: self.tokens.issue(&record.id)?,
            account: record.profile(),
            preferences,
        })
    }

    /// Provision an account on behalf of another service
    pub async fn create_account(&self, req: CreateAccountRequest) -> ServiceResult<AccountView> {
        let email_enabled = req.email_enabled;
        let push_enabled = req.push_enabled;

        let (record, preferences) = self
            .insert_account(&req.email, &req.password, req.display_name, |prefs| {
                if let Some(v) = email_enabled {
                    prefs.email_enabled = v;
                }
                if let Some(v) = push_enabled {
                    prefs.push_enabled = v;
                }
            })
            .await?;

        self.events
            .emit(&created_event(CreationKind::Provisioned, &record, &preferences))
            .await;

        info!(account_id = %record.id, "Account created");

        Ok(AccountView {
            profile: record.profile(),
            preferences: Some(preferences),
            device_tokens: Vec::new(),
        })
    }

    async fn insert_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
        customize: impl FnOnce(&mut Preference),
    ) -> ServiceResult<(AccountRecord, Preference)> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(ServiceError::InvalidArgument("Password is required".to_string()));
        }

        // Cheap pre-check; the unique index is the real guard
        if self.store.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }

        let password_hash = self.hasher.hash(password)?;
        let record = AccountRecord::new(email, password_hash, display_name);
        let mut preferences = Preference::defaults_for(&record.id);
        customize(&mut preferences);

        self.store.create(&record, &preferences).await?;
        Ok((record, preferences))
    }

    /// Cached account view
    pub async fn get_account(&self, id: &str) -> ServiceResult<AccountView> {
        self.store.read(id).await
    }

    /// Accounts newest first; `page` is 1-based
    pub async fn list_accounts(
        &self,
        page: u32,
        limit: u32,
    ) -> ServiceResult<Paginated<AccountProfile>> {
        if page == 0 {
            return Err(ServiceError::InvalidArgument(
                "Page must be at least 1".to_string(),
            ));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ServiceError::InvalidArgument(format!(
                "Limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        self.store.list_all(page, limit).await
    }

    /// Update email and/or display name
    pub async fn update_account(
        &self,
        id: &str,
        req: UpdateAccountRequest,
    ) -> ServiceResult<AccountView> {
        let current = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))?;

        let new_email = req.email.as_deref().map(normalize_email).transpose()?;
        if let Some(ref email) = new_email {
            if let Some(owner) = self.store.find_by_email(email).await? {
                if owner.id != id {
                    return Err(ServiceError::Conflict("Email is already in use".to_string()));
                }
            }
        }

        let changed_field_names = req.field_names();
        let mutation = AccountMutation::UpdateProfile {
            email: new_email.unwrap_or(current.email),
            display_name: req.display_name.or(current.display_name),
        };
        let outcome = self.store.write(id, mutation).await?;

        self.events
            .emit(&AccountUpdated {
                account_id: id.to_string(),
                email: outcome.after.email.clone(),
                display_name: outcome.after.display_name.clone(),
                changed_field_names,
                old_data: snapshot(&outcome.before),
                new_data: snapshot(&outcome.after),
            })
            .await;

        self.store.read(id).await
    }

    /// Soft delete: the row stays, login stops working
    pub async fn deactivate_account(&self, id: &str) -> ServiceResult<()> {
        let outcome = self.store.write(id, AccountMutation::Deactivate).await?;

        self.events
            .emit(&AccountDeleted {
                account_id: id.to_string(),
                email: outcome.after.email.clone(),
                display_name: outcome.after.display_name.clone(),
            })
            .await;

        info!(account_id = %id, "Account deactivated");
        Ok(())
    }

    /// Internal check used by other services; never fails with NotFound
    pub async fn validate_account(&self, id: &str) -> ServiceResult<AccountValidation> {
        match self.store.read(id).await {
            Ok(view) => Ok(AccountValidation {
                valid: view.profile.active,
                account_id: view.profile.id,
                email: Some(view.profile.email),
                display_name: view.profile.display_name,
                active: Some(view.profile.active),
                preferences: view.preferences,
            }),
            Err(ServiceError::NotFound(_)) => Ok(AccountValidation {
                valid: false,
                account_id: id.to_string(),
                email: None,
                display_name: None,
                active: None,
                preferences: None,
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> ServiceResult<AccountProfile> {
        self.store
            .find_by_email(email.trim())
            .await?
            .map(|record| record.profile())
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))
    }

    pub async fn email_address(&self, id: &str) -> ServiceResult<String> {
        self.store
            .find_by_id(id)
            .await?
            .map(|record| record.email)
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))
    }

    /// Email, preferences and active device tokens, read from the database
    pub async fn contact_info(&self, id: &str) -> ServiceResult<ContactInfo> {
        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))?;
        let preferences = self.preferences.get_or_create_defaults(id).await?;
        let device_tokens = device_tokens::list_active(self.store.pool(), id).await?;

        Ok(ContactInfo {
            account_id: record.id,
            email: record.email,
            display_name: record.display_name,
            preferences,
            device_tokens,
        })
    }

    /// Resolve a session token to its account, which must still be active
    pub async fn validate_token(&self, token: &str) -> ServiceResult<AccountView> {
        let account_id = self.tokens.validate(token)?;

        let view = match self.store.read(&account_id).await {
            Ok(view) => view,
            Err(ServiceError::NotFound(_)) => {
                return Err(ServiceError::Unauthenticated(
                    "Account no longer exists".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        if !view.profile.active {
            return Err(ServiceError::Unauthenticated(
                "Account is deactivated".to_string(),
            ));
        }

        Ok(view)
    }
}

/// Trimmed email, rejected when it cannot be an address
fn normalize_email(email: &str) -> ServiceResult<String> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ServiceError::InvalidArgument(
            "A valid email is required".to_string(),
        ));
    }
    Ok(email.to_string())
}

fn snapshot(record: &AccountRecord) -> AccountSnapshot {
    AccountSnapshot {
        email: record.email.clone(),
        display_name: record.display_name.clone(),
    }
}

fn created_event(kind: CreationKind, record: &AccountRecord, preferences: &Preference) -> AccountCreated {
    AccountCreated {
        kind,
        account_id: record.id.clone(),
        email: record.email.clone(),
        display_name: record.display_name.clone(),
        preferences: preferences.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{CacheClient, MemoryCacheStore},
        db::{accounts, create_memory_pool, run_migrations},
        events::{routing_keys, MemoryBus},
    };
    use std::time::Duration;

    struct Fixture {
        bus: Arc<MemoryBus>,
        store: Arc<AccountStore>,
        manager: AccountManager,
    }

    async fn setup() -> Fixture {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let cache = CacheClient::new(Arc::new(MemoryCacheStore::new()), "test:");
        let store = Arc::new(AccountStore::new(pool, cache, Duration::from_secs(300)));

        let bus = Arc::new(MemoryBus::new(100));
        let events = Arc::new(EventPublisher::new(bus.clone(), "account.events", "account-service", "1.0.0"));
        events.start().await;

        let preferences = Arc::new(PreferenceManager::new(store.clone(), events.clone()));
        let manager = AccountManager::new(
            store.clone(),
            preferences,
            TokenService::new("test-secret-key-for-testing-only-0123456789", 3600),
            PasswordHasher::new(1024, 1).unwrap(),
            events,
        );

        Fixture { bus, store, manager }
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "hunter22".to_string(),
            display_name: Some("Ann".to_string()),
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let f = setup().await;

        let registered = f.manager.register(register_request("a@x.com")).await.unwrap();
        assert!(registered.preferences.email_enabled);
        assert_eq!(
            f.manager.validate_token(&registered.token).await.unwrap().profile.id,
            registered.account.id
        );

        let login = f
            .manager
            .login(LoginRequest {
                email: "a@x.com".into(),
                password: "hunter22".into(),
            })
            .await
            .unwrap();
        assert_eq!(login.account.id, registered.account.id);

        let events = f.bus.messages_for(routing_keys::ACCOUNT_REGISTERED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["email"], "a@x.com");
        assert!(events[0].payload.get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_login_failures_share_one_message() {
        let f = setup().await;
        let registered = f.manager.register(register_request("a@x.com")).await.unwrap();

        let wrong_password = f
            .manager
            .login(LoginRequest {
                email: "a@x.com".into(),
                password: "nope".into(),
            })
            .await
            .unwrap_err();
        let unknown = f
            .manager
            .login(LoginRequest {
                email: "b@x.com".into(),
                password: "hunter22".into(),
            })
            .await
            .unwrap_err();

        f.manager.deactivate_account(&registered.account.id).await.unwrap();
        let deactivated = f
            .manager
            .login(LoginRequest {
                email: "a@x.com".into(),
                password: "hunter22".into(),
            })
            .await
            .unwrap_err();

        for err in [&wrong_password, &unknown, &deactivated] {
            assert!(matches!(err, ServiceError::Unauthenticated(_)));
        }
        assert_eq!(wrong_password.to_string(), unknown.to_string());
        assert_eq!(unknown.to_string(), deactivated.to_string());
    }

    #[tokio::test]
    async fn test_register_rejects_missing_fields() {
        let f = setup().await;
        let mut req = register_request("");
        assert!(matches!(
            f.manager.register(req.clone()).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        req.email = "a@x.com".into();
        req.password = String::new();
        assert!(matches!(
            f.manager.register(req).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_create_account_with_channel_overrides() {
        let f = setup().await;
        let view = f
            .manager
            .create_account(CreateAccountRequest {
                email: "c@x.com".into(),
                password: "pw".into(),
                display_name: None,
                email_enabled: Some(false),
                push_enabled: None,
            })
            .await
            .unwrap();

        let prefs = view.preferences.unwrap();
        assert!(!prefs.email_enabled);
        assert!(prefs.push_enabled);
        assert_eq!(f.bus.messages_for(routing_keys::ACCOUNT_CREATED).len(), 1);
    }

    #[tokio::test]
    async fn test_update_account_event() {
        let f = setup().await;
        let id = f.manager.register(register_request("a@x.com")).await.unwrap().account.id;

        let view = f
            .manager
            .update_account(
                &id,
                UpdateAccountRequest {
                    email: None,
                    display_name: Some("Bob".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(view.profile.display_name.as_deref(), Some("Bob"));
        assert_eq!(view.profile.email, "a@x.com");

        let events = f.bus.messages_for(routing_keys::ACCOUNT_UPDATED);
        assert_eq!(events.len(), 1);
        let payload = &events[0].payload;
        assert_eq!(payload["changedFieldNames"], serde_json::json!(["displayName"]));
        assert_eq!(payload["oldData"]["displayName"], "Ann");
        assert_eq!(payload["newData"]["displayName"], "Bob");
    }

    #[tokio::test]
    async fn test_update_to_taken_email() {
        let f = setup().await;
        f.manager.register(register_request("a@x.com")).await.unwrap();
        let b = f.manager.register(register_request("b@x.com")).await.unwrap().account.id;

        let err = f
            .manager
            .update_account(
                &b,
                UpdateAccountRequest {
                    email: Some("a@x.com".into()),
                    display_name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert!(f.bus.messages_for(routing_keys::ACCOUNT_UPDATED).is_empty());
    }

    #[tokio::test]
    async fn test_padded_email_is_trimmed_everywhere() {
        let f = setup().await;
        f.manager.register(register_request("a@x.com")).await.unwrap();
        let b = f.manager.register(register_request("  b@x.com ")).await.unwrap().account;
        assert_eq!(b.email, "b@x.com");

        let err = f
            .manager
            .update_account(
                &b.id,
                UpdateAccountRequest {
                    email: Some(" a@x.com ".into()),
                    display_name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(f.manager.get_account(&b.id).await.unwrap().profile.email, "b@x.com");

        assert!(matches!(
            f.manager.register(register_request(" a@x.com")).await,
            Err(ServiceError::Conflict(_))
        ));

        let login = f
            .manager
            .login(LoginRequest {
                email: " b@x.com ".into(),
                password: "hunter22".into(),
            })
            .await
            .unwrap();
        assert_eq!(login.account.id, b.id);
        assert_eq!(f.manager.find_by_email("b@x.com ").await.unwrap().id, b.id);

        let moved = f
            .manager
            .update_account(
                &b.id,
                UpdateAccountRequest {
                    email: Some(" c@x.com ".into()),
                    display_name: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.profile.email, "c@x.com");
    }

    #[tokio::test]
    async fn test_validate_account() {
        let f = setup().await;
        let id = f.manager.register(register_request("a@x.com")).await.unwrap().account.id;

        assert!(f.manager.validate_account(&id).await.unwrap().valid);

        f.manager.deactivate_account(&id).await.unwrap();
        let validation = f.manager.validate_account(&id).await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.email.as_deref(), Some("a@x.com"));
        assert_eq!(validation.active, Some(false));

        let missing = f.manager.validate_account("missing").await.unwrap();
        assert!(!missing.valid);
        assert!(missing.email.is_none());
    }

    #[tokio::test]
    async fn test_deactivated_token_subject_rejected() {
        let f = setup().await;
        let registered = f.manager.register(register_request("a@x.com")).await.unwrap();
        f.manager.deactivate_account(&registered.account.id).await.unwrap();

        assert!(matches!(
            f.manager.validate_token(&registered.token).await,
            Err(ServiceError::Unauthenticated(_))
        ));
        assert_eq!(f.bus.messages_for(routing_keys::ACCOUNT_DELETED).len(), 1);
    }

    #[tokio::test]
    async fn test_list_accounts_bounds() {
        let f = setup().await;
        assert!(matches!(
            f.manager.list_accounts(0, 10).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.manager.list_accounts(1, 101).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        f.manager.register(register_request("a@x.com")).await.unwrap();
        let page = f.manager.list_accounts(1, 10).await.unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.meta.total_pages, 1);
    }

    #[tokio::test]
    async fn test_contact_info() {
        let f = setup().await;
        let id = f.manager.register(register_request("a@x.com")).await.unwrap().account.id;

        let info = f.manager.contact_info(&id).await.unwrap();
        assert_eq!(info.email, "a@x.com");
        assert!(info.device_tokens.is_empty());
        assert_eq!(f.manager.email_address(&id).await.unwrap(), "a@x.com");
        assert_eq!(accounts::count(f.store.pool()).await.unwrap(), 1);

        assert!(matches!(
            f.manager.contact_info("missing").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
