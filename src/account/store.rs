/// Cache-aside account repository
///
/// Reads check the cache first and fall back to the database; only found
/// accounts are cached. Writes commit, then delete the cache entry.
///
/// A read that loaded from the database before a write committed must not
/// put that stale snapshot back into the cache after the write invalidated
/// it. Each id hashes onto a generation counter; invalidation bumps it
/// under the stripe lock, and a read only populates the cache if the
/// generation it saw before loading is still current.
use super::{AccountView, PageMeta, Paginated};
use crate::{
    cache::{categories, CacheClient},
    db::{
        self,
        accounts, device_tokens,
        models::{AccountProfile, AccountRecord, AccountStatus, Preference},
        preferences,
    },
    error::{ServiceError, ServiceResult},
    metrics,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error};

const GENERATION_STRIPES: usize = 64;

/// A change to the account row itself
#[derive(Debug, Clone)]
pub enum AccountMutation {
    UpdateProfile {
        email: String,
        display_name: Option<String>,
    },
    Deactivate,
}

impl AccountMutation {
    fn name(&self) -> &'static str {
        match self {
            AccountMutation::UpdateProfile { .. } => "update",
            AccountMutation::Deactivate => "deactivate",
        }
    }
}

/// Row state on both sides of a committed write
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub before: AccountRecord,
    pub after: AccountRecord,
}

pub struct AccountStore {
    pool: SqlitePool,
    cache: CacheClient,
    ttl: Duration,
    generations: Vec<Mutex<u64>>,
}

impl AccountStore {
    pub fn new(pool: SqlitePool, cache: CacheClient, ttl: Duration) -> Self {
        Self {
            pool,
            cache,
            ttl,
            generations: (0..GENERATION_STRIPES).map(|_| Mutex::new(0)).collect(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn stripe(&self, id: &str) -> &Mutex<u64> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.generations[(hasher.finish() as usize) % GENERATION_STRIPES]
    }

    /// Account with preferences and active device tokens
    ///
    /// Deactivated accounts are returned too; callers decide what that means.
    pub async fn read(&self, id: &str) -> ServiceResult<AccountView> {
        match self.cache.get::<AccountView>(categories::ACCOUNT, id).await {
            Ok(Some(view)) => return Ok(view),
            Ok(None) => {}
            Err(e) => {
                error!(account_id = %id, error = %e, "Account cache read failed; loading from database");
                metrics::record_cache_error("get");
            }
        }

        let seen = *self.stripe(id).lock().await;

        let view = self
            .load(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))?;

        self.populate_if_current(id, seen, &view).await;
        Ok(view)
    }

    /// Load the full view from the database, bypassing the cache
    pub async fn load(&self, id: &str) -> ServiceResult<Option<AccountView>> {
        let Some(record) = accounts::find_by_id(&self.pool, id).await? else {
            return Ok(None);
        };
        let preferences = preferences::find_by_account(&self.pool, id).await?;
        let device_tokens = device_tokens::list_active(&self.pool, id).await?;

        Ok(Some(AccountView {
            profile: record.profile(),
            preferences,
            device_tokens,
        }))
    }

    /// Cache `view` unless `id` was invalidated since generation `seen`
    ///
    /// Returns whether the cache was populated.
    ///
    /// The stripe lock is held across the cache SET, so with Redis every
    /// read-populate and invalidation of ids on the same stripe (1/64 of
    /// the id space) waits for that round-trip. The hold is not bounded by
    /// a timeout: a SET abandoned mid-flight could still reach the cache
    /// after a later invalidation's DELETE and leave a stale entry behind.
    pub async fn populate_if_current(&self, id: &str, seen: u64, view: &AccountView) -> bool {
        let generation = self.stripe(id).lock().await;
        if *generation != seen {
            debug!(account_id = %id, "Skipping cache population; account changed during load");
            return false;
        }

        // Hold the stripe lock so an invalidation cannot slip in between
        match self.cache.set(categories::ACCOUNT, id, view, self.ttl).await {
            Ok(()) => true,
            Err(e) => {
                error!(account_id = %id, error = %e, "Account cache write failed");
                metrics::record_cache_error("set");
                false
            }
        }
    }

    /// Current generation of the stripe `id` maps to
    pub async fn generation(&self, id: &str) -> u64 {
        *self.stripe(id).lock().await
    }

    /// Drop the cached view of `id`; call after every committed change
    pub async fn invalidate(&self, id: &str) {
        let mut generation = self.stripe(id).lock().await;
        *generation = generation.wrapping_add(1);

        if let Err(e) = self.cache.delete(categories::ACCOUNT, id).await {
            // The stale entry lives until its TTL runs out
            error!(account_id = %id, error = %e, "Account cache invalidation failed");
            metrics::record_cache_error("delete");
        }
    }

    /// Apply `mutation` in one transaction, then invalidate
    pub async fn write(&self, id: &str, mutation: AccountMutation) -> ServiceResult<WriteOutcome> {
        let mut tx = db::begin_write(&self.pool).await?;

        let before = accounts::find_by_id(&mut *tx, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))?;

        let now = Utc::now();
        match &mutation {
            AccountMutation::UpdateProfile {
                email,
                display_name,
            } => {
                accounts::update_profile(&mut *tx, id, email, display_name.as_deref(), now)
                    .await
                    .map_err(conflict_on_duplicate_email)?;
            }
            AccountMutation::Deactivate => {
                accounts::set_status(&mut *tx, id, AccountStatus::Deactivated, now).await?;
            }
        }

        let after = accounts::find_by_id(&mut *tx, id)
            .await?
            .ok_or_else(|| ServiceError::Internal("Account vanished during update".to_string()))?;

        tx.commit().await?;
        self.invalidate(id).await;
        metrics::record_mutation("account", mutation.name());

        Ok(WriteOutcome { before, after })
    }

    /// Insert an account and its preference row in one transaction
    pub async fn create(&self, record: &AccountRecord, prefs: &Preference) -> ServiceResult<()> {
        if accounts::find_by_email(&self.pool, &record.email).await?.is_some() {
            return Err(duplicate_email());
        }

        let mut tx = db::begin_write(&self.pool).await?;
        accounts::insert(&mut *tx, record)
            .await
            .map_err(conflict_on_duplicate_email)?;
        preferences::insert_if_absent(&mut *tx, prefs).await?;
        tx.commit().await?;

        metrics::record_mutation("account", "create");
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> ServiceResult<Option<AccountRecord>> {
        accounts::find_by_id(&self.pool, id).await
    }

    pub async fn find_by_email(&self, email: &str) -> ServiceResult<Option<AccountRecord>> {
        accounts::find_by_email(&self.pool, email).await
    }

    pub async fn exists(&self, id: &str) -> ServiceResult<bool> {
        Ok(accounts::find_by_id(&self.pool, id).await?.is_some())
    }

    /// One page of accounts, newest first; `page` is 1-based
    pub async fn list_all(&self, page: u32, limit: u32) -> ServiceResult<Paginated<AccountProfile>> {
        let total = accounts::count(&self.pool).await?;
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let rows = accounts::list_page(&self.pool, offset, i64::from(limit)).await?;

        Ok(Paginated {
            data: rows.iter().map(AccountRecord::profile).collect(),
            meta: PageMeta::new(page, limit, total),
        })
    }
}

fn duplicate_email() -> ServiceError {
    ServiceError::Conflict("An account with this email already exists".to_string())
}

fn conflict_on_duplicate_email(e: ServiceError) -> ServiceError {
    if e.is_unique_violation() {
        duplicate_email()
    } else {
        e
    }
}
