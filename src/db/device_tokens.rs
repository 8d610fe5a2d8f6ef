/// Device token table queries
use crate::{
    db::models::{DeviceToken, Platform},
    error::ServiceResult,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

fn token_from_row(row: &SqliteRow) -> ServiceResult<DeviceToken> {
    let platform: String = row.try_get("platform")?;
    Ok(DeviceToken {
        token: row.try_get("token")?,
        account_id: row.try_get("account_id")?,
        platform: platform.parse()?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Find a token row regardless of owner or activity
pub async fn find<'e, E>(executor: E, token: &str) -> ServiceResult<Option<DeviceToken>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT token, account_id, platform, is_active, created_at, updated_at
         FROM device_token WHERE token = ?1",
    )
    .bind(token)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(token_from_row).transpose()
}

/// Bind a token to an account and mark it active
///
/// A token already known under another account is moved to `account_id`.
pub async fn upsert_active<'e, E>(
    executor: E,
    account_id: &str,
    token: &str,
    platform: Platform,
    now: DateTime<Utc>,
) -> ServiceResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO device_token (token, account_id, platform, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?4)
         ON CONFLICT(token) DO UPDATE SET
             account_id = excluded.account_id,
             platform = excluded.platform,
             is_active = 1,
             updated_at = excluded.updated_at",
    )
    .bind(token)
    .bind(account_id)
    .bind(platform.as_str())
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Mark the token inactive if it belongs to `account_id`; returns rows affected
pub async fn deactivate<'e, E>(
    executor: E,
    account_id: &str,
    token: &str,
    now: DateTime<Utc>,
) -> ServiceResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE device_token SET is_active = 0, updated_at = ?1
         WHERE token = ?2 AND account_id = ?3",
    )
    .bind(now)
    .bind(token)
    .bind(account_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Active tokens of an account, oldest first
pub async fn list_active<'e, E>(executor: E, account_id: &str) -> ServiceResult<Vec<DeviceToken>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT token, account_id, platform, is_active, created_at, updated_at
         FROM device_token
         WHERE account_id = ?1 AND is_active = 1
         ORDER BY created_at ASC, token ASC",
    )
    .bind(account_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(token_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{accounts, create_memory_pool, models::AccountRecord, run_migrations};

    async fn setup() -> (sqlx::SqlitePool, String, String) {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let a = AccountRecord::new("a@x.com".into(), "h".into(), None);
        let b = AccountRecord::new("b@x.com".into(), "h".into(), None);
        accounts::insert(&pool, &a).await.unwrap();
        accounts::insert(&pool, &b).await.unwrap();
        (pool, a.id, b.id)
    }

    #[tokio::test]
    async fn test_upsert_moves_token_between_accounts() {
        let (pool, a, b) = setup().await;

        upsert_active(&pool, &a, "tok-1", Platform::Ios, Utc::now()).await.unwrap();
        assert_eq!(list_active(&pool, &a).await.unwrap().len(), 1);

        upsert_active(&pool, &b, "tok-1", Platform::Android, Utc::now()).await.unwrap();
        assert!(list_active(&pool, &a).await.unwrap().is_empty());

        let moved = list_active(&pool, &b).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].platform, Platform::Android);

        let row = find(&pool, "tok-1").await.unwrap().unwrap();
        assert_eq!(row.account_id, b);
    }

    #[tokio::test]
    async fn test_deactivate_requires_owner() {
        let (pool, a, b) = setup().await;
        upsert_active(&pool, &a, "tok-1", Platform::Web, Utc::now()).await.unwrap();

        assert_eq!(deactivate(&pool, &b, "tok-1", Utc::now()).await.unwrap(), 0);
        assert_eq!(list_active(&pool, &a).await.unwrap().len(), 1);

        assert_eq!(deactivate(&pool, &a, "tok-1", Utc::now()).await.unwrap(), 1);
        assert!(list_active(&pool, &a).await.unwrap().is_empty());

        // The row is kept, only flagged inactive
        let row = find(&pool, "tok-1").await.unwrap().unwrap();
        assert!(!row.is_active);
    }

    #[tokio::test]
    async fn test_reregister_reactivates() {
        let (pool, a, _) = setup().await;
        upsert_active(&pool, &a, "tok-1", Platform::Ios, Utc::now()).await.unwrap();
        deactivate(&pool, &a, "tok-1", Utc::now()).await.unwrap();
        upsert_active(&pool, &a, "tok-1", Platform::Ios, Utc::now()).await.unwrap();

        assert_eq!(list_active(&pool, &a).await.unwrap().len(), 1);
    }
}
