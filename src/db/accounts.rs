/// Account table queries
use crate::{
    db::models::{AccountRecord, AccountStatus},
    error::ServiceResult,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, display_name, status, created_at, updated_at";

fn account_from_row(row: &SqliteRow) -> ServiceResult<AccountRecord> {
    let status: String = row.try_get("status")?;
    Ok(AccountRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        display_name: row.try_get("display_name")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Find an account by id, regardless of lifecycle state
pub async fn find_by_id<'e, E>(executor: E, id: &str) -> ServiceResult<Option<AccountRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {} FROM account WHERE id = ?1", ACCOUNT_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(account_from_row).transpose()
}

/// Find an account by email, regardless of lifecycle state
pub async fn find_by_email<'e, E>(executor: E, email: &str) -> ServiceResult<Option<AccountRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM account WHERE email = ?1",
        ACCOUNT_COLUMNS
    ))
    .bind(email)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(account_from_row).transpose()
}

/// Insert a new account; a duplicate email surfaces as a unique violation
pub async fn insert<'e, E>(executor: E, account: &AccountRecord) -> ServiceResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO account (id, email, password_hash, display_name, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&account.id)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(&account.display_name)
    .bind(account.status.as_str())
    .bind(account.created_at)
    .bind(account.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Overwrite the profile fields of an account; returns rows affected
pub async fn update_profile<'e, E>(
    executor: E,
    id: &str,
    email: &str,
    display_name: Option<&str>,
    updated_at: DateTime<Utc>,
) -> ServiceResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE account SET email = ?1, display_name = ?2, updated_at = ?3 WHERE id = ?4",
    )
    .bind(email)
    .bind(display_name)
    .bind(updated_at)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Move an account to a lifecycle state; returns rows affected
pub async fn set_status<'e, E>(
    executor: E,
    id: &str,
    status: AccountStatus,
    updated_at: DateTime<Utc>,
) -> ServiceResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE account SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status.as_str())
        .bind(updated_at)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Count all accounts, including deactivated ones
pub async fn count<'e, E>(executor: E) -> ServiceResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account")
        .fetch_one(executor)
        .await?;

    Ok(total)
}

/// Offset/limit page ordered by creation time, newest first
pub async fn list_page<'e, E>(executor: E, offset: i64, limit: i64) -> ServiceResult<Vec<AccountRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(&format!(
        "SELECT {} FROM account ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
        ACCOUNT_COLUMNS
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    rows.iter().map(account_from_row).collect()
}
