/// Preference table queries
///
/// Creation is always expressed as an upsert keyed on the unique
/// `account_id` column, so concurrent creators converge on one row.
use crate::{
    db::models::{Preference, PreferencePatch},
    error::ServiceResult,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

fn preference_from_row(row: &SqliteRow) -> ServiceResult<Preference> {
    let email_frequency: String = row.try_get("email_frequency")?;
    Ok(Preference {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        email_enabled: row.try_get("email_enabled")?,
        push_enabled: row.try_get("push_enabled")?,
        sms_enabled: row.try_get("sms_enabled")?,
        email_frequency: email_frequency.parse()?,
        language: row.try_get("language")?,
        timezone: row.try_get("timezone")?,
        marketing_emails: row.try_get("marketing_emails")?,
        security_emails: row.try_get("security_emails")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Find the preference row of an account
pub async fn find_by_account<'e, E>(executor: E, account_id: &str) -> ServiceResult<Option<Preference>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, account_id, email_enabled, push_enabled, sms_enabled, email_frequency,
                language, timezone, marketing_emails, security_emails, created_at, updated_at
         FROM preference WHERE account_id = ?1",
    )
    .bind(account_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(preference_from_row).transpose()
}

/// Insert a preference row unless one already exists for the account
///
/// Returns true when this call created the row.
pub async fn insert_if_absent<'e, E>(executor: E, prefs: &Preference) -> ServiceResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO preference (id, account_id, email_enabled, push_enabled, sms_enabled,
                                 email_frequency, language, timezone, marketing_emails,
                                 security_emails, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(account_id) DO NOTHING",
    )
    .bind(&prefs.id)
    .bind(&prefs.account_id)
    .bind(prefs.email_enabled)
    .bind(prefs.push_enabled)
    .bind(prefs.sms_enabled)
    .bind(prefs.email_frequency.as_str())
    .bind(&prefs.language)
    .bind(&prefs.timezone)
    .bind(prefs.marketing_emails)
    .bind(prefs.security_emails)
    .bind(prefs.created_at)
    .bind(prefs.updated_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Upsert a partial update
///
/// When no row exists, `base` overlaid with the patch is inserted. When a row
/// exists, only the fields present in the patch are overwritten.
pub async fn upsert_patch<'e, E>(
    executor: E,
    base: &Preference,
    patch: &PreferencePatch,
    now: DateTime<Utc>,
) -> ServiceResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let merged = base.clone().apply(patch);

    sqlx::query(
        "INSERT INTO preference (id, account_id, email_enabled, push_enabled, sms_enabled,
                                 email_frequency, language, timezone, marketing_emails,
                                 security_emails, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
         ON CONFLICT(account_id) DO UPDATE SET
             email_enabled = COALESCE(?12, preference.email_enabled),
             push_enabled = COALESCE(?13, preference.push_enabled),
             sms_enabled = COALESCE(?14, preference.sms_enabled),
             email_frequency = COALESCE(?15, preference.email_frequency),
             language = COALESCE(?16, preference.language),
             timezone = COALESCE(?17, preference.timezone),
             marketing_emails = COALESCE(?18, preference.marketing_emails),
             security_emails = COALESCE(?19, preference.security_emails),
             updated_at = ?11",
    )
    .bind(&merged.id)
    .bind(&merged.account_id)
    .bind(merged.email_enabled)
    .bind(merged.push_enabled)
    .bind(merged.sms_enabled)
    .bind(merged.email_frequency.as_str())
    .bind(&merged.language)
    .bind(&merged.timezone)
    .bind(merged.marketing_emails)
    .bind(merged.security_emails)
    .bind(now)
    .bind(patch.email_enabled)
    .bind(patch.push_enabled)
    .bind(patch.sms_enabled)
    .bind(patch.email_frequency.map(|f| f.as_str()))
    .bind(patch.language.as_deref())
    .bind(patch.timezone.as_deref())
    .bind(patch.marketing_emails)
    .bind(patch.security_emails)
    .execute(executor)
    .await?;

    Ok(())
}

/// Count preference rows of an account (at most one by construction)
pub async fn count_for_account<'e, E>(executor: E, account_id: &str) -> ServiceResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM preference WHERE account_id = ?1")
        .bind(account_id)
        .fetch_one(executor)
        .await?;

    Ok(total)
}
