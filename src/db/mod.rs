/// Database layer for the account coordinator
///
/// Manages the SQLite connection pool, embedded migrations, and typed
/// query functions for the account, preference and device-token tables.
/// Query functions take any executor so callers can run them against the
/// pool or inside a transaction.

pub mod accounts;
pub mod device_tokens;
pub mod models;
pub mod preferences;

use crate::error::{ServiceError, ServiceResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool backed by a file
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> ServiceResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ServiceError::Internal(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(if options.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// Create a single-connection in-memory pool
///
/// An in-memory SQLite database lives and dies with its connection, so the
/// pool is pinned to exactly one connection that is never recycled.
pub async fn create_memory_pool() -> ServiceResult<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> ServiceResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| ServiceError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Begin a transaction that holds the write lock from its first statement
///
/// A deferred transaction that reads before writing cannot upgrade its
/// WAL snapshot once another connection has committed, and fails with
/// SQLITE_BUSY without waiting. Taking the lock up front makes writers
/// queue on the busy timeout instead.
pub async fn begin_write(pool: &SqlitePool) -> ServiceResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> ServiceResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_migrates() {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        test_connection(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert!(tables.contains(&"account".to_string()));
        assert!(tables.contains(&"preference".to_string()));
        assert!(tables.contains(&"device_token".to_string()));
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.sqlite");

        let pool = create_pool(&path, DatabaseOptions::default()).await.unwrap();
        run_migrations(&pool).await.unwrap();

        assert!(path.exists());
    }
}
