//! Database initialization
//!
//! Creates the database on first run and brings the schema up to date on
//! every start. All statements are idempotent.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Default SQLite busy timeout when the setting is absent
const DEFAULT_BUSY_TIMEOUT_MS: i64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer; submissions read
    // history while other submissions write
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    configure_pool(&pool).await?;
    create_schema(&pool).await?;

    // Apply configurable busy timeout from settings
    let timeout_ms: i64 = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'db_busy_timeout_ms'",
    )
    .fetch_optional(&pool)
    .await?
    .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);

    let pragma_sql = format!("PRAGMA busy_timeout = {}", timeout_ms);
    sqlx::query(&pragma_sql).execute(&pool).await?;
    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Initialize a private in-memory database
///
/// Single connection: every SQLite `:memory:` connection is its own
/// database, so the pool must never open a second one.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    configure_pool(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

async fn configure_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query(&format!("PRAGMA busy_timeout = {}", DEFAULT_BUSY_TIMEOUT_MS))
        .execute(pool)
        .await?;
    Ok(())
}

/// Create all tables, indexes and default settings
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    create_entries_table(pool).await?;
    init_default_settings(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            total_meters REAL NOT NULL DEFAULT 0 CHECK (total_meters >= 0),
            upload_count INTEGER NOT NULL DEFAULT 0 CHECK (upload_count >= 0),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id),
            meters REAL NOT NULL CHECK (meters > 0),
            original_meters REAL NOT NULL,
            date TEXT NOT NULL,
            image_hash TEXT NOT NULL,
            verification_status TEXT NOT NULL
                CHECK (verification_status IN ('verified', 'pending_review', 'rejected')),
            requires_review INTEGER NOT NULL DEFAULT 0,
            confidence INTEGER NOT NULL DEFAULT 0,
            extracted_meters REAL,
            display_type TEXT,
            flags TEXT NOT NULL DEFAULT '[]',
            suggested_meters REAL,
            reasoning TEXT,
            was_adjusted INTEGER NOT NULL DEFAULT 0,
            reviewed_by TEXT,
            reviewed_at TEXT,
            review_note TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_image_hash ON entries(image_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_user_date ON entries(user_id, date)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_status_date ON entries(verification_status, date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist. NULL values are reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "db_busy_timeout_ms", "5000").await?;
    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE handles concurrent initialization
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let reset = sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default_value)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    if reset > 0 {
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_has_schema() {
        let pool = init_memory_database().await.unwrap();

        for table in ["settings", "users", "entries"] {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(exists, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_schema_creation_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        create_schema(&pool).await.unwrap();
        create_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_null_setting_reset_to_default() {
        let pool = init_memory_database().await.unwrap();
        sqlx::query("UPDATE settings SET value = NULL WHERE key = 'db_busy_timeout_ms'")
            .execute(&pool)
            .await
            .unwrap();

        init_default_settings(&pool).await.unwrap();

        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'db_busy_timeout_ms'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(value.as_deref(), Some("5000"));
    }

    #[tokio::test]
    async fn test_negative_aggregate_rejected_by_schema() {
        let pool = init_memory_database().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO users (user_id, display_name, total_meters) VALUES ('u', 'u', -1)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
