//! Settings database operations
//!
//! Get/set accessors over the `settings` key-value table.

use erg_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Settings key holding the oracle API key
pub const ORACLE_API_KEY: &str = "oracle_api_key";

/// Get oracle API key from database
///
/// **Returns:** Some(key) if set and non-empty, None otherwise
pub async fn get_oracle_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, ORACLE_API_KEY)
        .await
        .map(|key| key.filter(|k| !k.trim().is_empty()))
}

/// Set oracle API key in database
pub async fn set_oracle_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, ORACLE_API_KEY, key).await
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use erg_common::db::init::init_memory_database;

    #[tokio::test]
    async fn test_oracle_key_not_set() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(get_oracle_api_key(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oracle_key_upsert() {
        let pool = init_memory_database().await.unwrap();

        set_oracle_api_key(&pool, "old_key".to_string()).await.unwrap();
        set_oracle_api_key(&pool, "new_key".to_string()).await.unwrap();

        assert_eq!(
            get_oracle_api_key(&pool).await.unwrap(),
            Some("new_key".to_string())
        );

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings WHERE key = ?")
            .bind(ORACLE_API_KEY)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "Should have exactly one entry after update");
    }

    #[tokio::test]
    async fn test_blank_oracle_key_reads_as_unset() {
        let pool = init_memory_database().await.unwrap();
        set_oracle_api_key(&pool, "   ".to_string()).await.unwrap();
        assert_eq!(get_oracle_api_key(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_setting_parse_error() {
        let pool = init_memory_database().await.unwrap();
        set_setting(&pool, "db_busy_timeout_ms", "soon").await.unwrap();

        assert!(matches!(
            get_setting::<u64>(&pool, "db_busy_timeout_ms").await,
            Err(Error::Config(_))
        ));
    }
}
