//! User aggregate database operations

use erg_common::db::UserAggregate;
use erg_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Create a zeroed aggregate for an identity seen for the first time
///
/// The display name defaults to the identity. Existing rows are untouched.
pub async fn ensure_user(db: &SqlitePool, user_id: &str) -> Result<()> {
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO users (user_id, display_name) VALUES (?, ?)",
    )
    .bind(user_id)
    .bind(user_id)
    .execute(db)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::info!(user_id = %user_id, "Created user aggregate");
    }

    Ok(())
}

pub async fn get_user(db: &SqlitePool, user_id: &str) -> Result<Option<UserAggregate>> {
    let row = sqlx::query(
        r#"
        SELECT user_id, display_name, is_admin, total_meters, upload_count
        FROM users
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(row.map(|row| UserAggregate {
        user_id: row.get("user_id"),
        display_name: row.get("display_name"),
        is_admin: row.get("is_admin"),
        total_meters: row.get("total_meters"),
        upload_count: row.get("upload_count"),
    }))
}

/// Administrator capability; unknown identities are not administrators
pub async fn is_admin(db: &SqlitePool, user_id: &str) -> Result<bool> {
    let admin: Option<bool> = sqlx::query_scalar("SELECT is_admin FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(db)
        .await?;

    Ok(admin.unwrap_or(false))
}

pub async fn set_admin(db: &SqlitePool, user_id: &str, admin: bool) -> Result<()> {
    ensure_user(db, user_id).await?;
    sqlx::query("UPDATE users SET is_admin = ? WHERE user_id = ?")
        .bind(admin)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Add signed deltas to a user's totals
///
/// Single statement against the stored values; totals never go below zero.
pub async fn apply_delta(
    conn: &mut SqliteConnection,
    user_id: &str,
    meters_delta: f64,
    upload_delta: i64,
) -> Result<()> {
    let updated = sqlx::query(
        r#"
        UPDATE users
        SET total_meters = MAX(0, total_meters + ?),
            upload_count = MAX(0, upload_count + ?)
        WHERE user_id = ?
        "#,
    )
    .bind(meters_delta)
    .bind(upload_delta)
    .bind(user_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated != 1 {
        return Err(Error::NotFound(format!("User {} not found", user_id)));
    }

    tracing::debug!(
        user_id = %user_id,
        meters_delta,
        upload_delta,
        "Applied aggregate delta"
    );

    Ok(())
}
