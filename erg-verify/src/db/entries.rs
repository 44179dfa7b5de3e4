//! Entry database operations
//!
//! Every aggregate change is an atomic delta executed on the same
//! connection (transaction) as the entry mutation it belongs to.

use chrono::{DateTime, Utc};
use erg_common::db::{Entry, VerificationStatus};
use erg_common::time::{from_db_string, to_db_string};
use erg_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::services::behavioral_analyzer::HistoryEntry;

const ENTRY_COLUMNS: &str = r#"
    e.id, e.user_id, e.meters, e.original_meters, e.date, e.image_hash,
    e.verification_status, e.requires_review, e.confidence, e.extracted_meters,
    e.display_type, e.flags, e.suggested_meters, e.reasoning, e.was_adjusted,
    e.reviewed_by, e.reviewed_at, e.review_note
"#;

/// Pending entry as shown to reviewers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    #[serde(flatten)]
    pub entry: Entry,
    pub display_name: String,
}

/// Entry counts per verification status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub verified: i64,
    pub pending: i64,
    pub rejected: i64,
}

/// Id of any entry with this fingerprint
pub async fn find_id_by_image_hash(db: &SqlitePool, image_hash: &str) -> Result<Option<Uuid>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM entries WHERE image_hash = ? LIMIT 1")
        .bind(image_hash)
        .fetch_optional(db)
        .await?;

    row.map(|(id,)| parse_id(&id)).transpose()
}

/// Most recent entries for a user, newest first
pub async fn recent_history(db: &SqlitePool, user_id: &str, limit: i64) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT date, meters
        FROM entries
        WHERE user_id = ?
        ORDER BY date DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(db)
    .await?;

    rows.iter()
        .map(|row| {
            let date: String = row.get("date");
            Ok(HistoryEntry {
                date: from_db_string(&date)?,
                meters: row.get::<Option<f64>, _>("meters").unwrap_or(0.0),
            })
        })
        .collect()
}

/// Insert an entry and, when its status counts, credit the user
///
/// Both writes commit together or not at all.
pub async fn insert_entry_with_credit(db: &SqlitePool, entry: &Entry) -> Result<()> {
    let mut tx = db.begin().await?;

    insert_entry(&mut tx, entry).await?;

    if entry.verification_status.is_counted() {
        crate::db::users::apply_delta(&mut tx, &entry.user_id, entry.meters, 1).await?;
    }

    tx.commit().await?;

    tracing::info!(
        entry_id = %entry.id,
        user_id = %entry.user_id,
        status = %entry.verification_status,
        meters = entry.meters,
        credited = entry.verification_status.is_counted(),
        "Entry persisted"
    );

    Ok(())
}

pub async fn insert_entry(conn: &mut SqliteConnection, entry: &Entry) -> Result<()> {
    let flags = serde_json::to_string(&entry.flags)
        .map_err(|e| Error::Internal(format!("Failed to serialize flags: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO entries (
            id, user_id, meters, original_meters, date, image_hash,
            verification_status, requires_review, confidence, extracted_meters,
            display_type, flags, suggested_meters, reasoning, was_adjusted,
            reviewed_by, reviewed_at, review_note
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(&entry.user_id)
    .bind(entry.meters)
    .bind(entry.original_meters)
    .bind(to_db_string(&entry.date))
    .bind(&entry.image_hash)
    .bind(entry.verification_status.as_str())
    .bind(entry.requires_review)
    .bind(entry.confidence as i64)
    .bind(entry.extracted_meters)
    .bind(&entry.display_type)
    .bind(flags)
    .bind(entry.suggested_meters)
    .bind(&entry.reasoning)
    .bind(entry.was_adjusted)
    .bind(&entry.reviewed_by)
    .bind(entry.reviewed_at.as_ref().map(to_db_string))
    .bind(&entry.review_note)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_entry(db: &SqlitePool, id: Uuid) -> Result<Option<Entry>> {
    let mut conn = db.acquire().await?;
    fetch_entry(&mut conn, id).await
}

/// Load an entry on an existing connection or transaction
pub async fn fetch_entry(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Entry>> {
    let query = format!("SELECT {} FROM entries e WHERE e.id = ?", ENTRY_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// Move a pending entry to its reviewed state
///
/// Returns false when the entry had already left `pending_review`.
#[allow(clippy::too_many_arguments)]
pub async fn mark_reviewed(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: VerificationStatus,
    final_meters: f64,
    was_adjusted: bool,
    reviewed_by: &str,
    reviewed_at: DateTime<Utc>,
    review_note: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE entries
        SET verification_status = ?,
            meters = ?,
            was_adjusted = ?,
            requires_review = 0,
            reviewed_by = ?,
            reviewed_at = ?,
            review_note = ?
        WHERE id = ? AND verification_status = 'pending_review'
        "#,
    )
    .bind(status.as_str())
    .bind(final_meters)
    .bind(was_adjusted)
    .bind(reviewed_by)
    .bind(to_db_string(&reviewed_at))
    .bind(review_note)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Most recent pending entries with submitter display names
pub async fn list_pending(db: &SqlitePool, limit: i64) -> Result<Vec<EntrySummary>> {
    let query = format!(
        r#"
        SELECT {}, COALESCE(u.display_name, e.user_id) AS display_name
        FROM entries e
        LEFT JOIN users u ON u.user_id = e.user_id
        WHERE e.verification_status = 'pending_review'
        ORDER BY e.date DESC
        LIMIT ?
        "#,
        ENTRY_COLUMNS
    );

    let rows = sqlx::query(&query).bind(limit).fetch_all(db).await?;

    rows.iter()
        .map(|row| {
            Ok(EntrySummary {
                entry: row_to_entry(row)?,
                display_name: row.get("display_name"),
            })
        })
        .collect()
}

pub async fn count_by_status(db: &SqlitePool) -> Result<StatusCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT verification_status, COUNT(*) FROM entries GROUP BY verification_status",
    )
    .fetch_all(db)
    .await?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        match status.parse::<VerificationStatus>()? {
            VerificationStatus::Verified => counts.verified = count,
            VerificationStatus::PendingReview => counts.pending = count,
            VerificationStatus::Rejected => counts.rejected = count,
        }
    }
    Ok(counts)
}

fn parse_id(id: &str) -> Result<Uuid> {
    erg_common::uuid_utils::parse(id)
        .map_err(|e| Error::Internal(format!("Invalid entry id '{}': {}", id, e)))
}

fn row_to_entry(row: &SqliteRow) -> Result<Entry> {
    let id: String = row.get("id");
    let date: String = row.get("date");
    let status: String = row.get("verification_status");
    let flags: String = row.get("flags");
    let reviewed_at: Option<String> = row.get("reviewed_at");

    Ok(Entry {
        id: parse_id(&id)?,
        user_id: row.get("user_id"),
        meters: row.get("meters"),
        original_meters: row.get("original_meters"),
        date: from_db_string(&date)?,
        image_hash: row.get("image_hash"),
        verification_status: status.parse()?,
        requires_review: row.get("requires_review"),
        confidence: row.get::<i64, _>("confidence").clamp(0, 100) as u8,
        extracted_meters: row.get("extracted_meters"),
        display_type: row.get("display_type"),
        flags: serde_json::from_str(&flags)
            .map_err(|e| Error::Internal(format!("Failed to deserialize flags: {}", e)))?,
        suggested_meters: row.get("suggested_meters"),
        reasoning: row.get("reasoning"),
        was_adjusted: row.get("was_adjusted"),
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: reviewed_at.as_deref().map(from_db_string).transpose()?,
        review_note: row.get("review_note"),
    })
}
