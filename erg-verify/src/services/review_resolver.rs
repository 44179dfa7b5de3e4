//! Review resolution
//!
//! Administrators settle `pending_review` entries. Pending entries were
//! credited provisionally at submission, so:
//! - approve: status becomes verified; the difference between the final and
//!   the originally claimed distance is added to the user's total
//! - reject: status becomes rejected; the original claim and one upload are
//!   taken back off the user's totals
//!
//! The status change and the aggregate delta commit in one transaction. The
//! status change only applies to a row still in `pending_review`, so a second
//! resolution of the same entry changes nothing.

use chrono::Utc;
use erg_common::db::VerificationStatus;
use erg_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::db::{entries, users};

/// Administrator verdict on a pending entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl FromStr for ReviewAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            other => Err(Error::InvalidInput(format!(
                "Unknown review action '{}' (expected approve or reject)",
                other
            ))),
        }
    }
}

/// What a resolution did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub entry_id: Uuid,
    pub user_id: String,
    pub action: ReviewAction,
    pub status: VerificationStatus,
    pub original_meters: f64,
    pub final_meters: f64,
    pub was_adjusted: bool,
    /// Change applied to the user's total meters
    pub meters_delta: f64,
    /// Change applied to the user's upload count
    pub upload_delta: i64,
}

#[derive(Clone)]
pub struct ReviewResolver {
    db: SqlitePool,
}

impl ReviewResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Resolve one pending entry
    ///
    /// Fails with `NotFound` for an unknown entry and `InvalidInput` for an
    /// entry no longer pending or a non-positive adjustment. Nothing is
    /// written on failure.
    pub async fn resolve(
        &self,
        reviewer: &str,
        entry_id: Uuid,
        action: ReviewAction,
        adjusted_meters: Option<f64>,
        note: Option<&str>,
    ) -> Result<ResolutionOutcome> {
        if let Some(adjusted) = adjusted_meters {
            if !adjusted.is_finite() || adjusted <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "Adjusted meters must be a positive number, got {}",
                    adjusted
                )));
            }
        }

        let mut tx = self.db.begin().await?;

        let entry = entries::fetch_entry(&mut tx, entry_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Entry {} not found", entry_id)))?;

        if entry.verification_status != VerificationStatus::PendingReview {
            return Err(Error::InvalidInput(format!(
                "Entry {} is {}, not pending review",
                entry_id, entry.verification_status
            )));
        }

        let original = entry.original_meters;
        let (status, final_meters, meters_delta, upload_delta) = match action {
            ReviewAction::Approve => {
                let final_meters = adjusted_meters.unwrap_or(original);
                (
                    VerificationStatus::Verified,
                    final_meters,
                    final_meters - original,
                    0,
                )
            }
            ReviewAction::Reject => (VerificationStatus::Rejected, entry.meters, -original, -1),
        };
        let was_adjusted = action == ReviewAction::Approve && final_meters != original;

        let transitioned = entries::mark_reviewed(
            &mut tx,
            entry_id,
            status,
            final_meters,
            was_adjusted,
            reviewer,
            Utc::now(),
            note,
        )
        .await?;

        if !transitioned {
            // Resolved concurrently between the read and the update
            return Err(Error::InvalidInput(format!(
                "Entry {} is no longer pending review",
                entry_id
            )));
        }

        if meters_delta != 0.0 || upload_delta != 0 {
            users::apply_delta(&mut tx, &entry.user_id, meters_delta, upload_delta).await?;
        }

        tx.commit().await?;

        tracing::info!(
            entry_id = %entry_id,
            user_id = %entry.user_id,
            reviewer = %reviewer,
            status = %status,
            meters_delta,
            upload_delta,
            "Review resolved"
        );

        Ok(ResolutionOutcome {
            entry_id,
            user_id: entry.user_id,
            action,
            status,
            original_meters: original,
            final_meters,
            was_adjusted,
            meters_delta,
            upload_delta,
        })
    }
}
