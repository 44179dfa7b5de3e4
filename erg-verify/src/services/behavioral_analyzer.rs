//! Behavioral Analyzer Service
//!
//! Scores a claim against the submitter's recent history using three fixed
//! heuristics:
//! - Daily volume: 10 or more entries already dated today
//! - Physical plausibility: a single session over 50 000 m
//! - Deviation: more than 200 % above the mean of recent entries (needs at
//!   least 5 entries; skipped when the mean is zero)
//!
//! All heuristics are always evaluated and their flags accumulate. The
//! analyzer never rejects on its own; flags feed decision fusion.

use chrono::{DateTime, Local, Utc};
use erg_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

/// Number of most-recent entries fetched per analysis
pub const HISTORY_LIMIT: i64 = 50;

/// Entries per calendar day at which the volume flag fires
pub const DAILY_UPLOAD_LIMIT: usize = 10;

/// Single-session ceiling in meters
pub const MAX_SESSION_METERS: f64 = 50_000.0;

/// History size required before the deviation check runs
pub const MIN_HISTORY_FOR_DEVIATION: usize = 5;

/// Percentage increase over the mean above which the deviation flag fires
pub const MAX_INCREASE_PERCENT: f64 = 200.0;

/// One prior entry as seen by the analyzer
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub date: DateTime<Utc>,
    pub meters: f64,
}

/// Analyzer verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BehavioralResult {
    /// True iff `flags` is empty
    pub passed: bool,
    /// Human-readable anomaly descriptions, in heuristic order
    pub flags: Vec<String>,
}

impl BehavioralResult {
    fn from_flags(flags: Vec<String>) -> Self {
        Self {
            passed: flags.is_empty(),
            flags,
        }
    }
}

/// Behavioral analyzer backed by the entry store
#[derive(Clone)]
pub struct BehavioralAnalyzer {
    db: SqlitePool,
}

impl BehavioralAnalyzer {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Analyze a claim against the user's recent history
    ///
    /// Store failures propagate to the caller.
    pub async fn analyze(&self, user_id: &str, claimed_meters: f64) -> Result<BehavioralResult> {
        let history =
            crate::db::entries::recent_history(&self.db, user_id, HISTORY_LIMIT).await?;

        let result = evaluate(&history, claimed_meters, Local::now());

        tracing::debug!(
            user_id = %user_id,
            history_len = history.len(),
            passed = result.passed,
            flags = result.flags.len(),
            "Behavioral analysis complete"
        );

        Ok(result)
    }
}

/// Evaluate the heuristics over already-fetched history
///
/// `history` is expected most-recent-first and at most `HISTORY_LIMIT` long.
pub fn evaluate(
    history: &[HistoryEntry],
    claimed_meters: f64,
    now: DateTime<Local>,
) -> BehavioralResult {
    let mut flags = Vec::new();

    let today = now.date_naive();
    let today_count = history
        .iter()
        .filter(|e| e.date.with_timezone(&Local).date_naive() == today)
        .count();
    if today_count >= DAILY_UPLOAD_LIMIT {
        flags.push(format!(
            "High upload frequency: {} uploads today",
            today_count
        ));
    }

    if claimed_meters > MAX_SESSION_METERS {
        flags.push(format!(
            "Unusually high distance: {}m in a single session (max plausible {}m)",
            claimed_meters, MAX_SESSION_METERS
        ));
    }

    if history.len() >= MIN_HISTORY_FOR_DEVIATION {
        let mean = history.iter().map(|e| e.meters).sum::<f64>() / history.len() as f64;

        // Zero mean leaves the ratio undefined; no flag
        if mean > 0.0 {
            let increase = (claimed_meters - mean) / mean * 100.0;
            if increase > MAX_INCREASE_PERCENT {
                flags.push(format!(
                    "Distance {:.0}% above recent average of {:.0}m",
                    increase, mean
                ));
            }
        }
    }

    BehavioralResult::from_flags(flags)
}
