//! Duplicate image detection
//!
//! A fingerprint is global: a photo already submitted by anyone is a
//! duplicate for everyone. Store failures propagate; an unreachable store
//! never reads as "not a duplicate".

use erg_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Outcome of a duplicate lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateResult {
    /// No prior entry carries this fingerprint
    Unique,
    /// A prior entry already carries this fingerprint
    Duplicate { original_entry_id: Uuid },
}

impl DuplicateResult {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DuplicateResult::Duplicate { .. })
    }
}

/// Duplicate detector backed by the entry store
#[derive(Clone)]
pub struct DuplicateDetector {
    db: SqlitePool,
}

impl DuplicateDetector {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Check whether any prior entry carries `hash`
    pub async fn check(&self, hash: &str) -> Result<DuplicateResult> {
        tracing::debug!(hash = %hash, "Checking for duplicate image");

        match crate::db::entries::find_id_by_image_hash(&self.db, hash).await {
            Ok(None) => {
                tracing::debug!(hash = %hash, "No duplicate image found");
                Ok(DuplicateResult::Unique)
            }
            Ok(Some(original_entry_id)) => {
                tracing::info!(
                    hash = %hash,
                    original_entry_id = %original_entry_id,
                    "Duplicate image detected"
                );
                Ok(DuplicateResult::Duplicate { original_entry_id })
            }
            Err(e) => {
                tracing::error!(hash = %hash, error = %e, "Duplicate check failed");
                Err(e)
            }
        }
    }
}
