//! Submission orchestration
//!
//! validate → fingerprint → (duplicate check ∥ behavioral analysis ∥ oracle)
//! → fuse → persist.
//!
//! Duplicates are answered but never stored. Every other verdict becomes a
//! new entry; verified and pending entries are credited to the user in the
//! same transaction, rejected ones are kept uncredited for audit.

use erg_common::db::{Entry, VerificationStatus};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::db::{entries, users};
use crate::error::{ApiError, ApiResult};
use crate::services::behavioral_analyzer::BehavioralAnalyzer;
use crate::services::decision_fusion::{fuse, merge_flags};
use crate::services::duplicate_detector::DuplicateDetector;
use crate::services::hasher::fingerprint_blocking;
use crate::services::vision_oracle::VisionOracle;

/// Largest accepted image, in decoded bytes
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// One claim as received from a caller
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub user_id: Option<String>,
    pub image: Vec<u8>,
    pub mime_type: Option<String>,
    pub claimed_meters: Option<f64>,
}

/// Verdict returned to the submitter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    /// Absent for duplicates, which are not stored
    pub entry_id: Option<Uuid>,
    pub status: VerificationStatus,
    pub reason: String,
    pub requires_review: bool,
    pub image_hash: String,
    pub confidence: u8,
    pub extracted_value: Option<f64>,
    pub display_type: Option<String>,
    pub flags: Vec<String>,
    pub suggested_meters: Option<f64>,
    pub reasoning: Option<String>,
}

#[derive(Clone)]
pub struct SubmissionService {
    db: SqlitePool,
    duplicate_detector: DuplicateDetector,
    behavioral_analyzer: BehavioralAnalyzer,
    oracle: Arc<dyn VisionOracle>,
}

impl SubmissionService {
    pub fn new(db: SqlitePool, oracle: Arc<dyn VisionOracle>) -> Self {
        Self {
            duplicate_detector: DuplicateDetector::new(db.clone()),
            behavioral_analyzer: BehavioralAnalyzer::new(db.clone()),
            db,
            oracle,
        }
    }

    pub async fn submit(&self, request: SubmissionRequest) -> ApiResult<VerificationOutcome> {
        let started = Instant::now();

        let user_id = request
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ApiError::Unauthenticated("Sign in to submit entries".to_string()))?
            .to_string();

        if request.image.is_empty() {
            return Err(ApiError::InvalidArgument("Image is required".to_string()));
        }
        if request.image.len() > MAX_IMAGE_BYTES {
            return Err(ApiError::InvalidArgument(format!(
                "Image is {} bytes (max {} bytes)",
                request.image.len(),
                MAX_IMAGE_BYTES
            )));
        }

        let claimed_meters = match request.claimed_meters {
            Some(m) if m.is_finite() && m > 0.0 => m,
            Some(m) => {
                return Err(ApiError::InvalidArgument(format!(
                    "Claimed meters must be a positive number, got {}",
                    m
                )))
            }
            None => return Err(ApiError::InvalidArgument("Claimed meters is required".to_string())),
        };

        let mime_type = request
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        if !mime_type.starts_with("image/") {
            return Err(ApiError::InvalidArgument(format!(
                "Unsupported content type: {}",
                mime_type
            )));
        }

        users::ensure_user(&self.db, &user_id).await?;

        let image = Arc::new(request.image);
        let image_hash = fingerprint_blocking(Arc::clone(&image)).await?;

        tracing::debug!(
            user_id = %user_id,
            hash = %image_hash,
            claimed_meters,
            "Running verification checks"
        );

        let (duplicate, behavioral, vision) = tokio::join!(
            self.duplicate_detector.check(&image_hash),
            self.behavioral_analyzer.analyze(&user_id, claimed_meters),
            self.oracle.verify(&image, &mime_type, claimed_meters),
        );
        let duplicate = duplicate?;
        let behavioral = behavioral?;

        let verdict = fuse(&duplicate, &behavioral, &vision, claimed_meters);
        let flags = merge_flags(&verdict.behavioral_flags, &vision.concerns);
        let reasoning = Some(vision.reasoning.clone()).filter(|r| !r.is_empty());

        let entry_id = if duplicate.is_duplicate() {
            None
        } else {
            let entry = Entry {
                id: erg_common::uuid_utils::generate(),
                user_id: user_id.clone(),
                meters: claimed_meters,
                original_meters: claimed_meters,
                // Receive time; clients do not supply a date
                date: erg_common::time::now(),
                image_hash: image_hash.clone(),
                verification_status: verdict.status,
                requires_review: verdict.requires_review,
                confidence: vision.confidence,
                extracted_meters: vision.extracted_value,
                display_type: vision.display_type.clone(),
                flags: flags.clone(),
                suggested_meters: verdict.suggested_meters,
                reasoning: reasoning.clone(),
                was_adjusted: false,
                reviewed_by: None,
                reviewed_at: None,
                review_note: None,
            };
            entries::insert_entry_with_credit(&self.db, &entry).await?;
            Some(entry.id)
        };

        tracing::info!(
            user_id = %user_id,
            hash = %image_hash,
            status = %verdict.status,
            requires_review = verdict.requires_review,
            confidence = vision.confidence,
            flags = flags.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Submission verified"
        );

        Ok(VerificationOutcome {
            entry_id,
            status: verdict.status,
            reason: verdict.reason,
            requires_review: verdict.requires_review,
            image_hash,
            confidence: vision.confidence,
            extracted_value: vision.extracted_value,
            display_type: vision.display_type,
            flags,
            suggested_meters: verdict.suggested_meters,
            reasoning,
        })
    }
}
