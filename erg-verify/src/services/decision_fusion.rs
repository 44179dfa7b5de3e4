//! Decision fusion
//!
//! Combines the duplicate check, behavioral analysis and oracle verdict into
//! one status. Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. Duplicate image → rejected, no review
//! 2. Oracle call failed → pending review
//! 3. Not a rowing machine display → rejected, flagged for audit
//! 4. Oracle reading disagrees with the claim by more than 10 % → pending
//!    review with the reading as suggested correction
//! 5. Confidence bands: ≥ 85 verified; 60..=84 verified only when behavioral
//!    analysis passed; below 60 pending review

use erg_common::db::VerificationStatus;
use serde::Serialize;

use super::behavioral_analyzer::BehavioralResult;
use super::duplicate_detector::DuplicateResult;
use super::vision_oracle::VisionResult;

/// Relative tolerance between the claim and the displayed reading
pub const MISMATCH_TOLERANCE: f64 = 0.10;

/// Confidence at or above which the oracle alone verifies an entry
pub const HIGH_CONFIDENCE: u8 = 85;

/// Confidence at or above which a clean behavioral history verifies
pub const MODERATE_CONFIDENCE: u8 = 60;

pub const DUPLICATE_REASON: &str = "Duplicate image detected";
pub const ORACLE_FAILED_REASON: &str = "AI verification failed";
pub const NOT_A_DISPLAY_REASON: &str = "Image does not appear to show a rowing machine display";

/// Outcome of the rule ladder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionVerdict {
    pub status: VerificationStatus,
    pub reason: String,
    pub requires_review: bool,
    pub behavioral_flags: Vec<String>,
    pub suggested_meters: Option<f64>,
}

impl FusionVerdict {
    fn new(status: VerificationStatus, reason: impl Into<String>, requires_review: bool) -> Self {
        Self {
            status,
            reason: reason.into(),
            requires_review,
            behavioral_flags: Vec::new(),
            suggested_meters: None,
        }
    }
}

/// True when the claim is further from the reading than the tolerance allows
pub fn exceeds_tolerance(claimed_meters: f64, extracted_meters: f64) -> bool {
    (claimed_meters - extracted_meters).abs() > MISMATCH_TOLERANCE * extracted_meters.abs()
}

/// Run the rule ladder
pub fn fuse(
    duplicate: &DuplicateResult,
    behavioral: &BehavioralResult,
    vision: &VisionResult,
    claimed_meters: f64,
) -> FusionVerdict {
    let mut verdict = ladder(duplicate, behavioral, vision, claimed_meters);
    verdict.behavioral_flags = behavioral.flags.clone();
    verdict
}

fn ladder(
    duplicate: &DuplicateResult,
    behavioral: &BehavioralResult,
    vision: &VisionResult,
    claimed_meters: f64,
) -> FusionVerdict {
    use VerificationStatus::*;

    if duplicate.is_duplicate() {
        return FusionVerdict::new(Rejected, DUPLICATE_REASON, false);
    }

    if !vision.success {
        return FusionVerdict::new(PendingReview, ORACLE_FAILED_REASON, true);
    }

    if !vision.is_plausible_display {
        return FusionVerdict::new(Rejected, NOT_A_DISPLAY_REASON, true);
    }

    if let Some(extracted) = vision.extracted_value {
        if !vision.matches_claimed && exceeds_tolerance(claimed_meters, extracted) {
            let mut verdict = FusionVerdict::new(
                PendingReview,
                format!(
                    "Claimed {}m but display shows {}m (difference {}m)",
                    claimed_meters,
                    extracted,
                    (claimed_meters - extracted).abs()
                ),
                true,
            );
            verdict.suggested_meters = Some(extracted);
            return verdict;
        }
    }

    let confidence = vision.confidence;
    if confidence >= HIGH_CONFIDENCE {
        FusionVerdict::new(
            Verified,
            format!("High confidence verification ({}%)", confidence),
            false,
        )
    } else if confidence >= MODERATE_CONFIDENCE {
        if behavioral.passed {
            FusionVerdict::new(
                Verified,
                format!("Moderate confidence ({}%) with normal activity", confidence),
                false,
            )
        } else {
            FusionVerdict::new(
                PendingReview,
                format!(
                    "Moderate confidence ({}%) with unusual activity",
                    confidence
                ),
                true,
            )
        }
    } else {
        FusionVerdict::new(
            PendingReview,
            format!("Low confidence ({}%)", confidence),
            true,
        )
    }
}

/// Behavioral flags followed by oracle concerns, without repeats
pub fn merge_flags(behavioral_flags: &[String], concerns: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(behavioral_flags.len() + concerns.len());
    for flag in behavioral_flags.iter().chain(concerns) {
        if !merged.contains(flag) {
            merged.push(flag.clone());
        }
    }
    merged
}
