//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// Verification state of a submitted entry
///
/// `Verified` and `Rejected` are final. `PendingReview` waits for an
/// administrator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    PendingReview,
    Rejected,
}

impl VerificationStatus {
    /// Storage / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::PendingReview => "pending_review",
            VerificationStatus::Rejected => "rejected",
        }
    }

    /// Whether an entry in this state counts toward the user's aggregate
    pub fn is_counted(&self) -> bool {
        !matches!(self, VerificationStatus::Rejected)
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(VerificationStatus::Verified),
            "pending_review" => Ok(VerificationStatus::PendingReview),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(crate::Error::Internal(format!(
                "Unknown verification status: {}",
                other
            ))),
        }
    }
}

/// One submitted exercise session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: Uuid,
    pub user_id: String,
    /// Accepted distance in meters (adjusted at most once, on approval)
    pub meters: f64,
    /// Claim as submitted, kept so an approval adjustment can be audited
    pub original_meters: f64,
    pub date: DateTime<Utc>,
    pub image_hash: String,
    pub verification_status: VerificationStatus,
    pub requires_review: bool,
    pub confidence: u8,
    pub extracted_meters: Option<f64>,
    pub display_type: Option<String>,
    pub flags: Vec<String>,
    pub suggested_meters: Option<f64>,
    pub reasoning: Option<String>,
    pub was_adjusted: bool,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
}

/// Running totals for one identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregate {
    pub user_id: String,
    pub display_name: String,
    pub is_admin: bool,
    pub total_meters: f64,
    pub upload_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            VerificationStatus::Verified,
            VerificationStatus::PendingReview,
            VerificationStatus::Rejected,
        ] {
            let parsed: VerificationStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("approved".parse::<VerificationStatus>().is_err());
    }

    #[test]
    fn test_only_rejected_is_uncounted() {
        assert!(VerificationStatus::Verified.is_counted());
        assert!(VerificationStatus::PendingReview.is_counted());
        assert!(!VerificationStatus::Rejected.is_counted());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&VerificationStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
    }
}
