//! Request authentication via timestamp and signature validation
//!
//! # Architecture
//!
//! - Every protected request names the caller (`x-erg-user`), the Unix epoch
//!   time in milliseconds (`x-erg-timestamp`) and a signature
//!   (`x-erg-signature`)
//! - Signature = hex SHA-256 of `"{user}:{timestamp}:{secret}"`
//! - Timestamp must be within 30 000 ms past and 1 000 ms future
//! - Shared secret stored in database settings table
//! - Can be disabled by setting shared_secret = 0
//!
//! This module contains only pure functions and database operations. The
//! axum middleware lives in the service crate.

use sha2::{Digest, Sha256};

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

/// Maximum age of a request timestamp
pub const MAX_PAST_MS: i64 = 30_000;

/// Maximum clock skew into the future
pub const MAX_FUTURE_MS: i64 = 1_000;

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone)]
pub enum ApiAuthError {
    /// Timestamp outside acceptable window
    InvalidTimestamp {
        timestamp: i64,
        now: i64,
        reason: String,
    },

    /// Signature does not match calculated value
    InvalidSignature { provided: String, calculated: String },

    /// Identity header missing
    MissingIdentity,

    /// Timestamp header missing or not an integer
    MissingTimestamp,

    /// Signature header missing
    MissingSignature,

    /// Database error loading shared secret
    DatabaseError(String),
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::InvalidTimestamp { reason, .. } => {
                write!(f, "Invalid timestamp: {}", reason)
            }
            ApiAuthError::InvalidSignature { .. } => write!(f, "Invalid signature"),
            ApiAuthError::MissingIdentity => write!(f, "Missing identity"),
            ApiAuthError::MissingTimestamp => write!(f, "Missing timestamp"),
            ApiAuthError::MissingSignature => write!(f, "Missing signature"),
            ApiAuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for ApiAuthError {}

// ========================================
// Shared Secret Management
// ========================================

/// Load shared secret from database settings
///
/// - Key: `api_shared_secret`
/// - Value: i64
/// - Special value 0: Disables signature checking
///
/// A missing secret is generated and stored.
#[cfg(feature = "sqlx")]
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let result: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = 'api_shared_secret'")
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((Some(value),)) => value
            .parse::<i64>()
            .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e))),
        _ => initialize_shared_secret(db).await,
    }
}

/// Generate and store a cryptographically random non-zero secret
#[cfg(feature = "sqlx")]
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let secret: i64 = loop {
        let val = rng.gen::<i64>();
        if val != 0 {
            break val;
        }
    };

    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('api_shared_secret', ?)")
        .bind(secret.to_string())
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    Ok(secret)
}

// ========================================
// Timestamp Validation
// ========================================

/// Validate a request timestamp against the current clock
///
/// # Examples
///
/// ```
/// use erg_common::api::auth::validate_timestamp;
///
/// let now = chrono::Utc::now().timestamp_millis();
///
/// assert!(validate_timestamp(now).is_ok());
/// assert!(validate_timestamp(now - 5_000).is_ok());
/// assert!(validate_timestamp(now - 60_000).is_err());
/// ```
pub fn validate_timestamp(timestamp: i64) -> Result<(), ApiAuthError> {
    validate_timestamp_at(timestamp, crate::time::now_millis())
}

/// Validate a request timestamp against an explicit `now`
pub fn validate_timestamp_at(timestamp: i64, now: i64) -> Result<(), ApiAuthError> {
    let diff = now - timestamp;

    if diff > MAX_PAST_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms past)", diff, MAX_PAST_MS),
        });
    }

    if diff < -MAX_FUTURE_MS {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}ms in future (max {}ms future)",
                diff.abs(),
                MAX_FUTURE_MS
            ),
        });
    }

    Ok(())
}

// ========================================
// Signature Calculation and Validation
// ========================================

/// Calculate the request signature
///
/// # Examples
///
/// ```
/// use erg_common::api::auth::calculate_signature;
///
/// let sig = calculate_signature("rower-1", 1730000000000, 123456789);
/// assert_eq!(sig.len(), 64); // SHA-256 is 64 hex chars
/// ```
pub fn calculate_signature(user_id: &str, timestamp: i64, shared_secret: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", user_id, timestamp, shared_secret).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate a provided signature
pub fn validate_signature(
    provided: &str,
    user_id: &str,
    timestamp: i64,
    shared_secret: i64,
) -> Result<(), ApiAuthError> {
    let calculated = calculate_signature(user_id, timestamp, shared_secret);

    if !provided.eq_ignore_ascii_case(&calculated) {
        return Err(ApiAuthError::InvalidSignature {
            provided: provided.to_string(),
            calculated,
        });
    }

    Ok(())
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_730_000_000_000;

    #[test]
    fn test_timestamp_window_boundaries() {
        assert!(validate_timestamp_at(NOW, NOW).is_ok());
        assert!(validate_timestamp_at(NOW - MAX_PAST_MS, NOW).is_ok());
        assert!(validate_timestamp_at(NOW - MAX_PAST_MS - 1, NOW).is_err());
        assert!(validate_timestamp_at(NOW + MAX_FUTURE_MS, NOW).is_ok());
        assert!(validate_timestamp_at(NOW + MAX_FUTURE_MS + 1, NOW).is_err());
    }

    #[test]
    fn test_signature_deterministic_and_secret_bound() {
        let a = calculate_signature("rower-1", NOW, 42);
        let b = calculate_signature("rower-1", NOW, 42);
        let c = calculate_signature("rower-1", NOW, 43);
        let d = calculate_signature("rower-2", NOW, 42);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_validate_signature() {
        let sig = calculate_signature("rower-1", NOW, 42);
        assert!(validate_signature(&sig, "rower-1", NOW, 42).is_ok());
        assert!(validate_signature(&sig.to_uppercase(), "rower-1", NOW, 42).is_ok());
        assert!(matches!(
            validate_signature(&sig, "rower-1", NOW + 1, 42),
            Err(ApiAuthError::InvalidSignature { .. })
        ));
    }

    #[tokio::test]
    async fn test_shared_secret_generated_once() {
        let pool = crate::db::init::init_memory_database().await.unwrap();

        let first = load_shared_secret(&pool).await.unwrap();
        let second = load_shared_secret(&pool).await.unwrap();

        assert_ne!(first, 0);
        assert_eq!(first, second);
    }
}
