//! Shared HTTP API functionality
//!
//! Contains only pure functions, database operations and shared types; the
//! service crate wraps these with axum middleware.

pub mod auth;

pub use auth::{calculate_signature, validate_signature, validate_timestamp, ApiAuthError};

#[cfg(feature = "sqlx")]
pub use auth::{initialize_shared_secret, load_shared_secret};

/// Header carrying the caller identity
pub const USER_HEADER: &str = "x-erg-user";

/// Header carrying the request time (Unix epoch ms)
pub const TIMESTAMP_HEADER: &str = "x-erg-timestamp";

/// Header carrying the request signature
pub const SIGNATURE_HEADER: &str = "x-erg-signature";
