//! Authentication middleware for erg-verify
//!
//! Protected requests carry `x-erg-user`, `x-erg-timestamp` (Unix ms) and
//! `x-erg-signature`. On success the resolved [`Identity`] is inserted into
//! request extensions for handlers to extract.
//!
//! A shared secret of 0 skips timestamp and signature checks; the identity
//! header is still required.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use erg_common::api::auth::{validate_signature, validate_timestamp, ApiAuthError};
use erg_common::api::{SIGNATURE_HEADER, TIMESTAMP_HEADER, USER_HEADER};
use tracing::warn;

use crate::{ApiError, ApiResult, AppState};

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub is_admin: bool,
}

impl Identity {
    /// Fail with `PermissionDenied` unless the caller is an administrator
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            warn!(user_id = %self.user_id, "Administrator capability required");
            Err(ApiError::PermissionDenied(
                "Administrator access required".to_string(),
            ))
        }
    }
}

/// Authentication middleware
///
/// Returns 401 when identity, timestamp or signature is missing or invalid.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = authenticate(request.headers(), state.shared_secret)?;

    let is_admin = match crate::db::users::is_admin(&state.db, &user_id).await {
        Ok(is_admin) => {
            state.clear_error().await;
            is_admin
        }
        Err(e) => {
            let err = ApiError::from(e);
            state.record_error(&err).await;
            return Err(err);
        }
    };

    request
        .extensions_mut()
        .insert(Identity { user_id, is_admin });

    Ok(next.run(request).await)
}

/// Validate auth headers and return the caller's identity
pub fn authenticate(headers: &HeaderMap, shared_secret: i64) -> ApiResult<String> {
    let user_id = header_str(headers, USER_HEADER)
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| unauthenticated(ApiAuthError::MissingIdentity))?
        .to_string();

    if shared_secret == 0 {
        return Ok(user_id);
    }

    let timestamp = header_str(headers, TIMESTAMP_HEADER)
        .and_then(|t| t.trim().parse::<i64>().ok())
        .ok_or_else(|| unauthenticated(ApiAuthError::MissingTimestamp))?;

    let signature = header_str(headers, SIGNATURE_HEADER)
        .ok_or_else(|| unauthenticated(ApiAuthError::MissingSignature))?;

    validate_timestamp(timestamp).map_err(unauthenticated)?;

    validate_signature(signature.trim(), &user_id, timestamp, shared_secret).map_err(|e| {
        if let ApiAuthError::InvalidSignature { provided, calculated } = &e {
            warn!(
                user_id = %user_id,
                "Signature validation failed: provided={}, calculated={}",
                provided, calculated
            );
        }
        unauthenticated(e)
    })?;

    Ok(user_id)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn unauthenticated(err: ApiAuthError) -> ApiError {
    ApiError::Unauthenticated(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use erg_common::api::auth::calculate_signature;

    const SECRET: i64 = 987_654_321;

    fn signed_headers(user: &str, timestamp: i64, secret: i64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(user).unwrap());
        headers.insert(
            TIMESTAMP_HEADER,
            HeaderValue::from_str(&timestamp.to_string()).unwrap(),
        );
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&calculate_signature(user, timestamp, secret)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_valid_signature_accepted() {
        let now = erg_common::time::now_millis();
        let headers = signed_headers("rower-1", now, SECRET);
        assert_eq!(authenticate(&headers, SECRET).unwrap(), "rower-1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = erg_common::time::now_millis();
        let headers = signed_headers("rower-1", now, SECRET + 1);
        assert!(matches!(
            authenticate(&headers, SECRET),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let stale = erg_common::time::now_millis() - 60_000;
        let headers = signed_headers("rower-1", stale, SECRET);
        let err = authenticate(&headers, SECRET).unwrap_err();
        assert!(err.to_string().contains("too old"), "{}", err);
    }

    #[test]
    fn test_missing_headers() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            authenticate(&headers, 0),
            Err(ApiError::Unauthenticated(_))
        ));

        headers.insert(USER_HEADER, HeaderValue::from_static("rower-1"));
        assert!(matches!(
            authenticate(&headers, SECRET),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_zero_secret_only_needs_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("rower-1"));
        assert_eq!(authenticate(&headers, 0).unwrap(), "rower-1");
    }

    #[test]
    fn test_require_admin() {
        let admin = Identity {
            user_id: "coach".into(),
            is_admin: true,
        };
        let rower = Identity {
            user_id: "rower".into(),
            is_admin: false,
        };
        assert!(admin.require_admin().is_ok());
        assert!(matches!(
            rower.require_admin(),
            Err(ApiError::PermissionDenied(_))
        ));
    }
}
