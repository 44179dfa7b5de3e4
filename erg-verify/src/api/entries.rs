//! Entry submission and aggregate endpoints
//!
//! POST /api/entries      submit a photo and claimed distance
//! GET  /api/users/me     caller's running totals

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Extension, Json, Router,
};
use base64::Engine;
use erg_common::db::UserAggregate;
use serde::Deserialize;

use crate::api::auth::Identity;
use crate::services::{SubmissionRequest, VerificationOutcome};
use crate::{ApiError, ApiResult, AppState};

/// Request payload for submitting an entry
#[derive(Debug, Deserialize)]
pub struct SubmitEntryRequest {
    /// Base64 image, optionally as a `data:<mime>;base64,` URL
    pub image_base64: Option<String>,
    pub mime_type: Option<String>,
    pub claimed_meters: Option<f64>,
}

/// POST /api/entries
///
/// **Request:** `{"image_base64": "...", "mime_type": "image/jpeg", "claimed_meters": 5000}`
/// **Response:** `VerificationOutcome`
///
/// **Errors:**
/// - 400: malformed body, image missing, not base64, too large, or claim
///   not positive
/// - 503: store unreachable (duplicate status unknown)
pub async fn submit_entry(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<SubmitEntryRequest>, JsonRejection>,
) -> ApiResult<Json<VerificationOutcome>> {
    let Json(payload) = payload?;
    let encoded = payload.image_base64.as_deref().unwrap_or_default();
    let (image, data_url_mime) = decode_image(encoded)?;

    let request = SubmissionRequest {
        user_id: Some(identity.user_id),
        image,
        mime_type: payload.mime_type.or(data_url_mime),
        claimed_meters: payload.claimed_meters,
    };

    state
        .track(state.submissions.submit(request).await)
        .await
        .map(Json)
}

/// GET /api/users/me
///
/// Identities with no submissions yet report zero totals.
pub async fn get_me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<UserAggregate>> {
    let user = state
        .track(
            crate::db::users::get_user(&state.db, &identity.user_id)
                .await
                .map_err(ApiError::from),
        )
        .await?;

    Ok(Json(user.unwrap_or_else(|| UserAggregate {
        display_name: identity.user_id.clone(),
        user_id: identity.user_id,
        is_admin: identity.is_admin,
        total_meters: 0.0,
        upload_count: 0,
    })))
}

/// Decode the image payload, returning bytes and any data-URL mime type
fn decode_image(encoded: &str) -> ApiResult<(Vec<u8>, Option<String>)> {
    let (mime, data) = match encoded.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest.split_once(',').ok_or_else(|| {
                ApiError::InvalidArgument("Malformed data URL".to_string())
            })?;
            let mime = header.trim_end_matches(";base64").to_string();
            (Some(mime).filter(|m| !m.is_empty()), data)
        }
        None => (None, encoded),
    };

    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| ApiError::InvalidArgument(format!("Image is not valid base64: {}", e)))?;

    Ok((bytes, mime))
}

/// Build entry routes
pub fn entry_routes() -> Router<AppState> {
    Router::new()
        .route("/api/entries", post(submit_entry))
        .route("/api/users/me", get(get_me))
}
