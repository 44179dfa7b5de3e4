//! Review queue endpoints (administrators only)
//!
//! GET  /api/reviews/pending              up to 50 most recent pending entries
//! POST /api/reviews/:entry_id/resolve    approve or reject one entry

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::auth::Identity;
use crate::db::entries::{self, EntrySummary};
use crate::services::{ResolutionOutcome, ReviewAction};
use crate::{ApiError, ApiResult, AppState};

/// Size of the pending review queue page
pub const PENDING_LIMIT: i64 = 50;

/// Request payload for resolving a review
#[derive(Debug, Deserialize)]
pub struct ResolveReviewRequest {
    /// "approve" or "reject"
    pub action: String,
    pub adjusted_meters: Option<f64>,
    pub note: Option<String>,
}

/// GET /api/reviews/pending
pub async fn list_pending_reviews(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<EntrySummary>>> {
    identity.require_admin()?;

    state
        .track(
            entries::list_pending(&state.db, PENDING_LIMIT)
                .await
                .map_err(ApiError::from),
        )
        .await
        .map(Json)
}

/// POST /api/reviews/:entry_id/resolve
///
/// **Request:** `{"action": "approve", "adjusted_meters": 2500, "note": "..."}`
///
/// **Errors:**
/// - 400: malformed body, unknown action, non-positive adjustment, entry not pending
/// - 403: caller is not an administrator
/// - 404: unknown or unparseable entry id
pub async fn resolve_review(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(entry_id): Path<String>,
    payload: Result<Json<ResolveReviewRequest>, JsonRejection>,
) -> ApiResult<Json<ResolutionOutcome>> {
    identity.require_admin()?;

    // Ids are opaque; one that cannot parse names no entry
    let entry_id = erg_common::uuid_utils::parse(&entry_id)
        .map_err(|_| ApiError::NotFound(format!("Entry {} not found", entry_id)))?;
    let Json(payload) = payload?;
    let action: ReviewAction = payload.action.parse()?;
    let note = payload.note.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let result = state
        .reviews
        .resolve(
            &identity.user_id,
            entry_id,
            action,
            payload.adjusted_meters,
            note,
        )
        .await
        .map_err(ApiError::from);

    state.track(result).await.map(Json)
}

/// Build review routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/api/reviews/pending", get(list_pending_reviews))
        .route("/api/reviews/:entry_id/resolve", post(resolve_review))
}
