//! Verification statistics endpoint

use axum::{extract::State, routing::get, Extension, Json, Router};

use crate::api::auth::Identity;
use crate::db::entries::StatusCounts;
use crate::{ApiError, ApiResult, AppState};

/// GET /api/stats/verification
///
/// Entry counts by status; administrators only.
pub async fn verification_stats(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<StatusCounts>> {
    identity.require_admin()?;

    state
        .track(
            crate::db::entries::count_by_status(&state.db)
                .await
                .map_err(ApiError::from),
        )
        .await
        .map(Json)
}

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/api/stats/verification", get(verification_stats))
}
