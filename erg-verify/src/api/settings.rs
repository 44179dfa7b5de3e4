//! Settings API endpoint
//!
//! Provides POST /api/settings/oracle_api_key for runtime key rotation

use crate::api::auth::Identity;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Request payload for setting the oracle API key
#[derive(Debug, Deserialize)]
pub struct SetApiKeyRequest {
    pub api_key: String,
}

/// Response payload for API key configuration
#[derive(Debug, Serialize)]
pub struct SetApiKeyResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/settings/oracle_api_key handler
///
/// **Request:** `{"api_key": "your-key"}`
///
/// **Behavior:**
/// 1. Validate key (non-empty, non-whitespace)
/// 2. Write to database (authoritative)
/// 3. Swap the key into the running oracle client
/// 4. Sync to TOML (best-effort backup)
///
/// **Errors:**
/// - 400: malformed body, empty or whitespace-only key
/// - 403: caller is not an administrator
/// - 503: database write failure
pub async fn set_oracle_api_key(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<SetApiKeyRequest>, JsonRejection>,
) -> ApiResult<Json<SetApiKeyResponse>> {
    identity.require_admin()?;
    let Json(payload) = payload?;

    let key = payload.api_key.trim().to_string();
    if !crate::config::is_valid_key(&key) {
        return Err(ApiError::InvalidArgument(
            "API key cannot be empty or whitespace-only".to_string(),
        ));
    }

    state
        .track(
            crate::db::settings::set_oracle_api_key(&state.db, key.clone())
                .await
                .map_err(ApiError::from),
        )
        .await?;

    state.oracle.set_api_key(key.clone()).await;

    info!(user_id = %identity.user_id, "Oracle API key configured via API");

    if let Some(toml_path) = state.toml_sync_path.clone() {
        tokio::task::spawn_blocking(move || {
            crate::config::sync_oracle_key_to_toml(&key, &toml_path)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("TOML sync task failed: {}", e)))?;
    }

    Ok(Json(SetApiKeyResponse {
        success: true,
        message: "Oracle API key configured successfully".to_string(),
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/api/settings/oracle_api_key", post(set_oracle_api_key))
}
