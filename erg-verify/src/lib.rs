//! erg-verify library interface
//!
//! Exposes the verification pipeline and router for the binary and for
//! integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::services::submission::MAX_IMAGE_BYTES;
use crate::services::{ReviewResolver, SubmissionService, VisionOracle};

/// Largest accepted request body: a base64 image plus JSON framing
pub const MAX_REQUEST_BYTES: usize = MAX_IMAGE_BYTES / 3 * 4 + 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Request signing secret (0 disables signature checking)
    pub shared_secret: i64,
    /// External image-understanding service
    pub oracle: Arc<dyn VisionOracle>,
    pub submissions: SubmissionService,
    pub reviews: ReviewResolver,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last store failure surfaced to a caller
    pub last_error: Arc<RwLock<Option<String>>>,
    /// TOML file mirroring keys set through the API (None disables mirroring)
    pub toml_sync_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(db: SqlitePool, shared_secret: i64, oracle: Arc<dyn VisionOracle>) -> Self {
        Self {
            submissions: SubmissionService::new(db.clone(), Arc::clone(&oracle)),
            reviews: ReviewResolver::new(db.clone()),
            db,
            shared_secret,
            oracle,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            toml_sync_path: None,
        }
    }

    pub fn with_toml_sync_path(mut self, path: PathBuf) -> Self {
        self.toml_sync_path = Some(path);
        self
    }

    /// Remember server-side failures for `/health`
    pub async fn record_error(&self, err: &ApiError) {
        if matches!(err, ApiError::Unavailable(_) | ApiError::Internal(_)) {
            tracing::error!(code = err.code(), error = %err, "Request failed");
            *self.last_error.write().await = Some(err.to_string());
        }
    }

    /// Forget the last failure once the store answers again
    pub async fn clear_error(&self) {
        if self.last_error.read().await.is_some() {
            tracing::info!("Store reachable again, clearing last error");
            *self.last_error.write().await = None;
        }
    }

    /// Pass a handler result through, recording server-side failures
    /// and clearing them on success
    pub async fn track<T>(&self, result: ApiResult<T>) -> ApiResult<T> {
        match &result {
            Ok(_) => self.clear_error().await,
            Err(err) => self.record_error(err).await,
        }
        result
    }
}

/// Build application router
///
/// `/health` is public; everything under `/api` requires a signed identity.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(api::entry_routes())
        .merge(api::review_routes())
        .merge(api::stats_routes())
        .merge(api::settings_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            api::auth::auth_middleware,
        ));

    Router::new()
        .merge(api::health_routes())
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
