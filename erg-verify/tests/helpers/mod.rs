//! Test Helper Utilities
//!
//! Shared utilities for driving the erg-verify router in tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::Engine;
use erg_common::api::{calculate_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER, USER_HEADER};
use erg_verify::services::{VisionOracle, VisionResult};
use erg_verify::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Router plus the pool behind it
pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub state: AppState,
}

/// Create test app with in-memory database and signature checking disabled
pub async fn create_test_app(oracle: Arc<dyn VisionOracle>) -> TestApp {
    create_test_app_with_secret(oracle, 0).await
}

pub async fn create_test_app_with_secret(oracle: Arc<dyn VisionOracle>, secret: i64) -> TestApp {
    let pool = erg_common::db::init_memory_database()
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::new(pool.clone(), secret, oracle);
    let router = build_router(state.clone());

    TestApp {
        router,
        pool,
        state,
    }
}

/// Grant administrator capability
pub async fn make_admin(pool: &SqlitePool, user_id: &str) {
    erg_verify::db::users::set_admin(pool, user_id, true)
        .await
        .expect("Failed to grant admin");
}

/// Oracle returning a scripted result, recording key swaps
pub struct ScriptedOracle {
    result: Mutex<VisionResult>,
    pub api_key: Mutex<Option<String>>,
}

impl ScriptedOracle {
    pub fn new(result: VisionResult) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(result),
            api_key: Mutex::new(None),
        })
    }

    pub fn set_result(&self, result: VisionResult) {
        *self.result.lock().unwrap() = result;
    }
}

#[async_trait]
impl VisionOracle for ScriptedOracle {
    async fn verify(&self, _image: &[u8], _mime_type: &str, _claimed: f64) -> VisionResult {
        self.result.lock().unwrap().clone()
    }

    async fn set_api_key(&self, key: String) {
        *self.api_key.lock().unwrap() = Some(key);
    }
}

/// Successful oracle reading
pub fn reading(extracted: f64, confidence: u8, matches_claimed: bool) -> VisionResult {
    VisionResult {
        success: true,
        is_plausible_display: true,
        extracted_value: Some(extracted),
        display_type: Some("Concept2 PM5".to_string()),
        matches_claimed,
        value_difference: None,
        confidence,
        concerns: Vec::new(),
        reasoning: "Display clearly readable.".to_string(),
        error: None,
    }
}

pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Submission body for `POST /api/entries`
pub fn entry_body(image: &[u8], meters: f64) -> Value {
    serde_json::json!({
        "image_base64": encode(image),
        "mime_type": "image/jpeg",
        "claimed_meters": meters,
    })
}

pub fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, user: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Add timestamp and signature headers
pub fn sign(mut request: Request<Body>, user: &str, timestamp: i64, secret: i64) -> Request<Body> {
    let headers = request.headers_mut();
    headers.insert(USER_HEADER, user.parse().unwrap());
    headers.insert(TIMESTAMP_HEADER, timestamp.to_string().parse().unwrap());
    headers.insert(
        SIGNATURE_HEADER,
        calculate_signature(user, timestamp, secret).parse().unwrap(),
    );
    request
}

/// Send one request, returning status and JSON body (Null when not JSON)
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
