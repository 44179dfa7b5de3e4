//! Integration tests for erg-verify API endpoints

mod helpers;

use axum::http::StatusCode;
use erg_verify::services::VisionResult;
use helpers::*;
use serde_json::json;

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(ScriptedOracle::new(reading(1.0, 90, true))).await;

    let (status, json) = send(&app.router, get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "erg-verify");
    assert!(json["uptime_seconds"].is_u64());
    assert!(json["last_error"].is_null());
}

#[tokio::test]
async fn test_submission_requires_identity() {
    let app = create_test_app(ScriptedOracle::new(reading(5000.0, 90, true))).await;

    let (status, json) = send(
        &app.router,
        post_json("/api/entries", None, &entry_body(b"photo", 5000.0)),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_verified_then_duplicate() {
    let app = create_test_app(ScriptedOracle::new(reading(5000.0, 90, true))).await;
    let body = entry_body(b"pm5 photo H1", 5000.0);

    let (status, first) = send(&app.router, post_json("/api/entries", Some("alice"), &body)).await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert_eq!(first["status"], "verified");
    assert_eq!(first["requiresReview"], false);
    assert_eq!(first["flags"], json!([]));
    assert_eq!(first["confidence"], 90);
    assert_eq!(first["extractedValue"], 5000.0);
    assert_eq!(first["displayType"], "Concept2 PM5");
    assert_eq!(first["imageHash"].as_str().unwrap().len(), 64);

    let (status, second) = send(&app.router, post_json("/api/entries", Some("alice"), &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "rejected");
    assert_eq!(second["requiresReview"], false);
    assert!(second["reason"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("duplicate"));
    assert_eq!(second["imageHash"], first["imageHash"]);
    assert!(second["entryId"].is_null());

    let (status, me) = send(&app.router, get("/api/users/me", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["totalMeters"], 5000.0);
    assert_eq!(me["uploadCount"], 1);
}

#[tokio::test]
async fn test_duplicate_across_users() {
    let app = create_test_app(ScriptedOracle::new(reading(2000.0, 95, true))).await;
    let body = entry_body(b"shared screenshot", 2000.0);

    send(&app.router, post_json("/api/entries", Some("alice"), &body)).await;
    let (_, second) = send(&app.router, post_json("/api/entries", Some("bob"), &body)).await;

    assert_eq!(second["status"], "rejected");

    let (_, me) = send(&app.router, get("/api/users/me", Some("bob"))).await;
    assert_eq!(me["totalMeters"], 0.0);
    assert_eq!(me["uploadCount"], 0);
}

#[tokio::test]
async fn test_oracle_failure_goes_to_review() {
    let app = create_test_app(ScriptedOracle::new(VisionResult::failed("timeout"))).await;

    let (status, json) = send(
        &app.router,
        post_json("/api/entries", Some("alice"), &entry_body(b"img", 3000.0)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "pending_review");
    assert_eq!(json["requiresReview"], true);
    assert_eq!(json["confidence"], 0);
    assert_eq!(json["flags"], json!(["AI verification failed"]));

    // Provisionally credited while pending
    let (_, me) = send(&app.router, get("/api/users/me", Some("alice"))).await;
    assert_eq!(me["totalMeters"], 3000.0);
}

#[tokio::test]
async fn test_mismatch_suggests_correction() {
    let app = create_test_app(ScriptedOracle::new(reading(1000.0, 95, false))).await;

    let (_, json) = send(
        &app.router,
        post_json("/api/entries", Some("alice"), &entry_body(b"img", 1300.0)),
    )
    .await;

    assert_eq!(json["status"], "pending_review");
    assert_eq!(json["suggestedMeters"], 1000.0);
}

#[tokio::test]
async fn test_invalid_submissions() {
    let app = create_test_app(ScriptedOracle::new(reading(1.0, 90, true))).await;

    let cases = [
        json!({"image_base64": "", "claimed_meters": 1000}),
        json!({"image_base64": encode(b"img"), "claimed_meters": 0}),
        json!({"image_base64": encode(b"img"), "claimed_meters": -5}),
        json!({"image_base64": encode(b"img")}),
        json!({"image_base64": "%%%not-base64%%%", "claimed_meters": 1000}),
        json!({"image_base64": encode(b"img"), "mime_type": "text/plain", "claimed_meters": 1000}),
        json!({"claimed_meters": 1000}),
        json!({"image_base64": encode(b"img"), "claimed_meters": "1000"}),
        json!({"image_base64": 42, "claimed_meters": 1000}),
    ];

    for body in cases {
        let (status, json) = send(&app.router, post_json("/api/entries", Some("alice"), &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(json["error"]["code"], "INVALID_ARGUMENT", "{}", body);
        assert!(json["error"]["message"].is_string());
    }

    let (_, me) = send(&app.router, get("/api/users/me", Some("alice"))).await;
    assert_eq!(me["uploadCount"], 0);
}

#[tokio::test]
async fn test_unparseable_body_uses_error_envelope() {
    let app = create_test_app(ScriptedOracle::new(reading(1.0, 90, true))).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/entries")
        .header("content-type", "application/json")
        .header(erg_common::api::USER_HEADER, "alice")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_users_me_for_new_identity() {
    let app = create_test_app(ScriptedOracle::new(reading(1.0, 90, true))).await;

    let (status, json) = send(&app.router, get("/api/users/me", Some("newcomer"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["userId"], "newcomer");
    assert_eq!(json["totalMeters"], 0.0);
    assert_eq!(json["uploadCount"], 0);
}

#[tokio::test]
async fn test_admin_endpoints_require_admin() {
    let app = create_test_app(ScriptedOracle::new(reading(1.0, 90, true))).await;

    for request in [
        get("/api/reviews/pending", Some("alice")),
        get("/api/stats/verification", Some("alice")),
        post_json(
            &format!("/api/reviews/{}/resolve", uuid::Uuid::new_v4()),
            Some("alice"),
            &json!({"action": "approve"}),
        ),
        post_json(
            "/api/settings/oracle_api_key",
            Some("alice"),
            &json!({"api_key": "k"}),
        ),
    ] {
        let (status, json) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "PERMISSION_DENIED");
    }
}

#[tokio::test]
async fn test_verification_stats() {
    let oracle = ScriptedOracle::new(reading(2000.0, 90, true));
    let app = create_test_app(oracle.clone()).await;
    make_admin(&app.pool, "coach").await;

    send(&app.router, post_json("/api/entries", Some("alice"), &entry_body(b"a", 2000.0))).await;
    oracle.set_result(VisionResult::failed("down"));
    send(&app.router, post_json("/api/entries", Some("alice"), &entry_body(b"b", 2000.0))).await;
    let mut not_display = reading(2000.0, 90, true);
    not_display.is_plausible_display = false;
    oracle.set_result(not_display);
    send(&app.router, post_json("/api/entries", Some("alice"), &entry_body(b"c", 2000.0))).await;

    let (status, json) = send(&app.router, get("/api/stats/verification", Some("coach"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"verified": 1, "pending": 1, "rejected": 1}));
}

#[tokio::test]
async fn test_set_oracle_api_key() {
    let oracle = ScriptedOracle::new(reading(1.0, 90, true));
    let app = create_test_app(oracle.clone()).await;
    make_admin(&app.pool, "coach").await;

    let (status, json) = send(
        &app.router,
        post_json(
            "/api/settings/oracle_api_key",
            Some("coach"),
            &json!({"api_key": "  fresh-key  "}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(oracle.api_key.lock().unwrap().as_deref(), Some("fresh-key"));
    assert_eq!(
        erg_verify::db::settings::get_oracle_api_key(&app.pool)
            .await
            .unwrap()
            .as_deref(),
        Some("fresh-key")
    );

    let (status, _) = send(
        &app.router,
        post_json(
            "/api/settings/oracle_api_key",
            Some("coach"),
            &json!({"api_key": "   "}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signed_requests() {
    const SECRET: i64 = 1_234_567_890;
    let app =
        create_test_app_with_secret(ScriptedOracle::new(reading(1.0, 90, true)), SECRET).await;
    let now = erg_common::time::now_millis();

    let (status, _) = send(
        &app.router,
        sign(get("/api/users/me", None), "alice", now, SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app.router,
        sign(get("/api/users/me", None), "alice", now, SECRET + 1),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app.router,
        sign(get("/api/users/me", None), "alice", now - 120_000, SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Identity alone is not enough once a secret is set
    let (status, _) = send(&app.router, get("/api/users/me", Some("alice"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Health stays public
    let (status, _) = send(&app.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_store_failure_surfaces_as_unavailable() {
    let app = create_test_app(ScriptedOracle::new(reading(1.0, 90, true))).await;
    app.pool.close().await;

    let (status, json) = send(
        &app.router,
        post_json("/api/entries", Some("alice"), &entry_body(b"img", 1000.0)),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "UNAVAILABLE");

    let (status, health) = send(&app.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert!(health["last_error"].is_string());
}

#[tokio::test]
async fn test_health_recovers_after_store_answers() {
    let app = create_test_app(ScriptedOracle::new(reading(1.0, 90, true))).await;
    app.state
        .record_error(&erg_verify::ApiError::Unavailable(
            "store unreachable".to_string(),
        ))
        .await;

    let (_, health) = send(&app.router, get("/health", None)).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["last_error"], "Unavailable: store unreachable");

    let (status, _) = send(&app.router, get("/api/users/me", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, health) = send(&app.router, get("/health", None)).await;
    assert_eq!(health["status"], "ok");
    assert!(health["last_error"].is_null());
}
