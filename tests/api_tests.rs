//! Integration tests for the API surface.
//!
//! Tests that need live PostgreSQL/Redis are marked ignored; the remainder
//! exercise routing, auth gating, taxonomy, and the security-header layer
//! against a state whose pool is lazily connected (never touched).

use axum::{routing::get, Router};
use axum_test::TestServer;
use gitmatch::{api, db::Cache, utils::Settings, AppState};

/// Build the application router the way the server binary does, but with a
/// lazily connecting pool so no database is required for routing tests.
fn create_test_app() -> Router {
    let settings = Settings::default();
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/gitmatch_test")
        .expect("lazy pool");
    let state = AppState::new(settings, pool, Cache::new(None));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes::create_router(state.clone()))
        .layer(axum::middleware::from_fn(api::middleware::security_headers))
        .with_state(state)
}

fn create_test_server() -> TestServer {
    TestServer::new(create_test_app()).expect("Failed to create test server")
}

#[tokio::test]
async fn test_health_check() {
    let server = create_test_server();

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let server = create_test_server();

    let response = server.get("/health").await;
    response.assert_status_ok();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
    assert_eq!(
        headers.get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
}

#[tokio::test]
async fn test_taxonomy_languages() {
    let server = create_test_server();

    let response = server.get("/taxonomy/languages").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let languages = body["languages"].as_array().unwrap();
    assert!(languages.iter().any(|l| l == "Python"));
    assert!(languages.iter().any(|l| l == "TypeScript"));
    assert!(languages.iter().any(|l| l == "Rust"));
}

#[tokio::test]
async fn test_taxonomy_stack_areas() {
    let server = create_test_server();

    let response = server.get("/taxonomy/stack-areas").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let areas = body["stack_areas"].as_array().unwrap();
    assert!(!areas.is_empty());

    let backend = areas.iter().find(|a| a["id"] == "backend").unwrap();
    assert_eq!(backend["label"], "Backend");
    assert!(!backend["description"].as_str().unwrap().is_empty());

    let data_eng = areas.iter().find(|a| a["id"] == "data_engineering").unwrap();
    assert_eq!(data_eng["label"], "Data Engineering");
}

#[tokio::test]
async fn test_protected_routes_require_auth() {
    let server = create_test_server();

    // Auth checks precede input validation, so these 401 without touching
    // the database.
    let response = server.get("/feed").await;
    response.assert_status_unauthorized();

    let response = server.get("/issues/I_123").await;
    response.assert_status_unauthorized();

    let response = server
        .post("/recommendations/events")
        .json(&serde_json::json!({
            "recommendation_batch_id": uuid::Uuid::new_v4().to_string(),
            "events": []
        }))
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector and Redis"]
async fn test_search_end_to_end() {
    // Full flow: seed issues, search, verify fused order and caching.
    // Run with: DATABASE_URL=... REDIS_URL=... cargo test -- --ignored
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn test_feed_trending_fallback_shape() {
    // A user with no combined vector receives is_personalized=false, a
    // non-null profile_cta, null similarity scores, and only open issues.
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_event_dedup_across_retries() {
    // Submitting the same event_id twice yields queued=1 then deduped=1 and
    // a queue length of one.
}
