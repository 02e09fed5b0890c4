use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use inboxpilot::config::Config;
use inboxpilot::{build_state, db, routes};

const API_KEY: &str = "test-key";

async fn test_app() -> axum::Router {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::run_migrations(&pool).await.expect("migrations");
    let cfg = Config {
        database_url: "sqlite::memory:".into(),
        api_key: API_KEY.into(),
        port: 0,
        outlook_client_id: "client-id".into(),
        outlook_client_secret: "client-secret".into(),
        outlook_redirect_uri: "http://localhost/outlook_auth_step_2".into(),
        openai_api_key: String::new(),
        openai_base_url: "http://localhost".into(),
        openai_model: "gpt-4o-mini".into(),
        limit_email_length: 6000,
        max_retries: 3,
        sync_concurrency: 2,
        sync_deadline_secs: 60,
        lock_ttl_secs: 120,
        state_ttl_secs: 600,
    };
    routes::router(build_state(pool, cfg))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_needs_no_api_key() {
    let app = test_app().await;
    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn protected_routes_reject_missing_api_key() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::post("/run_sync")
                .header("content-type", "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "unauthorized");
}

#[tokio::test]
async fn protected_routes_reject_wrong_api_key() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::post("/run_sync")
                .header("x-api-key", "nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn run_sync_reports_an_empty_cycle() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::post("/run_sync")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["accounts"], 0);
    assert_eq!(json["synced"], 0);
}

#[tokio::test]
async fn auth_step_2_with_unknown_state_is_a_bad_request() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::get("/outlook_auth_step_2?state=bogus&code=whatever")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "invalid_state");
}

#[tokio::test]
async fn auth_step_1_hands_out_a_consent_url() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::get("/outlook_auth_step_1?user_id=user-1")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let url = json["auth_url"].as_str().unwrap();
    assert!(url.starts_with("https://login.microsoftonline.com/"));
    assert!(url.contains(json["state"].as_str().unwrap()));
}

#[tokio::test]
async fn revert_unknown_account_is_a_not_found() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::post("/revert_inbox")
                .header("x-api-key", API_KEY)
                .header("content-type", "application/json")
                .body(Body::from(r#"{"email":"ghost@example.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "account_not_found");
}
