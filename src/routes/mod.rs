use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Json, Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::EngineError;
use crate::services::sync_service::SyncDeps;

pub mod accounts;
pub mod oauth;
pub mod sync;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub cfg: Arc<Config>,
    pub http: reqwest::Client,
    pub deps: SyncDeps,
}

/// `EngineError` carried to an HTTP response: a status from the error
/// class plus a `{error, code}` JSON body.
pub struct ApiError(pub EngineError);

impl<E: Into<EngineError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Auth(_)
            | EngineError::DuplicateAccount(_)
            | EngineError::InvalidState => StatusCode::BAD_REQUEST,
            EngineError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Busy(_) | EngineError::PartialRollback { .. } => StatusCode::CONFLICT,
            EngineError::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    if provided != Some(state.cfg.api_key.as_str()) {
        let body = Json(serde_json::json!({
            "error": "missing or invalid X-API-KEY header",
            "code": "unauthorized",
        }));
        return (StatusCode::UNAUTHORIZED, body).into_response();
    }
    next.run(req).await
}

async fn healthz(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/add_imap_email", post(accounts::add_imap_email))
        .route("/revert_inbox", post(accounts::revert_inbox))
        .route("/outlook_auth_step_1", get(oauth::auth_step_1))
        .route("/outlook_auth_step_2", get(oauth::auth_step_2))
        .route("/run_sync", post(sync::run_sync))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
