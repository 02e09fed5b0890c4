use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::services::oauth_service;

use super::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct AuthStep1Params {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct AuthStep1Response {
    pub auth_url: String,
    pub state: String,
}

/// GET /outlook_auth_step_1. Issues a single-use state token and the
/// Microsoft consent URL to send the user to.
pub async fn auth_step_1(
    State(state): State<AppState>,
    Query(params): Query<AuthStep1Params>,
) -> ApiResult<Json<AuthStep1Response>> {
    let (auth_url, token) =
        oauth_service::begin_auth(&state.pool, &state.cfg, &params.user_id).await?;
    Ok(Json(AuthStep1Response {
        auth_url,
        state: token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AuthStep2Params {
    pub state: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct AuthStep2Response {
    pub email: String,
    pub message: String,
}

/// GET /outlook_auth_step_2. Consent redirect target: redeems the state
/// token, exchanges the code and onboards the mailbox.
pub async fn auth_step_2(
    State(state): State<AppState>,
    Query(params): Query<AuthStep2Params>,
) -> ApiResult<Json<AuthStep2Response>> {
    let account = oauth_service::complete_auth(
        &state.pool,
        &state.cfg,
        &state.http,
        &params.state,
        &params.code,
    )
    .await?;
    Ok(Json(AuthStep2Response {
        message: format!("outlook account {} connected", account.email),
        email: account.email,
    }))
}
