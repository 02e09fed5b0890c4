use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::provider::imap;
use crate::services::account_service::{self, NewImapAccount};
use crate::services::rollback_service::{self, RevertReport};

use super::{ApiResult, AppState};

const DEFAULT_IMAP_SERVER: &str = "imap.gmail.com";
const DEFAULT_IMAP_PORT: u16 = 993;

#[derive(Debug, Deserialize)]
pub struct AddImapRequest {
    pub email: String,
    pub user_id: String,
    pub imap_pwd: String,
    /// Defaults to `email`.
    pub imap_login: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct AddImapResponse {
    pub email: String,
    pub message: String,
}

/// POST /add_imap_email. Credentials are verified with a live login
/// before anything is stored, so a typo'd password never creates a
/// half-dead account.
pub async fn add_imap_email(
    State(state): State<AppState>,
    Json(req): Json<AddImapRequest>,
) -> ApiResult<Json<AddImapResponse>> {
    let login = req.imap_login.clone().unwrap_or_else(|| req.email.clone());
    let server = req
        .imap_server
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAP_SERVER.to_string());
    let port = req.imap_port.unwrap_or(DEFAULT_IMAP_PORT);

    imap::check_imap_access(&server, port, &login, &req.imap_pwd).await?;

    let account = account_service::add_imap_account(
        &state.pool,
        NewImapAccount {
            email: req.email,
            user_id: req.user_id,
            imap_login: login,
            imap_pwd: req.imap_pwd,
            imap_server: server,
            imap_port: port as i64,
        },
    )
    .await?;

    Ok(Json(AddImapResponse {
        message: format!("imap account {} connected", account.email),
        email: account.email,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    pub email: String,
}

/// POST /revert_inbox. Undoes every journaled change, then removes the
/// account and all stored records of it.
pub async fn revert_inbox(
    State(state): State<AppState>,
    Json(req): Json<RevertRequest>,
) -> ApiResult<Json<RevertReport>> {
    let report = rollback_service::rollback_account(
        &state.pool,
        &state.deps.providers,
        state.cfg.lock_ttl_secs,
        &req.email,
    )
    .await?;
    Ok(Json(report))
}
