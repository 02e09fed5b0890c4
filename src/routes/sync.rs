use axum::extract::State;
use axum::Json;

use crate::services::sync_service::{self, CycleReport};

use super::{ApiResult, AppState};

/// POST /run_sync. Kicks one full cycle over all active accounts, same
/// code path as the scheduler tick. Accounts already locked by a running
/// cycle are reported, not double-processed.
pub async fn run_sync(State(state): State<AppState>) -> ApiResult<Json<CycleReport>> {
    let report = sync_service::run_cycle(&state.pool, &state.deps).await?;
    Ok(Json(report))
}
