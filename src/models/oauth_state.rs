use serde::{Deserialize, Serialize};

/// Short-lived correlation token for an in-flight Outlook authorization.
/// Single-use; expired rows are purged by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutlookAuthState {
    pub state: String,
    pub user_id: String,
    pub created_at: i64,
}
