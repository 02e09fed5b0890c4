use serde::{Deserialize, Serialize};

/// One processed message in the dedup ledger.
///
/// The per-stage booleans act as idempotency checkpoints: a retried cycle
/// resumes at the first stage whose flag is still unset. `draft_created`
/// implies `email_classified`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReceivedEmail {
    pub id: i64,
    pub smtp_msg_id: String,
    pub sender: String,
    pub subject: String,
    pub email_account: String,
    /// Provider-native handle (IMAP UID, Graph message id) so retries do
    /// not depend on the message being re-listed.
    pub provider_ref: String,
    pub conversation_id: Option<String>,
    pub email_classified: bool,
    pub label: Option<String>,
    pub draft_created: bool,
    pub skipped: bool,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
}
