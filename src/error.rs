use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy for the sync and rollback engine.
///
/// Provider and AI failures are swallowed and recorded at the per-message
/// or per-account level inside a sync cycle; onboarding and rollback
/// endpoints surface these variants synchronously to the API caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Credentials invalid or token expired. Recoverable only by user
    /// re-authorization; repeated occurrence sets `disconnected`.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Transient provider/network failure; retried on the next cycle.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("draft generation failed: {0}")]
    Draft(String),

    /// Another invocation holds the account's advisory lock.
    #[error("account busy: {0}")]
    Busy(String),

    /// OAuth state unknown, expired or already consumed.
    #[error("oauth state unknown, expired or already used")]
    InvalidState,

    /// One or more journal entries could not be undone; the account stays
    /// disconnected so rollback can be retried.
    #[error("rollback incomplete: {remaining} journal entries still pending")]
    PartialRollback { remaining: i64 },

    #[error("email account not found: {0}")]
    AccountNotFound(String),

    #[error("email already exists in database: {0}")]
    DuplicateAccount(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Short machine-readable code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::Provider(_) => "provider_error",
            Self::Classification(_) => "classification_error",
            Self::Draft(_) => "draft_error",
            Self::Busy(_) => "busy",
            Self::InvalidState => "invalid_state",
            Self::PartialRollback { .. } => "partial_rollback",
            Self::AccountNotFound(_) => "account_not_found",
            Self::DuplicateAccount(_) => "duplicate_account",
            Self::Database(_) => "database_error",
            Self::Other(_) => "internal_error",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
