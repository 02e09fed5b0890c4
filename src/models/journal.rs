use serde::{Deserialize, Serialize};

use crate::provider::DraftRef;

/// Mutating actions the engine performs on a mailbox. Classification has
/// no external side effect, so only draft creation needs an inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    CreateDraft,
}

impl JournalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDraft => "create_draft",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create_draft" => Some(Self::CreateDraft),
            _ => None,
        }
    }
}

/// JSON payload stored alongside each journal entry. Written ahead of the
/// provider call with everything known at that point; the draft reference
/// is completed after the provider confirms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalPayload {
    pub smtp_msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<DraftRef>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JournalEntry {
    pub id: i64,
    pub email_account: String,
    pub action: String,
    pub payload: String,
    pub undone: bool,
    pub created_at: i64,
}

impl JournalEntry {
    pub fn parsed_action(&self) -> Option<JournalAction> {
        JournalAction::from_str(&self.action)
    }

    pub fn parsed_payload(&self) -> Option<JournalPayload> {
        serde_json::from_str(&self.payload).ok()
    }
}
