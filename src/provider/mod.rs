//! Uniform capability surface over mail providers.
//!
//! The orchestrator and rollback engine only depend on [`MailProvider`]
//! and [`MailSession`]; the IMAP and Graph implementations live in the
//! sibling modules.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::account::{EmailAccount, EmailProvider};

pub mod imap;
pub mod outlook;

/// A message discovered on the provider, identified by a provider-stable
/// message id (`smtp_msg_id`) plus the provider-native handle needed to
/// fetch or reply to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub smtp_msg_id: String,
    pub provider_ref: String,
    pub sender: String,
    pub subject: String,
    pub conversation_id: Option<String>,
}

/// Handle to a created draft, with enough redundancy that the inverse
/// operation still works when the process crashed between the journal
/// write and the provider confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRef {
    /// Graph draft message id (Outlook), known only after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    /// RFC822 Message-ID assigned to the draft (IMAP), chosen before the
    /// APPEND so the write-ahead journal entry can already carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// IMAP folder the draft was appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Graph conversation id, fallback key for deleting untracked drafts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// New-message listing plus the successor watermark to persist once the
/// cycle completes. The listing may overlap the previous one; the dedup
/// ledger makes the overlap harmless.
#[derive(Debug, Clone)]
pub struct Batch {
    pub messages: Vec<MessageRef>,
    pub next_watermark: Option<String>,
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Validate stored credentials and open a session. IMAP performs a
    /// live login; Outlook checks the cached token and silently refreshes
    /// it when possible.
    async fn connect(&self, account: &EmailAccount) -> EngineResult<Box<dyn MailSession>>;
}

#[async_trait]
pub trait MailSession: Send {
    /// List messages discovered since the watermark. Implementations
    /// re-scan a small trailing window rather than promise strict
    /// ordering.
    async fn list_new_messages(&mut self, since: Option<&str>) -> EngineResult<Batch>;

    /// Plain-text body of a message (HTML downconverted).
    async fn fetch_body(&mut self, msg: &MessageRef) -> EngineResult<String>;

    /// Allocate the draft reference before the mutating call so it can be
    /// journaled write-ahead.
    async fn prepare_draft_ref(&mut self, msg: &MessageRef) -> EngineResult<DraftRef>;

    /// Create a reply draft. Returns the completed reference.
    async fn create_draft(
        &mut self,
        msg: &MessageRef,
        body: &str,
        prepared: &DraftRef,
    ) -> EngineResult<DraftRef>;

    /// Delete a draft. A draft that is already gone is not an error.
    async fn delete_draft(&mut self, draft: &DraftRef) -> EngineResult<()>;

    /// Whether the mailbox already holds a draft or sent reply referencing
    /// this message. Used to re-derive crashed draft attempts instead of
    /// duplicating them.
    async fn has_existing_reply(&mut self, msg: &MessageRef) -> EngineResult<bool>;

    /// Best-effort logout.
    async fn close(&mut self);
}

/// Concrete adapters, one per supported protocol. The orchestrator picks
/// by `email_provider`; tests swap in stubs.
#[derive(Clone)]
pub struct Providers {
    pub imap: Arc<dyn MailProvider>,
    pub outlook: Arc<dyn MailProvider>,
}

impl Providers {
    pub fn for_account(&self, account: &EmailAccount) -> EngineResult<Arc<dyn MailProvider>> {
        match account.provider() {
            Some(EmailProvider::Imap) => Ok(self.imap.clone()),
            Some(EmailProvider::Outlook) => Ok(self.outlook.clone()),
            None => Err(EngineError::Provider(format!(
                "email provider {} not supported",
                account.email_provider
            ))),
        }
    }
}
