//! Scriptable in-memory provider and AI stubs shared by the service tests.
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::ai::{DraftComposer, EmailClassifier, Label};
use crate::config::Config;
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::account::EmailAccount;
use crate::provider::{Batch, DraftRef, MailProvider, MailSession, MessageRef, Providers};
use crate::services::account_service::{self, NewImapAccount};
use crate::services::sync_service::SyncDeps;

#[derive(Default)]
struct StubState {
    listing: Vec<MessageRef>,
    bodies: HashMap<String, String>,
    next_watermark: Option<String>,
    // classification script, keyed by subject
    labels: HashMap<String, Label>,
    failing_subjects: HashSet<String>,
    fail_all_classifies: bool,
    fail_compose_remaining: u32,
    fail_connect: bool,
    fail_creates: bool,
    delete_calls: u32,
    fail_delete_on_call: Option<u32>,
    existing_replies: HashSet<String>,
    drafts: Vec<DraftRef>,
    deleted: Vec<DraftRef>,
    classify_calls: u32,
}

/// Handle scripting the stub mailbox and AI from a test, shared with the
/// provider/session/classifier/composer instances it hands out.
#[derive(Clone, Default)]
pub struct StubHub(Arc<Mutex<StubState>>);

impl StubHub {
    pub fn push_message(&self, smtp_msg_id: &str, sender: &str, subject: &str, body: &str) {
        let mut s = self.0.lock().unwrap();
        let provider_ref = format!("ref-{}", s.listing.len() + 1);
        s.listing.push(MessageRef {
            smtp_msg_id: smtp_msg_id.to_string(),
            provider_ref,
            sender: sender.to_string(),
            subject: subject.to_string(),
            conversation_id: None,
        });
        s.bodies.insert(smtp_msg_id.to_string(), body.to_string());
    }

    pub fn classify_as(&self, subject: &str, label: Label) {
        self.0.lock().unwrap().labels.insert(subject.to_string(), label);
    }

    pub fn fail_all_classifies(&self) {
        self.0.lock().unwrap().fail_all_classifies = true;
    }

    pub fn fail_classifies_for(&self, subject: &str) {
        self.0.lock().unwrap().failing_subjects.insert(subject.to_string());
    }

    pub fn fail_next_compose(&self, n: u32) {
        self.0.lock().unwrap().fail_compose_remaining = n;
    }

    pub fn fail_connects(&self) {
        self.0.lock().unwrap().fail_connect = true;
    }

    pub fn heal_connects(&self) {
        self.0.lock().unwrap().fail_connect = false;
    }

    pub fn fail_creates(&self) {
        self.0.lock().unwrap().fail_creates = true;
    }

    /// Fail only the k-th `delete_draft` call (1-based, counted across the
    /// whole test).
    pub fn fail_delete_on_call(&self, k: u32) {
        self.0.lock().unwrap().fail_delete_on_call = Some(k);
    }

    pub fn set_existing_reply(&self, smtp_msg_id: &str) {
        self.0.lock().unwrap().existing_replies.insert(smtp_msg_id.to_string());
    }

    pub fn set_next_watermark(&self, watermark: &str) {
        self.0.lock().unwrap().next_watermark = Some(watermark.to_string());
    }

    pub fn draft_count(&self) -> usize {
        self.0.lock().unwrap().drafts.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.0.lock().unwrap().deleted.len()
    }

    pub fn classify_calls(&self) -> u32 {
        self.0.lock().unwrap().classify_calls
    }
}

struct StubProvider(StubHub);
struct StubSession(StubHub);

#[async_trait]
impl MailProvider for StubProvider {
    async fn connect(&self, _account: &EmailAccount) -> EngineResult<Box<dyn MailSession>> {
        if self.0 .0.lock().unwrap().fail_connect {
            return Err(EngineError::Auth("login rejected".into()));
        }
        Ok(Box::new(StubSession(self.0.clone())))
    }
}

#[async_trait]
impl MailSession for StubSession {
    async fn list_new_messages(&mut self, _since: Option<&str>) -> EngineResult<Batch> {
        let s = self.0 .0.lock().unwrap();
        Ok(Batch {
            messages: s.listing.clone(),
            next_watermark: s.next_watermark.clone(),
        })
    }

    async fn fetch_body(&mut self, msg: &MessageRef) -> EngineResult<String> {
        self.0
             .0
            .lock()
            .unwrap()
            .bodies
            .get(&msg.smtp_msg_id)
            .cloned()
            .ok_or_else(|| EngineError::Provider("message no longer on server".into()))
    }

    async fn prepare_draft_ref(&mut self, msg: &MessageRef) -> EngineResult<DraftRef> {
        Ok(DraftRef {
            draft_id: None,
            message_id: Some(format!("<draft-for-{}>", msg.provider_ref)),
            folder: Some("Drafts".into()),
            conversation_id: msg.conversation_id.clone(),
        })
    }

    async fn create_draft(
        &mut self,
        _msg: &MessageRef,
        _body: &str,
        prepared: &DraftRef,
    ) -> EngineResult<DraftRef> {
        let mut s = self.0 .0.lock().unwrap();
        if s.fail_creates {
            return Err(EngineError::Provider("append rejected".into()));
        }
        let created = DraftRef {
            draft_id: Some(format!("stub-{}", s.drafts.len() + 1)),
            ..prepared.clone()
        };
        s.drafts.push(created.clone());
        Ok(created)
    }

    async fn delete_draft(&mut self, draft: &DraftRef) -> EngineResult<()> {
        let mut s = self.0 .0.lock().unwrap();
        s.delete_calls += 1;
        if s.fail_delete_on_call == Some(s.delete_calls) {
            return Err(EngineError::Provider("transient delete failure".into()));
        }
        if let Some(pos) = s
            .drafts
            .iter()
            .position(|d| d.message_id == draft.message_id && d.message_id.is_some())
        {
            let removed = s.drafts.remove(pos);
            s.deleted.push(removed);
        }
        // Missing drafts are tolerated, same as the real adapters.
        Ok(())
    }

    async fn has_existing_reply(&mut self, msg: &MessageRef) -> EngineResult<bool> {
        Ok(self.0 .0.lock().unwrap().existing_replies.contains(&msg.smtp_msg_id))
    }

    async fn close(&mut self) {}
}

struct StubClassifier(StubHub);
struct StubComposer(StubHub);

#[async_trait]
impl EmailClassifier for StubClassifier {
    async fn classify(&self, subject: &str, _body: &str) -> EngineResult<Label> {
        let mut s = self.0 .0.lock().unwrap();
        s.classify_calls += 1;
        if s.fail_all_classifies || s.failing_subjects.contains(subject) {
            return Err(EngineError::Classification("model unavailable".into()));
        }
        Ok(s.labels.get(subject).copied().unwrap_or(Label::Fyi))
    }
}

#[async_trait]
impl DraftComposer for StubComposer {
    async fn compose(
        &self,
        _subject: &str,
        _body: &str,
        _sender: &str,
        _account_email: &str,
    ) -> EngineResult<String> {
        let mut s = self.0 .0.lock().unwrap();
        if s.fail_compose_remaining > 0 {
            s.fail_compose_remaining -= 1;
            return Err(EngineError::Draft("model unavailable".into()));
        }
        Ok("Thanks, I will take a look and get back to you.".into())
    }
}

pub async fn test_env() -> (SqlitePool, SyncDeps, StubHub) {
    let pool = db::test_pool().await;
    let hub = StubHub::default();
    let providers = Providers {
        imap: Arc::new(StubProvider(hub.clone())),
        outlook: Arc::new(StubProvider(hub.clone())),
    };
    let deps = SyncDeps {
        providers,
        classifier: Arc::new(StubClassifier(hub.clone())),
        composer: Arc::new(StubComposer(hub.clone())),
        cfg: Arc::new(Config::default()),
    };
    (pool, deps, hub)
}

pub async fn onboard_imap(pool: &SqlitePool, email: &str) -> EmailAccount {
    account_service::add_imap_account(
        pool,
        NewImapAccount {
            email: email.to_string(),
            user_id: "user-1".to_string(),
            imap_login: email.to_string(),
            imap_pwd: "secret".to_string(),
            imap_server: "imap.gmail.com".to_string(),
            imap_port: 993,
        },
    )
    .await
    .expect("onboard test account")
}
