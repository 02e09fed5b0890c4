/// Sync orchestrator: drives the discovery → dedup → classify → draft
/// state machine once per account per trigger.
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::ai::{DraftComposer, EmailClassifier, Label};
use crate::config::Config;
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::account::EmailAccount;
use crate::models::journal::{JournalAction, JournalPayload};
use crate::models::received_email::ReceivedEmail;
use crate::provider::{MessageRef, Providers};
use crate::services::{account_service, journal_service, ledger_service};

#[derive(Clone)]
pub struct SyncDeps {
    pub providers: Providers,
    pub classifier: Arc<dyn EmailClassifier>,
    pub composer: Arc<dyn DraftComposer>,
    pub cfg: Arc<Config>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct AccountStats {
    pub discovered: u32,
    pub classified: u32,
    pub drafted: u32,
    pub skipped: u32,
    pub errors: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct CycleReport {
    pub accounts: usize,
    pub synced: usize,
    pub locked: usize,
    pub failed: usize,
}

/// One full trigger invocation: every active account, processed under a
/// bounded worker pool. Per-account failures are recorded, never
/// propagated — the trigger itself always completes.
pub async fn run_cycle(pool: &SqlitePool, deps: &SyncDeps) -> EngineResult<CycleReport> {
    let accounts = account_service::list_active(pool).await?;
    let mut report = CycleReport {
        accounts: accounts.len(),
        ..Default::default()
    };

    let semaphore = Arc::new(Semaphore::new(deps.cfg.sync_concurrency.max(1)));
    let mut handles = Vec::with_capacity(accounts.len());
    for account in accounts {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let pool = pool.clone();
        let deps = deps.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let email = account.email.clone();
            let outcome = sync_account(&pool, &deps, &account).await;
            (email, outcome)
        }));
    }

    for handle in handles {
        match handle.await {
            Ok((email, Ok(Some(stats)))) => {
                info!(
                    email = %email,
                    discovered = stats.discovered,
                    classified = stats.classified,
                    drafted = stats.drafted,
                    "account sync completed"
                );
                report.synced += 1;
            }
            Ok((email, Ok(None))) => {
                info!(email = %email, "account locked by a concurrent cycle, skipped");
                report.locked += 1;
            }
            Ok((email, Err(e))) => {
                warn!(email = %email, error = %e, "account sync failed");
                report.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "sync worker panicked");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Sync one account. Returns `None` when another invocation holds the
/// advisory lock. Holds the lock for the whole cycle, releasing it on
/// every exit path; a crashed worker is handled by the lock TTL.
pub async fn sync_account(
    pool: &SqlitePool,
    deps: &SyncDeps,
    account: &EmailAccount,
) -> EngineResult<Option<AccountStats>> {
    if !try_acquire_lock(pool, &account.email, deps.cfg.lock_ttl_secs).await? {
        return Ok(None);
    }
    let result = sync_account_locked(pool, deps, account).await;
    release_lock(pool, &account.email).await?;
    result.map(Some)
}

async fn sync_account_locked(
    pool: &SqlitePool,
    deps: &SyncDeps,
    account: &EmailAccount,
) -> EngineResult<AccountStats> {
    let mut stats = AccountStats::default();

    let provider = deps.providers.for_account(account)?;
    let mut session = match provider.connect(account).await {
        Ok(s) => s,
        Err(e) => {
            if e.is_auth() {
                account_service::record_connect_failure(pool, account, &e.to_string()).await?;
            } else {
                // Transient outage: note it, do not count it toward the
                // auth-failure streak.
                account_service::mark_last_error(pool, account.id, &e.to_string()).await?;
            }
            return Err(e);
        }
    };
    account_service::reset_connect_failures(pool, account.id).await?;

    let batch = match session
        .list_new_messages(account.sync_watermark.as_deref())
        .await
    {
        Ok(b) => b,
        Err(e) => {
            session.close().await;
            return Err(e);
        }
    };

    for msg in &batch.messages {
        // Never process the account's own outbound mail.
        if msg.sender.eq_ignore_ascii_case(&account.email) {
            continue;
        }
        if ledger_service::record_discovered(pool, &account.email, msg).await? {
            stats.discovered += 1;
        }
    }

    let pending = ledger_service::pending_for_account(pool, &account.email).await?;
    let deadline = Instant::now() + Duration::from_secs(deps.cfg.sync_deadline_secs);

    for row in pending {
        if Instant::now() >= deadline {
            // Unfinished rows stay at their checkpoint and are retried
            // next cycle.
            warn!(email = %account.email, "sync deadline reached, stopping early");
            break;
        }
        match process_message(pool, deps, account, &mut *session, &row).await {
            Ok(outcome) => outcome.tally(&mut stats),
            Err(e) if e.is_auth() => {
                // Token died mid-batch; nothing else will succeed.
                session.close().await;
                return Err(e);
            }
            Err(e) => {
                warn!(email = %account.email, msg = %row.smtp_msg_id, error = %e, "message pipeline error");
                stats.errors += 1;
            }
        }
    }

    if let Some(watermark) = &batch.next_watermark {
        account_service::update_watermark(pool, account.id, watermark).await?;
    }
    session.close().await;
    Ok(stats)
}

enum MessageOutcome {
    Classified,
    Drafted,
    Skipped,
    Retried,
    NoOp,
}

impl MessageOutcome {
    fn tally(&self, stats: &mut AccountStats) {
        match self {
            Self::Classified => stats.classified += 1,
            Self::Drafted => {
                stats.classified += 1;
                stats.drafted += 1;
            }
            Self::Skipped => stats.skipped += 1,
            Self::Retried => stats.errors += 1,
            Self::NoOp => {}
        }
    }
}

/// Advance one ledger row through the pipeline. Each stage checkpoints to
/// the ledger before the next starts, so a crashed cycle resumes without
/// redoing completed stages.
async fn process_message(
    pool: &SqlitePool,
    deps: &SyncDeps,
    account: &EmailAccount,
    session: &mut dyn crate::provider::MailSession,
    row: &ReceivedEmail,
) -> EngineResult<MessageOutcome> {
    let msg = message_ref(row);
    let mut body: Option<String> = None;

    // Stage: Discovered → Classified.
    let label = if row.email_classified {
        match row.label.as_deref().and_then(Label::from_str) {
            Some(l) => l,
            None => return Ok(MessageOutcome::NoOp),
        }
    } else {
        let text = match fetch_body_cached(session, &msg, &mut body).await {
            Ok(t) => t,
            Err(e) => return retry_or_skip(pool, row, &e, deps.cfg.max_retries).await,
        };
        let label = match deps.classifier.classify(&msg.subject, &text).await {
            Ok(l) => l,
            Err(e) => return retry_or_skip(pool, row, &e, deps.cfg.max_retries).await,
        };
        ledger_service::mark_classified(pool, row.id, label).await?;
        label
    };

    if !label.needs_reply() || row.draft_created {
        return Ok(if row.email_classified {
            MessageOutcome::NoOp
        } else {
            MessageOutcome::Classified
        });
    }

    // Stage: DraftPending → DraftCreated.
    match session.has_existing_reply(&msg).await {
        Ok(true) => {
            // The user (or a crashed previous cycle) already replied;
            // nothing to create, nothing to journal.
            ledger_service::mark_draft_created(pool, row.id).await?;
            return Ok(MessageOutcome::NoOp);
        }
        Ok(false) => {}
        Err(e) if e.is_auth() => return Err(e),
        Err(e) => return retry_or_skip(pool, row, &e, deps.cfg.max_retries).await,
    }

    let text = match fetch_body_cached(session, &msg, &mut body).await {
        Ok(t) => t,
        Err(e) => return retry_or_skip(pool, row, &e, deps.cfg.max_retries).await,
    };
    let draft_body = match deps
        .composer
        .compose(&msg.subject, &text, &msg.sender, &account.email)
        .await
    {
        Ok(b) => b,
        Err(e) => return retry_or_skip(pool, row, &e, deps.cfg.max_retries).await,
    };

    // A failed attempt in an earlier cycle left its write-ahead entry
    // pending; reuse it so retries do not grow the journal.
    let existing =
        journal_service::pending_draft_entry(pool, &account.email, &msg.smtp_msg_id).await?;
    let (entry_id, prepared) = match existing
        .as_ref()
        .map(|e| (e.id, e.parsed_payload().and_then(|p| p.draft)))
    {
        Some((id, Some(draft))) => (id, draft),
        _ => {
            let prepared = match session.prepare_draft_ref(&msg).await {
                Ok(p) => p,
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => return retry_or_skip(pool, row, &e, deps.cfg.max_retries).await,
            };
            let payload = JournalPayload {
                smtp_msg_id: msg.smtp_msg_id.clone(),
                draft: Some(prepared.clone()),
            };
            let id = match existing {
                Some(entry) => {
                    journal_service::update_payload(pool, entry.id, &payload).await?;
                    entry.id
                }
                None => {
                    journal_service::record(pool, &account.email, JournalAction::CreateDraft, &payload)
                        .await?
                }
            };
            (id, prepared)
        }
    };

    match session.create_draft(&msg, &draft_body, &prepared).await {
        Ok(created) => {
            journal_service::update_payload(
                pool,
                entry_id,
                &JournalPayload {
                    smtp_msg_id: msg.smtp_msg_id.clone(),
                    draft: Some(created),
                },
            )
            .await?;
            ledger_service::mark_draft_created(pool, row.id).await?;
            Ok(if row.email_classified {
                // Classification happened in an earlier cycle.
                MessageOutcome::NoOp
            } else {
                MessageOutcome::Drafted
            })
        }
        Err(e) if e.is_auth() => Err(e),
        Err(e) => {
            // The journal entry stays pending: if the draft did land
            // before the failure, rollback still finds it through the
            // write-ahead reference.
            retry_or_skip(pool, row, &e, deps.cfg.max_retries).await
        }
    }
}

async fn fetch_body_cached(
    session: &mut dyn crate::provider::MailSession,
    msg: &MessageRef,
    cache: &mut Option<String>,
) -> EngineResult<String> {
    if let Some(body) = cache {
        return Ok(body.clone());
    }
    let body = session.fetch_body(msg).await?;
    *cache = Some(body.clone());
    Ok(body)
}

async fn retry_or_skip(
    pool: &SqlitePool,
    row: &ReceivedEmail,
    error: &EngineError,
    max_retries: i64,
) -> EngineResult<MessageOutcome> {
    let skipped = ledger_service::bump_retry(pool, row, &error.to_string(), max_retries).await?;
    Ok(if skipped {
        MessageOutcome::Skipped
    } else {
        MessageOutcome::Retried
    })
}

fn message_ref(row: &ReceivedEmail) -> MessageRef {
    MessageRef {
        smtp_msg_id: row.smtp_msg_id.clone(),
        provider_ref: row.provider_ref.clone(),
        sender: row.sender.clone(),
        subject: row.subject.clone(),
        conversation_id: row.conversation_id.clone(),
    }
}

/// Advisory per-account marker preventing two concurrent trigger
/// invocations from double-processing one account. The TTL clears locks
/// left behind by crashed workers.
pub async fn try_acquire_lock(
    pool: &SqlitePool,
    account_email: &str,
    ttl_secs: i64,
) -> EngineResult<bool> {
    let now = db::now_epoch();
    let result = sqlx::query(
        r#"
        INSERT INTO sync_locks (email_account, locked_at) VALUES (?, ?)
        ON CONFLICT(email_account) DO UPDATE SET locked_at = excluded.locked_at
        WHERE sync_locks.locked_at <= ?
        "#,
    )
    .bind(account_email)
    .bind(now)
    .bind(now - ttl_secs)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn release_lock(pool: &SqlitePool, account_email: &str) -> EngineResult<()> {
    sqlx::query("DELETE FROM sync_locks WHERE email_account = ?")
        .bind(account_email)
        .execute(pool)
        .await?;
    Ok(())
}
