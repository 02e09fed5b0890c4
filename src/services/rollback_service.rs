//! Full inbox revert: undo every journaled action, then purge the
//! account and all records of it.
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::journal::JournalAction;
use crate::provider::Providers;
use crate::services::{
    account_service, journal_service, ledger_service, sync_service,
};

#[derive(Debug, Default, Serialize)]
pub struct RevertReport {
    pub drafts_deleted: u64,
    pub messages_purged: u64,
}

/// Revert every change the engine made to this mailbox and delete the
/// account.
///
/// Journal entries are replayed newest-first and marked `undone` one by
/// one, so an interrupted revert resumes where it stopped without
/// repeating inverse actions. On any provider failure the account is left
/// disconnected with all of its rows intact, and the caller gets
/// [`EngineError::PartialRollback`].
pub async fn rollback_account(
    pool: &SqlitePool,
    providers: &Providers,
    cfg_lock_ttl_secs: i64,
    email: &str,
) -> EngineResult<RevertReport> {
    let account = account_service::get_by_email(pool, email).await?;

    if !sync_service::try_acquire_lock(pool, email, cfg_lock_ttl_secs).await? {
        return Err(EngineError::Busy(format!(
            "a sync cycle for {email} is in progress, retry shortly"
        )));
    }
    let result = rollback_locked(pool, providers, &account).await;
    sync_service::release_lock(pool, email).await?;
    result
}

async fn rollback_locked(
    pool: &SqlitePool,
    providers: &Providers,
    account: &crate::models::account::EmailAccount,
) -> EngineResult<RevertReport> {
    let entries = journal_service::pending_for_account(pool, &account.email).await?;
    let mut report = RevertReport::default();

    if !entries.is_empty() {
        let provider = providers.for_account(account)?;
        let mut session = match provider.connect(account).await {
            Ok(s) => s,
            Err(e) => {
                warn!(email = %account.email, error = %e, "rollback could not connect");
                account_service::mark_disconnected(pool, &account.email, &e.to_string()).await?;
                return Err(EngineError::PartialRollback {
                    remaining: entries.len() as i64,
                });
            }
        };

        let total = entries.len();
        for (idx, entry) in entries.iter().enumerate() {
            let outcome = undo_entry(&mut *session, entry).await;
            if let Err(e) = outcome {
                warn!(
                    email = %account.email,
                    entry = entry.id,
                    error = %e,
                    "rollback stopped, account left disconnected for retry"
                );
                session.close().await;
                account_service::mark_disconnected(pool, &account.email, &e.to_string()).await?;
                return Err(EngineError::PartialRollback {
                    remaining: (total - idx) as i64,
                });
            }
            journal_service::mark_undone(pool, entry.id).await?;
            report.drafts_deleted += 1;
        }
        session.close().await;
    }

    // Every inverse action succeeded; now the stored records can go.
    report.messages_purged = ledger_service::delete_for_account(pool, &account.email).await?;
    journal_service::delete_for_account(pool, &account.email).await?;
    account_service::delete_account(pool, &account.email).await?;
    info!(
        email = %account.email,
        drafts_deleted = report.drafts_deleted,
        messages_purged = report.messages_purged,
        "inbox reverted and account removed"
    );
    Ok(report)
}

async fn undo_entry(
    session: &mut dyn crate::provider::MailSession,
    entry: &crate::models::journal::JournalEntry,
) -> EngineResult<()> {
    match entry.parsed_action() {
        Some(JournalAction::CreateDraft) => {
            let payload = entry.parsed_payload().ok_or_else(|| {
                EngineError::Other(anyhow::anyhow!(
                    "journal entry {} has an unreadable payload",
                    entry.id
                ))
            })?;
            if let Some(draft) = payload.draft {
                session.delete_draft(&draft).await?;
            }
            Ok(())
        }
        None => Err(EngineError::Other(anyhow::anyhow!(
            "journal entry {} has unknown action {}",
            entry.id,
            entry.action
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Label;
    use crate::services::testutil::*;

    async fn synced_account_with_drafts(
        pool: &SqlitePool,
        hub: &StubHub,
        deps: &sync_service::SyncDeps,
    ) {
        hub.push_message("<m1>", "alice@x.com", "first ask", "please reply");
        hub.push_message("<m2>", "bob@x.com", "second ask", "me too");
        hub.classify_as("first ask", Label::ToRespond);
        hub.classify_as("second ask", Label::ToRespond);
        let account = account_service::get_by_email(pool, "me@x.com").await.unwrap();
        sync_service::sync_account(pool, deps, &account).await.unwrap().unwrap();
        assert_eq!(hub.draft_count(), 2);
    }

    #[tokio::test]
    async fn revert_deletes_drafts_and_purges_everything() {
        let (pool, deps, stub) = test_env().await;
        onboard_imap(&pool, "me@x.com").await;
        synced_account_with_drafts(&pool, &stub, &deps).await;

        let report = rollback_account(&pool, &deps.providers, 120, "me@x.com")
            .await
            .unwrap();
        assert_eq!(report.drafts_deleted, 2);
        assert_eq!(report.messages_purged, 2);
        assert_eq!(stub.draft_count(), 0);
        assert_eq!(stub.deleted_count(), 2);

        assert!(matches!(
            account_service::get_by_email(&pool, "me@x.com").await,
            Err(EngineError::AccountNotFound(_))
        ));
        assert!(ledger_service::all_for_account(&pool, "me@x.com").await.unwrap().is_empty());
        assert!(journal_service::pending_for_account(&pool, "me@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn interrupted_revert_resumes_without_repeating_deletes() {
        let (pool, deps, stub) = test_env().await;
        onboard_imap(&pool, "me@x.com").await;
        synced_account_with_drafts(&pool, &stub, &deps).await;
        // First delete succeeds, second blows up mid-replay.
        stub.fail_delete_on_call(2);

        let err = rollback_account(&pool, &deps.providers, 120, "me@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PartialRollback { remaining: 1 }));
        let account = account_service::get_by_email(&pool, "me@x.com").await.unwrap();
        assert!(account.disconnected);
        assert_eq!(stub.deleted_count(), 1);
        // The undone entry is checkpointed, the failed one is not.
        assert_eq!(
            journal_service::pending_for_account(&pool, "me@x.com").await.unwrap().len(),
            1
        );

        let report = rollback_account(&pool, &deps.providers, 120, "me@x.com")
            .await
            .unwrap();
        assert_eq!(report.drafts_deleted, 1);
        assert_eq!(stub.deleted_count(), 2);
        assert!(matches!(
            account_service::get_by_email(&pool, "me@x.com").await,
            Err(EngineError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn connect_failure_leaves_account_disconnected_but_intact() {
        let (pool, deps, stub) = test_env().await;
        onboard_imap(&pool, "me@x.com").await;
        synced_account_with_drafts(&pool, &stub, &deps).await;
        stub.fail_connects();

        let err = rollback_account(&pool, &deps.providers, 120, "me@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PartialRollback { remaining: 2 }));
        let account = account_service::get_by_email(&pool, "me@x.com").await.unwrap();
        assert!(account.disconnected);
        assert_eq!(
            ledger_service::all_for_account(&pool, "me@x.com").await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn revert_with_empty_journal_skips_the_provider() {
        let (pool, deps, stub) = test_env().await;
        onboard_imap(&pool, "me@x.com").await;
        // Connects would fail, but with nothing to undo none is attempted.
        stub.fail_connects();

        let report = rollback_account(&pool, &deps.providers, 120, "me@x.com")
            .await
            .unwrap();
        assert_eq!(report.drafts_deleted, 0);
        assert!(matches!(
            account_service::get_by_email(&pool, "me@x.com").await,
            Err(EngineError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_account_is_a_not_found() {
        let (pool, deps, _stub) = test_env().await;
        let err = rollback_account(&pool, &deps.providers, 120, "ghost@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn revert_refuses_while_a_sync_holds_the_lock() {
        let (pool, deps, _stub) = test_env().await;
        onboard_imap(&pool, "me@x.com").await;
        assert!(sync_service::try_acquire_lock(&pool, "me@x.com", 120).await.unwrap());

        let err = rollback_account(&pool, &deps.providers, 120, "me@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Busy(_)));
    }
}
