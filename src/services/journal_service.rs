/// Rollback journal: append-only write-ahead log of mutating actions.
use sqlx::SqlitePool;

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::journal::{JournalAction, JournalEntry, JournalPayload};

/// Append an entry. Must be called BEFORE the mutating provider call so a
/// crash in between leaves a recoverable trace.
pub async fn record(
    pool: &SqlitePool,
    account_email: &str,
    action: JournalAction,
    payload: &JournalPayload,
) -> EngineResult<i64> {
    let json = serde_json::to_string(payload)
        .map_err(|e| EngineError::Other(anyhow::anyhow!("journal payload: {e}")))?;
    let result = sqlx::query(
        "INSERT INTO rollback_journal (email_account, action, payload, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(account_email)
    .bind(action.as_str())
    .bind(&json)
    .bind(db::now_epoch())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Complete the payload after the provider confirmed the action (e.g. the
/// draft id that only exists after creation).
pub async fn update_payload(
    pool: &SqlitePool,
    entry_id: i64,
    payload: &JournalPayload,
) -> EngineResult<()> {
    let json = serde_json::to_string(payload)
        .map_err(|e| EngineError::Other(anyhow::anyhow!("journal payload: {e}")))?;
    sqlx::query("UPDATE rollback_journal SET payload = ? WHERE id = ?")
        .bind(&json)
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Entries not yet undone, newest first — the replay order for rollback.
pub async fn pending_for_account(
    pool: &SqlitePool,
    account_email: &str,
) -> EngineResult<Vec<JournalEntry>> {
    Ok(sqlx::query_as::<_, JournalEntry>(
        "SELECT * FROM rollback_journal WHERE email_account = ? AND undone = 0 ORDER BY id DESC",
    )
    .bind(account_email)
    .fetch_all(pool)
    .await?)
}

/// Pending entry already covering a message, if any. A failed draft
/// attempt leaves its write-ahead entry behind; the retry reuses that
/// entry instead of appending another.
pub async fn pending_draft_entry(
    pool: &SqlitePool,
    account_email: &str,
    smtp_msg_id: &str,
) -> EngineResult<Option<JournalEntry>> {
    let pending = pending_for_account(pool, account_email).await?;
    Ok(pending.into_iter().find(|entry| {
        entry
            .parsed_payload()
            .map(|p| p.smtp_msg_id == smtp_msg_id)
            .unwrap_or(false)
    }))
}

pub async fn mark_undone(pool: &SqlitePool, entry_id: i64) -> EngineResult<()> {
    sqlx::query("UPDATE rollback_journal SET undone = 1 WHERE id = ?")
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_for_account(pool: &SqlitePool, account_email: &str) -> EngineResult<u64> {
    let result = sqlx::query("DELETE FROM rollback_journal WHERE email_account = ?")
        .bind(account_email)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
