/// Dedup ledger: one row per (message, account), with per-stage flags
/// acting as idempotency checkpoints.
use sqlx::SqlitePool;

use crate::ai::Label;
use crate::db;
use crate::error::EngineResult;
use crate::models::received_email::ReceivedEmail;
use crate::provider::MessageRef;

/// Record a discovered message. Returns false when the (message, account)
/// pair was already in the ledger, which is how duplicate listings across
/// overlapping polls are absorbed.
pub async fn record_discovered(
    pool: &SqlitePool,
    account_email: &str,
    msg: &MessageRef,
) -> EngineResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO received_emails
            (smtp_msg_id, sender, subject, email_account, provider_ref, conversation_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&msg.smtp_msg_id)
    .bind(&msg.sender)
    .bind(&msg.subject)
    .bind(account_email)
    .bind(&msg.provider_ref)
    .bind(&msg.conversation_id)
    .bind(db::now_epoch())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Rows still owed pipeline work: not skipped, and either unclassified or
/// classified as needing a reply without a draft yet.
pub async fn pending_for_account(
    pool: &SqlitePool,
    account_email: &str,
) -> EngineResult<Vec<ReceivedEmail>> {
    Ok(sqlx::query_as::<_, ReceivedEmail>(
        r#"
        SELECT * FROM received_emails
        WHERE email_account = ?
          AND skipped = 0
          AND (email_classified = 0 OR (label = ? AND draft_created = 0))
        ORDER BY id
        "#,
    )
    .bind(account_email)
    .bind(Label::ToRespond.as_str())
    .fetch_all(pool)
    .await?)
}

pub async fn mark_classified(pool: &SqlitePool, row_id: i64, label: Label) -> EngineResult<()> {
    sqlx::query(
        "UPDATE received_emails SET email_classified = 1, label = ?, last_error = NULL WHERE id = ?",
    )
    .bind(label.as_str())
    .bind(row_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_draft_created(pool: &SqlitePool, row_id: i64) -> EngineResult<()> {
    // draft_created implies email_classified; guard the invariant here
    // rather than trusting every caller.
    sqlx::query(
        "UPDATE received_emails SET draft_created = 1, email_classified = 1, last_error = NULL WHERE id = ?",
    )
    .bind(row_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Count one failed classify/draft attempt. Past `max_retries` the row is
/// parked as skipped so a poisoned message stops consuming cycles.
pub async fn bump_retry(
    pool: &SqlitePool,
    row: &ReceivedEmail,
    error: &str,
    max_retries: i64,
) -> EngineResult<bool> {
    let retries = row.retry_count + 1;
    let skipped = retries >= max_retries;
    sqlx::query(
        "UPDATE received_emails SET retry_count = ?, skipped = ?, last_error = ? WHERE id = ?",
    )
    .bind(retries)
    .bind(skipped)
    .bind(error)
    .bind(row.id)
    .execute(pool)
    .await?;
    Ok(skipped)
}

pub async fn delete_for_account(pool: &SqlitePool, account_email: &str) -> EngineResult<u64> {
    let result = sqlx::query("DELETE FROM received_emails WHERE email_account = ?")
        .bind(account_email)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
pub async fn all_for_account(
    pool: &SqlitePool,
    account_email: &str,
) -> EngineResult<Vec<ReceivedEmail>> {
    Ok(sqlx::query_as::<_, ReceivedEmail>(
        "SELECT * FROM received_emails WHERE email_account = ? ORDER BY id",
    )
    .bind(account_email)
    .fetch_all(pool)
    .await?)
}
