/// OAuth state tracker for the Outlook onboarding flow.
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::account::EmailAccount;
use crate::provider::outlook;
use crate::services::account_service;

/// Step one: persist a fresh state token and hand back the consent URL
/// the user must be redirected to.
pub async fn begin_auth(pool: &SqlitePool, cfg: &Config, user_id: &str) -> EngineResult<(String, String)> {
    let state = uuid::Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO outlook_states (state, user_id, created_at) VALUES (?, ?, ?)")
        .bind(&state)
        .bind(user_id)
        .bind(db::now_epoch())
        .execute(pool)
        .await?;
    let url = outlook::consent_url(cfg, &state)?;
    Ok((url, state))
}

/// Atomically consume a state token. The DELETE is the single-use gate: a
/// concurrent second redemption deletes zero rows and deterministically
/// fails with `InvalidState`. Expired tokens are consumed but rejected.
pub async fn consume_state(
    pool: &SqlitePool,
    state: &str,
    ttl_secs: i64,
) -> EngineResult<String> {
    let row: Option<(String, i64)> = sqlx::query_as(
        "DELETE FROM outlook_states WHERE state = ? RETURNING user_id, created_at",
    )
    .bind(state)
    .fetch_optional(pool)
    .await?;

    let (user_id, created_at) = row.ok_or(EngineError::InvalidState)?;
    if db::now_epoch() - created_at > ttl_secs {
        return Err(EngineError::InvalidState);
    }
    Ok(user_id)
}

/// Step two: redeem the state, exchange the authorization code for
/// tokens, and onboard the mailbox the tokens belong to.
pub async fn complete_auth(
    pool: &SqlitePool,
    cfg: &Config,
    http: &reqwest::Client,
    state: &str,
    code: &str,
) -> EngineResult<EmailAccount> {
    let user_id = consume_state(pool, state, cfg.state_ttl_secs).await?;
    let (tokens, email) = outlook::exchange_code(http, cfg, code).await?;
    let account = account_service::add_outlook_account(pool, &email, &user_id, &tokens).await?;
    info!(email = %email, "outlook authorization completed");
    Ok(account)
}

/// Drop orphaned states past the TTL; they are never user-visible.
pub async fn purge_expired(pool: &SqlitePool, ttl_secs: i64) -> EngineResult<u64> {
    let cutoff = db::now_epoch() - ttl_secs;
    let result = sqlx::query("DELETE FROM outlook_states WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_tokens_are_single_use() {
        let pool = db::test_pool().await;
        let cfg = Config::default();
        let (url, state) = begin_auth(&pool, &cfg, "user-1").await.unwrap();
        assert!(url.contains(&state));

        assert_eq!(consume_state(&pool, &state, 600).await.unwrap(), "user-1");
        let second = consume_state(&pool, &state, 600).await.unwrap_err();
        assert!(matches!(second, EngineError::InvalidState));
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let pool = db::test_pool().await;
        let err = consume_state(&pool, "nope", 600).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState));
    }

    #[tokio::test]
    async fn expired_state_is_rejected_and_purged() {
        let pool = db::test_pool().await;
        let stale = db::now_epoch() - 3600;
        sqlx::query("INSERT INTO outlook_states (state, user_id, created_at) VALUES (?, ?, ?)")
            .bind("old-state")
            .bind("user-1")
            .bind(stale)
            .execute(&pool)
            .await
            .unwrap();

        let err = consume_state(&pool, "old-state", 600).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState));

        sqlx::query("INSERT INTO outlook_states (state, user_id, created_at) VALUES (?, ?, ?)")
            .bind("old-state-2")
            .bind("user-1")
            .bind(stale)
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(purge_expired(&pool, 600).await.unwrap(), 1);
    }
}
