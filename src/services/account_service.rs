/// Credential store: onboarding and connectivity health of email accounts.
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::models::account::{EmailAccount, EmailProvider, OAuthTokens};

/// Consecutive connect failures before an account is suspended.
pub const DISCONNECT_THRESHOLD: i64 = 3;

pub struct NewImapAccount {
    pub email: String,
    pub user_id: String,
    pub imap_login: String,
    pub imap_pwd: String,
    pub imap_server: String,
    pub imap_port: i64,
}

pub async fn add_imap_account(
    pool: &SqlitePool,
    new: NewImapAccount,
) -> EngineResult<EmailAccount> {
    ensure_not_onboarded(pool, &new.email).await?;

    let encoded_pwd = EmailAccount::encode_secret(&new.imap_pwd);
    sqlx::query(
        r#"
        INSERT INTO email_accounts
            (email, user_id, email_provider, imap_login, imap_pwd, imap_server, imap_port, created_at)
        VALUES (?, ?, 'imap', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&new.email)
    .bind(&new.user_id)
    .bind(&new.imap_login)
    .bind(&encoded_pwd)
    .bind(&new.imap_server)
    .bind(new.imap_port)
    .bind(db::now_epoch())
    .execute(pool)
    .await?;

    info!(email = %new.email, "imap account onboarded");
    get_by_email(pool, &new.email).await
}

pub async fn add_outlook_account(
    pool: &SqlitePool,
    email: &str,
    user_id: &str,
    tokens: &OAuthTokens,
) -> EngineResult<EmailAccount> {
    ensure_not_onboarded(pool, email).await?;

    let blob = tokens.encode().map_err(EngineError::Other)?;
    sqlx::query(
        r#"
        INSERT INTO email_accounts (email, user_id, email_provider, pwd, created_at)
        VALUES (?, ?, 'outlook', ?, ?)
        "#,
    )
    .bind(email)
    .bind(user_id)
    .bind(&blob)
    .bind(db::now_epoch())
    .execute(pool)
    .await?;

    info!(email = %email, "outlook account onboarded");
    get_by_email(pool, email).await
}

async fn ensure_not_onboarded(pool: &SqlitePool, email: &str) -> EngineResult<()> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM email_accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        return Err(EngineError::DuplicateAccount(email.to_string()));
    }
    Ok(())
}

pub async fn get_by_email(pool: &SqlitePool, email: &str) -> EngineResult<EmailAccount> {
    sqlx::query_as::<_, EmailAccount>("SELECT * FROM email_accounts WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| EngineError::AccountNotFound(email.to_string()))
}

/// Accounts eligible for polling. Disconnected accounts stay out until
/// explicitly re-authorized.
pub async fn list_active(pool: &SqlitePool) -> EngineResult<Vec<EmailAccount>> {
    Ok(sqlx::query_as::<_, EmailAccount>(
        "SELECT * FROM email_accounts WHERE disconnected = 0 ORDER BY id",
    )
    .fetch_all(pool)
    .await?)
}

/// Record one failed connect. After `DISCONNECT_THRESHOLD` consecutive
/// failures the account is suspended; a later successful connect does not
/// clear the flag, only re-onboarding does.
pub async fn record_connect_failure(
    pool: &SqlitePool,
    account: &EmailAccount,
    error: &str,
) -> EngineResult<bool> {
    let failures = account.connect_failures + 1;
    let disconnect = failures >= DISCONNECT_THRESHOLD;
    let message = friendly_error(error);

    sqlx::query(
        "UPDATE email_accounts SET connect_failures = ?, disconnected = ?, last_error = ? WHERE id = ?",
    )
    .bind(failures)
    .bind(disconnect)
    .bind(&message)
    .bind(account.id)
    .execute(pool)
    .await?;

    if disconnect {
        warn!(email = %account.email, failures, "account disconnected after repeated auth failures");
    }
    Ok(disconnect)
}

pub async fn reset_connect_failures(pool: &SqlitePool, account_id: i64) -> EngineResult<()> {
    sqlx::query("UPDATE email_accounts SET connect_failures = 0 WHERE id = ?")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_last_error(pool: &SqlitePool, account_id: i64, error: &str) -> EngineResult<()> {
    sqlx::query("UPDATE email_accounts SET last_error = ? WHERE id = ?")
        .bind(friendly_error(error))
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_disconnected(pool: &SqlitePool, email: &str, error: &str) -> EngineResult<()> {
    sqlx::query("UPDATE email_accounts SET disconnected = 1, last_error = ? WHERE email = ?")
        .bind(friendly_error(error))
        .bind(email)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_watermark(
    pool: &SqlitePool,
    account_id: i64,
    watermark: &str,
) -> EngineResult<()> {
    sqlx::query("UPDATE email_accounts SET sync_watermark = ? WHERE id = ?")
        .bind(watermark)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_account(pool: &SqlitePool, email: &str) -> EngineResult<()> {
    sqlx::query("DELETE FROM email_accounts WHERE email = ?")
        .bind(email)
        .execute(pool)
        .await?;
    Ok(())
}

/// Provider error strings can be cryptic or empty; users see this text in
/// `last_error`, so fall back to something actionable.
fn friendly_error(error: &str) -> String {
    let cleaned = error.replace('\'', "");
    if cleaned.trim().len() < 5 {
        "Your email is currently disconnected. Please try logging into your \
         account and then reconnect it to resolve the issue."
            .to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imap_fixture(email: &str) -> NewImapAccount {
        NewImapAccount {
            email: email.to_string(),
            user_id: "user-1".to_string(),
            imap_login: email.to_string(),
            imap_pwd: "secret".to_string(),
            imap_server: "imap.gmail.com".to_string(),
            imap_port: 993,
        }
    }

    #[tokio::test]
    async fn onboarding_enforces_email_uniqueness() {
        let pool = db::test_pool().await;
        add_imap_account(&pool, imap_fixture("a@x.com")).await.unwrap();
        let err = add_imap_account(&pool, imap_fixture("a@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAccount(_)));
    }

    #[tokio::test]
    async fn stored_imap_password_is_encoded_and_recoverable() {
        let pool = db::test_pool().await;
        let acc = add_imap_account(&pool, imap_fixture("a@x.com")).await.unwrap();
        assert_ne!(acc.imap_pwd.as_deref(), Some("secret"));
        assert_eq!(acc.imap_password().unwrap(), "secret");
        assert_eq!(acc.provider(), Some(EmailProvider::Imap));
    }

    #[tokio::test]
    async fn three_connect_failures_disconnect_the_account() {
        let pool = db::test_pool().await;
        add_imap_account(&pool, imap_fixture("a@x.com")).await.unwrap();

        for expected_disconnect in [false, false, true] {
            let acc = get_by_email(&pool, "a@x.com").await.unwrap();
            let disconnected = record_connect_failure(&pool, &acc, "login failed").await.unwrap();
            assert_eq!(disconnected, expected_disconnect);
        }

        let acc = get_by_email(&pool, "a@x.com").await.unwrap();
        assert!(acc.disconnected);
        assert_eq!(acc.last_error.as_deref(), Some("login failed"));
        assert!(list_active(&pool).await.unwrap().is_empty());

        // A later failure-counter reset must not silently re-enable polling.
        reset_connect_failures(&pool, acc.id).await.unwrap();
        assert!(list_active(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_provider_errors_get_readable_fallback() {
        let pool = db::test_pool().await;
        add_imap_account(&pool, imap_fixture("a@x.com")).await.unwrap();
        mark_disconnected(&pool, "a@x.com", "").await.unwrap();
        let acc = get_by_email(&pool, "a@x.com").await.unwrap();
        assert!(acc.last_error.unwrap().contains("reconnect"));
    }
}
