//! Microsoft Graph implementation of the provider adapter.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::models::account::{EmailAccount, OAuthTokens};
use crate::provider::{Batch, DraftRef, MailProvider, MailSession, MessageRef};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const TOKEN_ENDPOINT: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const GRAPH_SCOPE: &str = "offline_access Mail.ReadWrite User.Read";

/// Overlap window re-scanned on every poll; receivedDateTime carries no
/// strict delivery-order guarantee.
const OVERLAP_MINUTES: i64 = 5;

const MAX_BATCH: usize = 50;

pub struct OutlookProvider {
    http: reqwest::Client,
    cfg: Arc<Config>,
    pool: SqlitePool,
}

impl OutlookProvider {
    pub fn new(cfg: Arc<Config>, pool: SqlitePool) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
            pool,
        }
    }
}

#[async_trait]
impl MailProvider for OutlookProvider {
    async fn connect(&self, account: &EmailAccount) -> EngineResult<Box<dyn MailSession>> {
        let mut tokens = account
            .oauth_tokens()
            .map_err(|e| EngineError::Auth(e.to_string()))?;

        let expiring = tokens
            .expires_at
            .map(|t| t - chrono::Utc::now().timestamp() < 60)
            .unwrap_or(true);
        if expiring {
            let refresh = tokens
                .refresh_token
                .clone()
                .ok_or_else(|| EngineError::Auth("token expired and no refresh token".into()))?;
            tokens = refresh_tokens(&self.http, &self.cfg, &refresh).await?;
            // Persist the rotated blob so the next cycle skips the refresh.
            let blob = tokens
                .encode()
                .map_err(|e| EngineError::Provider(e.to_string()))?;
            sqlx::query("UPDATE email_accounts SET pwd = ? WHERE id = ?")
                .bind(&blob)
                .bind(account.id)
                .execute(&self.pool)
                .await?;
        }

        let session = OutlookSession {
            http: self.http.clone(),
            access_token: tokens.access_token,
        };
        // Cheap credential probe, equivalent of an IMAP login.
        session.current_user_email().await?;
        Ok(Box::new(session))
    }
}

/// Exchange an authorization code for tokens and resolve the mailbox
/// address, the second half of the OAuth onboarding flow.
pub async fn exchange_code(
    http: &reqwest::Client,
    cfg: &Config,
    code: &str,
) -> EngineResult<(OAuthTokens, String)> {
    let params = [
        ("grant_type", "authorization_code"),
        ("client_id", cfg.outlook_client_id.as_str()),
        ("client_secret", cfg.outlook_client_secret.as_str()),
        ("code", code),
        ("redirect_uri", cfg.outlook_redirect_uri.as_str()),
        ("scope", GRAPH_SCOPE),
    ];
    let tokens = request_tokens(http, &params).await?;
    let session = OutlookSession {
        http: http.clone(),
        access_token: tokens.access_token.clone(),
    };
    let email = session.current_user_email().await?;
    Ok((tokens, email))
}

/// Consent URL for step one of the OAuth flow.
pub fn consent_url(cfg: &Config, state: &str) -> EngineResult<String> {
    let url = reqwest::Url::parse_with_params(
        "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
        &[
            ("client_id", cfg.outlook_client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", cfg.outlook_redirect_uri.as_str()),
            ("response_mode", "query"),
            ("scope", GRAPH_SCOPE),
            ("state", state),
        ],
    )
    .map_err(|e| EngineError::Other(anyhow::anyhow!("authorize url: {e}")))?;
    Ok(url.into())
}

async fn refresh_tokens(
    http: &reqwest::Client,
    cfg: &Config,
    refresh_token: &str,
) -> EngineResult<OAuthTokens> {
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", cfg.outlook_client_id.as_str()),
        ("client_secret", cfg.outlook_client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("scope", GRAPH_SCOPE),
    ];
    request_tokens(http, &params).await
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

async fn request_tokens(
    http: &reqwest::Client,
    params: &[(&str, &str)],
) -> EngineResult<OAuthTokens> {
    let resp = http
        .post(TOKEN_ENDPOINT)
        .form(params)
        .send()
        .await
        .map_err(|e| EngineError::Provider(format!("token endpoint: {e}")))?;

    if resp.status() == StatusCode::BAD_REQUEST || resp.status() == StatusCode::UNAUTHORIZED {
        let detail = resp.text().await.unwrap_or_default();
        return Err(EngineError::Auth(format!("token exchange rejected: {detail}")));
    }
    if !resp.status().is_success() {
        return Err(EngineError::Provider(format!(
            "token endpoint status {}",
            resp.status()
        )));
    }

    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| EngineError::Provider(format!("token response: {e}")))?;
    Ok(OAuthTokens {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: token
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs),
    })
}

pub struct OutlookSession {
    http: reqwest::Client,
    access_token: String,
}

#[derive(Deserialize)]
struct GraphList<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    internet_message_id: Option<String>,
    subject: Option<String>,
    conversation_id: Option<String>,
    received_date_time: Option<String>,
    from: Option<GraphRecipient>,
    body: Option<GraphBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphAddress>,
}

#[derive(Deserialize)]
struct GraphAddress {
    address: Option<String>,
}

#[derive(Deserialize)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    mail: Option<String>,
    user_principal_name: Option<String>,
}

#[async_trait]
impl MailSession for OutlookSession {
    async fn list_new_messages(&mut self, since: Option<&str>) -> EngineResult<Batch> {
        let floor = since
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| chrono::Utc::now() - chrono::Duration::days(1));
        let filter_from = floor - chrono::Duration::minutes(OVERLAP_MINUTES);

        let url = format!(
            "{GRAPH_BASE}/me/mailFolders/inbox/messages\
             ?$select=id,internetMessageId,subject,from,conversationId,receivedDateTime\
             &$orderby=receivedDateTime%20asc&$top={MAX_BATCH}\
             &$filter=receivedDateTime%20ge%20{}",
            filter_from.format("%Y-%m-%dT%H:%M:%SZ")
        );
        let listing: GraphList<GraphMessage> = self.get_json(&url).await?;

        let mut messages = Vec::new();
        let mut max_seen = floor;
        for m in listing.value {
            if let Some(ts) = m
                .received_date_time
                .as_deref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            {
                max_seen = max_seen.max(ts.with_timezone(&chrono::Utc));
            }
            let smtp_msg_id = match m.internet_message_id {
                Some(id) => id,
                None => continue,
            };
            let sender = match m
                .from
                .and_then(|f| f.email_address)
                .and_then(|a| a.address)
            {
                Some(addr) => addr,
                None => continue,
            };
            messages.push(MessageRef {
                smtp_msg_id,
                provider_ref: m.id,
                sender,
                subject: m.subject.unwrap_or_default(),
                conversation_id: m.conversation_id,
            });
        }

        debug!(count = messages.len(), "graph listing complete");
        Ok(Batch {
            messages,
            next_watermark: Some(max_seen.to_rfc3339()),
        })
    }

    async fn fetch_body(&mut self, msg: &MessageRef) -> EngineResult<String> {
        let url = format!("{GRAPH_BASE}/me/messages/{}?$select=body", msg.provider_ref);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            // Graph renders the body down to text for us.
            .header("Prefer", "outlook.body-content-type=\"text\"")
            .send()
            .await
            .map_err(|e| EngineError::Provider(format!("graph fetch: {e}")))?;
        let resp = check_graph_status(resp)?;
        let message: GraphMessage = resp
            .json()
            .await
            .map_err(|e| EngineError::Provider(format!("graph body parse: {e}")))?;
        Ok(message.body.and_then(|b| b.content).unwrap_or_default())
    }

    async fn prepare_draft_ref(&mut self, msg: &MessageRef) -> EngineResult<DraftRef> {
        // The Graph id only exists after createReply; the conversation id
        // is the recoverable key the write-ahead entry carries.
        Ok(DraftRef {
            draft_id: None,
            message_id: None,
            folder: None,
            conversation_id: msg.conversation_id.clone(),
        })
    }

    async fn create_draft(
        &mut self,
        msg: &MessageRef,
        body: &str,
        _prepared: &DraftRef,
    ) -> EngineResult<DraftRef> {
        let url = format!("{GRAPH_BASE}/me/messages/{}/createReply", msg.provider_ref);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| EngineError::Provider(format!("createReply: {e}")))?;
        let resp = check_graph_status(resp)?;
        let draft: GraphMessage = resp
            .json()
            .await
            .map_err(|e| EngineError::Provider(format!("createReply parse: {e}")))?;

        let patch_url = format!("{GRAPH_BASE}/me/messages/{}", draft.id);
        let resp = self
            .http
            .patch(&patch_url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "body": { "contentType": "Text", "content": body }
            }))
            .send()
            .await
            .map_err(|e| EngineError::Provider(format!("draft body patch: {e}")))?;
        check_graph_status(resp)?;

        Ok(DraftRef {
            draft_id: Some(draft.id),
            message_id: None,
            folder: None,
            conversation_id: msg.conversation_id.clone(),
        })
    }

    async fn delete_draft(&mut self, draft: &DraftRef) -> EngineResult<()> {
        if let Some(id) = draft.draft_id.as_deref() {
            return self.delete_message(id).await;
        }
        // Crash before the createReply response was journaled: fall back
        // to sweeping the drafts folder by conversation.
        let cid = match draft.conversation_id.as_deref() {
            Some(c) => c,
            None => return Ok(()),
        };
        let url = format!(
            "{GRAPH_BASE}/me/mailFolders/drafts/messages\
             ?$select=id&$filter=conversationId%20eq%20'{cid}'"
        );
        let listing: GraphList<GraphMessage> = self.get_json(&url).await?;
        for m in listing.value {
            self.delete_message(&m.id).await?;
        }
        Ok(())
    }

    async fn has_existing_reply(&mut self, msg: &MessageRef) -> EngineResult<bool> {
        let cid = match msg.conversation_id.as_deref() {
            Some(c) => c,
            None => return Ok(false),
        };
        for folder in ["drafts", "sentitems"] {
            let url = format!(
                "{GRAPH_BASE}/me/mailFolders/{folder}/messages\
                 ?$select=id&$top=1&$filter=conversationId%20eq%20'{cid}'"
            );
            let listing: GraphList<GraphMessage> = self.get_json(&url).await?;
            if !listing.value.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn close(&mut self) {}
}

impl OutlookSession {
    async fn current_user_email(&self) -> EngineResult<String> {
        let url = format!("{GRAPH_BASE}/me");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| EngineError::Provider(format!("graph /me: {e}")))?;
        let resp = check_graph_status(resp)?;
        let user: GraphUser = resp
            .json()
            .await
            .map_err(|e| EngineError::Provider(format!("graph /me parse: {e}")))?;
        user.mail
            .or(user.user_principal_name)
            .ok_or_else(|| EngineError::Provider("graph user has no mailbox address".into()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> EngineResult<T> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| EngineError::Provider(format!("graph request: {e}")))?;
        let resp = check_graph_status(resp)?;
        resp.json()
            .await
            .map_err(|e| EngineError::Provider(format!("graph response: {e}")))
    }

    async fn delete_message(&self, id: &str) -> EngineResult<()> {
        let url = format!("{GRAPH_BASE}/me/messages/{id}");
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| EngineError::Provider(format!("graph delete: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            // Already gone; tolerated.
            return Ok(());
        }
        check_graph_status(resp)?;
        Ok(())
    }
}

fn check_graph_status(resp: reqwest::Response) -> EngineResult<reqwest::Response> {
    match resp.status() {
        s if s.is_success() => Ok(resp),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(EngineError::Auth("graph token rejected".into()))
        }
        s => {
            warn!(status = %s, "graph error response");
            Err(EngineError::Provider(format!("graph status {s}")))
        }
    }
}
