//! Connected mailbox accounts (IMAP or Outlook/Graph).

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Imap,
    Outlook,
}

impl EmailProvider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "imap" | "gmail" => Some(Self::Imap),
            "outlook" => Some(Self::Outlook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imap => "imap",
            Self::Outlook => "outlook",
        }
    }
}

/// One row of `email_accounts`. Secrets (`pwd`, `imap_pwd`) are stored
/// base64-encoded; use the decode helpers before connecting.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailAccount {
    pub id: i64,
    pub email: String,
    pub user_id: String,
    pub email_provider: String,
    #[serde(skip_serializing)]
    pub pwd: Option<String>,
    pub imap_login: Option<String>,
    #[serde(skip_serializing)]
    pub imap_pwd: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<i64>,
    pub disconnected: bool,
    pub connect_failures: i64,
    pub last_error: Option<String>,
    pub sync_watermark: Option<String>,
    pub created_at: i64,
}

impl EmailAccount {
    pub fn provider(&self) -> Option<EmailProvider> {
        EmailProvider::from_str(&self.email_provider)
    }

    /// Encode a secret for storage (base64; swap for a KMS-backed codec later).
    pub fn encode_secret(plain: &str) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(plain.as_bytes())
    }

    pub fn decode_secret(encoded: &str) -> Result<String> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Ok(String::from_utf8(decoded)?)
    }

    /// Decoded IMAP password, when present.
    pub fn imap_password(&self) -> Result<String> {
        let encoded = self
            .imap_pwd
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("account {} has no imap credentials", self.email))?;
        Self::decode_secret(encoded)
    }

    /// Decoded OAuth token blob for Outlook accounts.
    pub fn oauth_tokens(&self) -> Result<OAuthTokens> {
        let encoded = self
            .pwd
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("account {} has no oauth credentials", self.email))?;
        let json = Self::decode_secret(encoded)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

impl OAuthTokens {
    pub fn encode(&self) -> Result<String> {
        Ok(EmailAccount::encode_secret(&serde_json::to_string(self)?))
    }
}
