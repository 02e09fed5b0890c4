use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_key: String,
    pub port: u16,

    // Outlook / Microsoft Graph
    pub outlook_client_id: String,
    pub outlook_client_secret: String,
    pub outlook_redirect_uri: String,

    // AI gateway (OpenAI-compatible)
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub limit_email_length: usize,

    // Sync orchestration
    pub max_retries: i64,
    pub sync_concurrency: usize,
    pub sync_deadline_secs: u64,
    pub lock_ttl_secs: i64,
    pub state_ttl_secs: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://inboxpilot.db".into()),
            api_key: env::var("API_KEY").unwrap_or_default(),
            port: env_parse("PORT", 3030),
            outlook_client_id: env::var("MICROSOFT_CLIENT_ID").unwrap_or_default(),
            outlook_client_secret: env::var("MICROSOFT_CLIENT_SECRET").unwrap_or_default(),
            outlook_redirect_uri: env::var("MICROSOFT_REDIRECT_URI")
                .unwrap_or_else(|_| "http://localhost:3030/outlook_auth_step_2".into()),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            limit_email_length: env_parse("LIMIT_EMAIL_LENGTH", 6000),
            max_retries: env_parse("SYNC_MAX_RETRIES", 3),
            sync_concurrency: env_parse("SYNC_CONCURRENCY", 5),
            sync_deadline_secs: env_parse("SYNC_DEADLINE_SECS", 600),
            lock_ttl_secs: env_parse("SYNC_LOCK_TTL_SECS", 120),
            state_ttl_secs: env_parse("OUTLOOK_STATE_TTL_SECS", 600),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite::memory:".into(),
            api_key: "test-key".into(),
            port: 0,
            outlook_client_id: "client-id".into(),
            outlook_client_secret: "client-secret".into(),
            outlook_redirect_uri: "http://localhost/outlook_auth_step_2".into(),
            openai_api_key: String::new(),
            openai_base_url: "http://localhost".into(),
            openai_model: "gpt-4o-mini".into(),
            limit_email_length: 6000,
            max_retries: 3,
            sync_concurrency: 5,
            sync_deadline_secs: 600,
            lock_ttl_secs: 120,
            state_ttl_secs: 600,
        }
    }
}
