pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod provider;
pub mod routes;
pub mod services;

use std::sync::Arc;

use crate::ai::openai::OpenAiGateway;
use crate::config::Config;
use crate::provider::{imap::ImapProvider, outlook::OutlookProvider, Providers};
use crate::routes::AppState;
use crate::services::sync_service::SyncDeps;

/// Wire the full application state from a config and an open pool.
pub fn build_state(pool: sqlx::SqlitePool, cfg: Config) -> AppState {
    let cfg = Arc::new(cfg);
    let http = reqwest::Client::new();
    let providers = Providers {
        imap: Arc::new(ImapProvider),
        outlook: Arc::new(OutlookProvider::new(cfg.clone(), pool.clone())),
    };
    let gateway = Arc::new(OpenAiGateway::new(cfg.clone()));
    let deps = SyncDeps {
        providers,
        classifier: gateway.clone(),
        composer: gateway,
        cfg: cfg.clone(),
    };
    AppState {
        pool,
        cfg,
        http,
        deps,
    }
}
