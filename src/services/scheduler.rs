use std::time::Duration;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::services::{oauth_service, sync_service};

/// Starts the periodic sync trigger. Every tick it runs one full cycle
/// over all active accounts and sweeps expired OAuth handshake states.
pub fn start(pool: SqlitePool, deps: sync_service::SyncDeps) {
    tokio::spawn(async move {
        loop {
            let tick_start = std::time::Instant::now();

            match sync_service::run_cycle(&pool, &deps).await {
                Ok(report) => info!(
                    accounts = report.accounts,
                    synced = report.synced,
                    locked = report.locked,
                    failed = report.failed,
                    "scheduled sync cycle completed"
                ),
                Err(e) => warn!(error = %e, "scheduled sync cycle failed"),
            }

            match oauth_service::purge_expired(&pool, deps.cfg.state_ttl_secs).await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "expired oauth states removed"),
                Err(e) => warn!(error = %e, "oauth state purge failed"),
            }

            // Sleep the remainder of a 60s tick.
            let elapsed = tick_start.elapsed();
            let sleep_ms = 60_000u64.saturating_sub(elapsed.as_millis() as u64);
            tokio::time::sleep(Duration::from_millis(sleep_ms.max(1))).await;
        }
    });
}
