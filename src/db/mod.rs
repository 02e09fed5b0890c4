use anyhow::Result;
use sqlx::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePool::connect(database_url).await
}

/// Apply the embedded schema. Statements are split on `;` because the
/// sqlite driver executes one statement per query.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in INIT_SQL.split(';') {
        let statement = statement.trim();
        if statement.is_empty() || statement.starts_with("--") && !statement.contains('\n') {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}
