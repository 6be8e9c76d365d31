use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::{env_bool, env_or_fallback};
use crate::error::MailResult;

pub async fn make_pool(database_url: &str) -> MailResult<PgPool> {
    let max_connections = env_or_fallback("MAILFLOW_DB_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS")
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(8)
        .clamp(1, 64);

    let acquire_timeout_secs =
        env_or_fallback("MAILFLOW_DB_ACQUIRE_TIMEOUT_SECS", "DB_ACQUIRE_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10)
            .clamp(1, 60);

    let disable_jit = env_bool("MAILFLOW_DISABLE_JIT").unwrap_or(true);

    let mut opts = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs));

    opts = opts.after_connect(move |conn, _meta| {
        Box::pin(async move {
            if disable_jit {
                sqlx::query("SET jit = OFF").execute(&mut *conn).await?;
            }
            Ok(())
        })
    });

    let pool = opts.connect(database_url).await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> MailResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
