use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// `PFLOW_DB_MAX_CONNECTIONS` (default 8, clamped to 1..=64), raised to
/// `min_connections` when that is larger.
fn pool_size(configured: Option<u32>, min_connections: u32) -> u32 {
    configured.unwrap_or(8).clamp(1, 64).max(min_connections)
}

/// `min_connections` is the floor the caller needs to make progress; the
/// worker holds one connection per running job and still needs room for its
/// run bookkeeping and refreshes.
pub async fn make_pool(database_url: &str, min_connections: u32) -> anyhow::Result<PgPool> {
    let max_connections = pool_size(
        std::env::var("PFLOW_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok()),
        min_connections,
    );

    let acquire_timeout_secs = std::env::var("PFLOW_DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10)
        .clamp(1, 60);

    // maintenance statements scan whole chunks; JIT compilation rarely pays off
    let disable_jit = env_bool("PFLOW_DISABLE_JIT", true);

    let mut opts = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs));

    opts = opts.after_connect(move |conn, _meta| {
        Box::pin(async move {
            sqlx::query("SET TIME ZONE 'UTC'").execute(&mut *conn).await?;
            if disable_jit {
                sqlx::query("SET jit = OFF").execute(&mut *conn).await?;
            }
            Ok(())
        })
    });

    let pool = opts.connect(database_url).await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
