use crate::jobs::RetryConfig;

/// Runtime configuration for the worker and `pflowctl`, loaded from the
/// environment (and `.env` when present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub poll_interval_ms: u64,
    pub max_concurrent_jobs: i64,
    pub migrate_on_startup: bool,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or_fallback("PFLOW_DATABASE_URL", "DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("PFLOW_DATABASE_URL (or DATABASE_URL) is missing"))?;

        let worker_id = env_or_fallback("PFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let poll_interval_ms = env_or_fallback("PFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1_000)
            .clamp(10, 60_000);

        let max_concurrent_jobs =
            env_or_fallback("PFLOW_MAX_CONCURRENT_JOBS", "MAX_CONCURRENT_JOBS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(8)
                .clamp(1, 256);

        let migrate_on_startup = env_bool("PFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let mut retry = RetryConfig::default();
        if let Some(pct) = env_or_fallback("PFLOW_RETRY_JITTER_PCT", "RETRY_JITTER_PCT")
            .and_then(|s| s.parse::<f64>().ok())
        {
            retry.jitter_pct = pct.clamp(0.0, 1.0);
        }

        Ok(Self {
            database_url,
            worker_id,
            poll_interval_ms,
            max_concurrent_jobs,
            migrate_on_startup,
            retry,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
