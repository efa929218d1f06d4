use policyflow::config;
use policyflow::db;
use policyflow::exec::ExecutionReport;
use policyflow::jobs::{Job, JobRunner};
use policyflow::pg::{self, PgSession};
use policyflow::{telemetry, PolicyEngine};

use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cfg = config::Config::from_env()?;

    info!(
        worker_id = %cfg.worker_id,
        poll_interval_ms = cfg.poll_interval_ms,
        max_concurrent_jobs = cfg.max_concurrent_jobs,
        migrate_on_startup = cfg.migrate_on_startup,
        retry_jitter_pct = cfg.retry.jitter_pct,
        "policyflow worker starting"
    );

    // one session connection per concurrent job, plus headroom for run
    // bookkeeping and continuous-aggregate refreshes
    let min_connections = u32::try_from(cfg.max_concurrent_jobs)?.saturating_add(2);
    let pool = db::make_pool(&cfg.database_url, min_connections).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let services = pg::services(pool.clone());
    let runner = JobRunner::new(services.jobs.clone(), cfg.retry.clone());
    let engine = PolicyEngine::new(services.clone());
    let poll_interval = Duration::from_millis(cfg.poll_interval_ms);
    let batch_size = cfg.max_concurrent_jobs;
    let worker_id = cfg.worker_id.clone();

    // ---- Worker loop task ----
    let worker_handle = tokio::spawn(async move {
        loop {
            let due = services.jobs.due_jobs(Utc::now(), batch_size).await?;

            if due.is_empty() {
                tokio::time::sleep(poll_interval).await;
                continue;
            }

            // one session per job; jobs of a batch run concurrently
            let mut join_set = tokio::task::JoinSet::new();
            for job in due {
                let engine = engine.clone();
                let runner = runner.clone();
                let pool = pool.clone();
                join_set.spawn(async move { run_one(&engine, &runner, &pool, job).await });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(worker_id = %worker_id, error = %e, "failed to record job run")
                    }
                    Err(e) => error!(worker_id = %worker_id, error = %e, "job task panicked"),
                }
            }
        }

        #[allow(unreachable_code)]
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = worker_handle => res??,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    Ok(())
}

async fn run_one(
    engine: &PolicyEngine,
    runner: &JobRunner,
    pool: &PgPool,
    job: Job,
) -> anyhow::Result<()> {
    let started_at = Utc::now();
    runner.on_start(&job, started_at).await?;

    let result = execute_in_session(engine, pool, &job).await;
    let finished_at = Utc::now();

    match result {
        Ok(report) => {
            let stat = runner.on_success(&job, started_at, finished_at).await?;
            info!(
                job_id = job.id,
                routine = %job.routine,
                kind = ?report.kind,
                latency_ms = (finished_at - started_at).num_milliseconds(),
                next_start = ?stat.next_start,
                "job succeeded"
            );
        }
        Err(err) => {
            let stat = runner
                .on_failure(&job, started_at, finished_at, &err)
                .await?;
            warn!(
                job_id = job.id,
                routine = %job.routine,
                code = err.code(),
                error = %err,
                consecutive_failures = stat.consecutive_failures,
                next_start = ?stat.next_start,
                "job failed"
            );
        }
    }

    Ok(())
}

async fn execute_in_session(
    engine: &PolicyEngine,
    pool: &PgPool,
    job: &Job,
) -> policyflow::Result<ExecutionReport> {
    let mut session = PgSession::acquire(pool).await?;
    let result = engine.execute(&mut session, job).await;
    if let Err(e) = session.close().await {
        warn!(job_id = job.id, error = %e, "failed to release job session");
    }
    result
}
