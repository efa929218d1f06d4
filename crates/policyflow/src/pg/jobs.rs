use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use super::conn::PgTarget;

use crate::error::{PolicyError, Result};
use crate::jobs::{Job, JobCatalog, JobRunStat, RoutineName, RunOutcome, ScheduleFields};
use crate::partitions::ChunkId;

const JOB_COLUMNS: &str = r#"
    j.id, j.application_name, j.proc_schema, j.proc_name,
    (EXTRACT(EPOCH FROM j.schedule_interval) * 1000000)::bigint AS schedule_interval_us,
    (EXTRACT(EPOCH FROM j.max_runtime) * 1000000)::bigint AS max_runtime_us,
    j.max_retries,
    (EXTRACT(EPOCH FROM j.retry_period) * 1000000)::bigint AS retry_period_us,
    j.scheduled, j.config, j.owner, j.hypertable_id
"#;

const STAT_COLUMNS: &str = r#"
    job_id, last_start, last_finish, next_start, last_successful_finish,
    total_runs, total_failures, consecutive_failures
"#;

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i32,
    application_name: String,
    proc_schema: String,
    proc_name: String,
    schedule_interval_us: i64,
    max_runtime_us: i64,
    max_retries: i32,
    retry_period_us: i64,
    scheduled: bool,
    config: Option<Value>,
    owner: String,
    hypertable_id: Option<i32>,
}

impl From<JobRow> for Job {
    fn from(r: JobRow) -> Self {
        Job {
            id: r.id,
            application_name: r.application_name,
            routine: RoutineName::new(r.proc_schema, r.proc_name),
            schedule_interval: Duration::microseconds(r.schedule_interval_us),
            max_runtime: Duration::microseconds(r.max_runtime_us),
            max_retries: r.max_retries,
            retry_period: Duration::microseconds(r.retry_period_us),
            scheduled: r.scheduled,
            config: r.config,
            owner: r.owner,
            hypertable_id: r.hypertable_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatRow {
    job_id: i32,
    last_start: Option<DateTime<Utc>>,
    last_finish: Option<DateTime<Utc>>,
    next_start: Option<DateTime<Utc>>,
    last_successful_finish: Option<DateTime<Utc>>,
    total_runs: i64,
    total_failures: i64,
    consecutive_failures: i32,
}

impl From<StatRow> for JobRunStat {
    fn from(r: StatRow) -> Self {
        JobRunStat {
            job_id: r.job_id,
            last_start: r.last_start,
            last_finish: r.last_finish,
            next_start: r.next_start,
            last_successful_finish: r.last_successful_finish,
            total_runs: r.total_runs,
            total_failures: r.total_failures,
            consecutive_failures: r.consecutive_failures,
        }
    }
}

fn micros(d: Duration) -> i64 {
    d.num_microseconds().unwrap_or(i64::MAX)
}

/// `bgw_job` / `bgw_job_stat` / `bgw_policy_chunk_stats` access.
#[derive(Clone)]
pub struct PgJobCatalog {
    db: PgTarget,
}

impl PgJobCatalog {
    pub fn new(db: impl Into<PgTarget>) -> Self {
        Self { db: db.into() }
    }

    /// Inserts a job and returns its id.
    pub async fn insert_job(
        &self,
        application_name: &str,
        routine: &RoutineName,
        fields: &ScheduleFields,
        hypertable_id: Option<i32>,
    ) -> Result<i32> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO bgw_job (
              application_name, proc_schema, proc_name,
              schedule_interval, max_runtime, max_retries, retry_period,
              scheduled, hypertable_id, config
            )
            VALUES (
              $1, $2, $3,
              $4 * INTERVAL '1 microsecond', $5 * INTERVAL '1 microsecond', $6,
              $7 * INTERVAL '1 microsecond',
              $8, $9, $10
            )
            RETURNING id
            "#,
        )
        .bind(application_name)
        .bind(&routine.schema)
        .bind(&routine.name)
        .bind(micros(fields.schedule_interval))
        .bind(micros(fields.max_runtime))
        .bind(fields.max_retries)
        .bind(micros(fields.retry_period))
        .bind(fields.scheduled)
        .bind(hypertable_id)
        .bind(&fields.config)
        .fetch_one(&mut *self.db.acquire().await?)
        .await?;
        Ok(id)
    }

    pub async fn delete_job(&self, id: i32) -> Result<bool> {
        let res = sqlx::query("DELETE FROM bgw_job WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db.acquire().await?)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl JobCatalog for PgJobCatalog {
    async fn find_job(&self, id: i32) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM bgw_job j WHERE j.id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.db.acquire().await?)
            .await?;
        Ok(row.map(Job::from))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM bgw_job j ORDER BY j.id");
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(&mut *self.db.acquire().await?)
            .await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn update_job_schedule_fields(&self, id: i32, fields: &ScheduleFields) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE bgw_job
            SET schedule_interval = $2 * INTERVAL '1 microsecond',
                max_runtime       = $3 * INTERVAL '1 microsecond',
                max_retries       = $4,
                retry_period      = $5 * INTERVAL '1 microsecond',
                scheduled         = $6,
                config            = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(micros(fields.schedule_interval))
        .bind(micros(fields.max_runtime))
        .bind(fields.max_retries)
        .bind(micros(fields.retry_period))
        .bind(fields.scheduled)
        .bind(&fields.config)
        .execute(&mut *self.db.acquire().await?)
        .await?;

        if res.rows_affected() == 0 {
            return Err(PolicyError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn record_run(&self, job_id: i32, chunk_id: ChunkId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bgw_policy_chunk_stats (job_id, chunk_id, num_times_job_run, last_time_job_run)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (job_id, chunk_id) DO UPDATE
            SET num_times_job_run = bgw_policy_chunk_stats.num_times_job_run + 1,
                last_time_job_run = EXCLUDED.last_time_job_run
            "#,
        )
        .bind(job_id)
        .bind(chunk_id)
        .bind(at)
        .execute(&mut *self.db.acquire().await?)
        .await?;
        Ok(())
    }

    async fn upsert_next_start(&self, job_id: i32, next_start: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bgw_job_stat (job_id, next_start)
            VALUES ($1, $2)
            ON CONFLICT (job_id) DO UPDATE SET next_start = EXCLUDED.next_start
            "#,
        )
        .bind(job_id)
        .bind(next_start)
        .execute(&mut *self.db.acquire().await?)
        .await?;
        Ok(())
    }

    async fn get_run_stat(&self, job_id: i32) -> Result<Option<JobRunStat>> {
        let sql = format!("SELECT {STAT_COLUMNS} FROM bgw_job_stat WHERE job_id = $1");
        let row = sqlx::query_as::<_, StatRow>(&sql)
            .bind(job_id)
            .fetch_optional(&mut *self.db.acquire().await?)
            .await?;
        Ok(row.map(JobRunStat::from))
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM bgw_job j
            LEFT JOIN bgw_job_stat s ON s.job_id = j.id
            WHERE j.scheduled
              AND (s.next_start IS NULL OR s.next_start <= $1)
            ORDER BY s.next_start ASC NULLS FIRST, j.id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .bind(limit.max(0))
            .fetch_all(&mut *self.db.acquire().await?)
            .await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn mark_start(&self, job_id: i32, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bgw_job_stat AS s (job_id, last_start, next_start, total_runs)
            VALUES ($1, $2, NULL, 1)
            ON CONFLICT (job_id) DO UPDATE
            SET last_start = EXCLUDED.last_start,
                next_start = NULL,
                total_runs = s.total_runs + 1
            "#,
        )
        .bind(job_id)
        .bind(at)
        .execute(&mut *self.db.acquire().await?)
        .await?;
        Ok(())
    }

    async fn mark_end(
        &self,
        job_id: i32,
        finished_at: DateTime<Utc>,
        outcome: RunOutcome,
        next_start: DateTime<Utc>,
    ) -> Result<JobRunStat> {
        let succeeded = outcome == RunOutcome::Succeeded;
        let sql = format!(
            r#"
            INSERT INTO bgw_job_stat AS s (
              job_id, last_finish, next_start, last_successful_finish,
              total_failures, consecutive_failures
            )
            VALUES (
              $1, $2::timestamptz, $4::timestamptz,
              CASE WHEN $3::boolean THEN $2::timestamptz END,
              CASE WHEN $3::boolean THEN 0 ELSE 1 END,
              CASE WHEN $3::boolean THEN 0 ELSE 1 END
            )
            ON CONFLICT (job_id) DO UPDATE
            SET last_finish = EXCLUDED.last_finish,
                last_successful_finish =
                  CASE WHEN $3::boolean THEN EXCLUDED.last_finish ELSE s.last_successful_finish END,
                total_failures = s.total_failures + CASE WHEN $3::boolean THEN 0 ELSE 1 END,
                consecutive_failures =
                  CASE WHEN $3::boolean THEN 0 ELSE s.consecutive_failures + 1 END,
                next_start =
                  CASE WHEN $3::boolean THEN COALESCE(s.next_start, EXCLUDED.next_start)
                       ELSE EXCLUDED.next_start END
            RETURNING {STAT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, StatRow>(&sql)
            .bind(job_id)
            .bind(finished_at)
            .bind(succeeded)
            .bind(next_start)
            .fetch_one(&mut *self.db.acquire().await?)
            .await?;
        Ok(row.into())
    }
}
