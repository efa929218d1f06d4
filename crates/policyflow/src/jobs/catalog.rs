use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{Job, JobRunStat, RunOutcome, ScheduleFields};
use crate::error::Result;
use crate::partitions::ChunkId;

/// Storage for jobs, their run statistics and the per-chunk run ledger.
#[async_trait]
pub trait JobCatalog: Send + Sync {
    async fn find_job(&self, id: i32) -> Result<Option<Job>>;

    async fn list_jobs(&self) -> Result<Vec<Job>>;

    async fn update_job_schedule_fields(&self, id: i32, fields: &ScheduleFields) -> Result<()>;

    /// Records that `job_id` processed `chunk_id` at `at`. Reorder selection
    /// treats any recorded chunk as already done.
    async fn record_run(&self, job_id: i32, chunk_id: ChunkId, at: DateTime<Utc>) -> Result<()>;

    async fn upsert_next_start(&self, job_id: i32, next_start: DateTime<Utc>) -> Result<()>;

    async fn get_run_stat(&self, job_id: i32) -> Result<Option<JobRunStat>>;

    /// Scheduled jobs whose `next_start` is unset or at/before `now`.
    async fn due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    /// Sets `last_start`, bumps `total_runs` and clears `next_start`,
    /// creating the stat row on first run.
    async fn mark_start(&self, job_id: i32, at: DateTime<Utc>) -> Result<()>;

    /// Closes a run. On success `next_start` keeps any value set during the
    /// run and otherwise takes `next_start`; on failure it is overwritten.
    async fn mark_end(
        &self,
        job_id: i32,
        finished_at: DateTime<Utc>,
        outcome: RunOutcome,
        next_start: DateTime<Utc>,
    ) -> Result<JobRunStat>;
}
