use crate::error::{PolicyError, Result};
use crate::jobs::{
    catalog::JobCatalog,
    model::{Job, JobRunStat, RunOutcome, ScheduleFields},
    retry::{next_retry_delay, should_retry, RetryConfig},
};
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use tracing::warn;

/// Keeps run statistics and decides when a job runs next.
#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobCatalog>,
    retry_cfg: RetryConfig,
}

impl JobRunner {
    pub fn new(jobs: Arc<dyn JobCatalog>, retry_cfg: RetryConfig) -> Self {
        Self { jobs, retry_cfg }
    }

    pub async fn on_start(&self, job: &Job, started_at: DateTime<Utc>) -> Result<()> {
        self.jobs.mark_start(job.id, started_at).await
    }

    /// Next start is `finished_at + schedule_interval` unless the run already
    /// asked for an earlier one.
    pub async fn on_success(
        &self,
        job: &Job,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<JobRunStat> {
        self.warn_if_overran(job, started_at, finished_at);
        self.jobs
            .mark_end(
                job.id,
                finished_at,
                RunOutcome::Succeeded,
                finished_at + job.schedule_interval,
            )
            .await
    }

    pub async fn on_failure(
        &self,
        job: &Job,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: &PolicyError,
    ) -> Result<JobRunStat> {
        self.warn_if_overran(job, started_at, finished_at);

        // 1) count this failure
        let failures = self
            .jobs
            .get_run_stat(job.id)
            .await?
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
            + 1;

        // 2) out of retries -> stop scheduling the job
        if !should_retry(job.max_retries, failures) {
            warn!(
                job_id = job.id,
                failures,
                max_retries = job.max_retries,
                code = error.code(),
                "job exhausted its retries and is no longer scheduled"
            );
            let mut fields = ScheduleFields::from(job);
            fields.scheduled = false;
            self.jobs.update_job_schedule_fields(job.id, &fields).await?;
        }

        // 3) backoff + jitter + cap
        let mut rng = StdRng::from_entropy();
        let delay = next_retry_delay(
            failures,
            job.retry_period,
            job.schedule_interval,
            &self.retry_cfg,
            &mut rng,
        );

        self.jobs
            .mark_end(job.id, finished_at, RunOutcome::Failed, finished_at + delay)
            .await
    }

    // max_runtime is advisory: report, never abort.
    fn warn_if_overran(&self, job: &Job, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) {
        if job.max_runtime > chrono::Duration::zero() && finished_at - started_at > job.max_runtime {
            warn!(
                job_id = job.id,
                runtime_ms = (finished_at - started_at).num_milliseconds(),
                max_runtime_ms = job.max_runtime.num_milliseconds(),
                "job ran longer than its max_runtime"
            );
        }
    }
}
