//! Immediate rescheduling while a policy still has a backlog.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::jobs::JobCatalog;

/// Points the job's `next_start` at its last start (or at `now` on a first
/// run) so the scheduler picks it up again right away.
pub async fn enable_fast_restart(
    jobs: &dyn JobCatalog,
    job_id: i32,
    job_name: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let next_start = jobs
        .get_run_stat(job_id)
        .await?
        .and_then(|stat| stat.last_start)
        .unwrap_or(now);

    jobs.upsert_next_start(job_id, next_start).await?;
    debug!(job_id, "the {job_name} job is scheduled to run again immediately");
    Ok(next_start)
}

/// Best effort: a failed re-selection or a failed write only means the job
/// waits for its normal interval. Returns whether a fast restart was set.
pub async fn reschedule_if_pending(
    jobs: &dyn JobCatalog,
    job_id: i32,
    job_name: &str,
    now: DateTime<Utc>,
    pending: Result<bool>,
) -> bool {
    match pending {
        Ok(false) => false,
        Ok(true) => match enable_fast_restart(jobs, job_id, job_name, now).await {
            Ok(_) => true,
            Err(e) => {
                warn!(job_id, error = %e, "could not enable fast restart for {job_name} job");
                false
            }
        },
        Err(e) => {
            warn!(job_id, error = %e, "could not re-check pending work for {job_name} job");
            false
        }
    }
}
