//! The "execute this job now" entry point and the job-level operations built
//! on it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{PolicyError, Result};
use crate::exec::{boxed, execute_job, ActionRegistry, ExecutionReport, Session};
use crate::jobs::{Job, JobAlteration, RoutineName, ScheduleFields};
use crate::policy::{self, PolicyKind, PolicyRun, PolicyServices, INTERNAL_SCHEMA};

#[derive(Clone)]
pub struct PolicyEngine {
    services: PolicyServices,
    registry: ActionRegistry,
}

impl PolicyEngine {
    pub fn new(services: PolicyServices) -> Self {
        Self::with_registry(services, ActionRegistry::new())
    }

    /// Keeps any user-defined actions already in `registry` and adds the
    /// built-in policy procedures.
    pub fn with_registry(services: PolicyServices, mut registry: ActionRegistry) -> Self {
        register_builtin_policies(&mut registry, &services);
        Self { services, registry }
    }

    pub fn services(&self) -> &PolicyServices {
        &self.services
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub async fn execute(&self, session: &mut dyn Session, job: &Job) -> Result<ExecutionReport> {
        execute_job(&self.registry, job, session).await
    }

    /// Looks the job up and executes it; the manual `run_job` path.
    pub async fn run_job(&self, session: &mut dyn Session, job_id: i32) -> Result<ExecutionReport> {
        let job = self
            .services
            .jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("job {job_id}")))?;
        self.execute(session, &job).await
    }

    /// Validates `config` when `routine` is a built-in policy. Returns the
    /// policy kind it was validated as, `None` for user-defined actions.
    pub async fn check_config(
        &self,
        routine: &RoutineName,
        config: &Value,
        now: DateTime<Utc>,
    ) -> Result<Option<PolicyKind>> {
        let Some(kind) = PolicyKind::from_routine(routine) else {
            return Ok(None);
        };
        // The descriptor (and any cache pin it holds) is dropped right away.
        policy::validate(kind, Some(config), &self.services.context(now)).await?;
        Ok(Some(kind))
    }

    /// Runs a built-in policy directly, outside the driver.
    pub async fn run_policy(
        &self,
        kind: PolicyKind,
        job_id: i32,
        config: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<PolicyRun> {
        policy::execute(kind, &self.services, job_id, config, now).await
    }

    /// Overwrites the alterable fields of a job. A changed schedule interval
    /// moves `next_start` to `last_finish + interval`; an explicit
    /// `next_start` wins over that.
    pub async fn alter_job(
        &self,
        job_id: i32,
        alteration: JobAlteration,
        now: DateTime<Utc>,
    ) -> Result<AlteredJob> {
        let jobs = self.services.jobs.as_ref();
        let mut job = jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("job {job_id}")))?;
        let old_interval = job.schedule_interval;

        if let Some(v) = alteration.schedule_interval {
            job.schedule_interval = v;
        }
        if let Some(v) = alteration.max_runtime {
            job.max_runtime = v;
        }
        if let Some(v) = alteration.max_retries {
            job.max_retries = v;
        }
        if let Some(v) = alteration.retry_period {
            job.retry_period = v;
        }
        if let Some(v) = alteration.scheduled {
            job.scheduled = v;
        }
        if let Some(v) = alteration.config {
            job.config = Some(v);
        }

        if let Some(config) = &job.config {
            self.check_config(&job.routine, config, now).await?;
        }

        jobs.update_job_schedule_fields(job_id, &ScheduleFields::from(&job))
            .await?;

        if job.schedule_interval != old_interval {
            if let Some(last_finish) = jobs
                .get_run_stat(job_id)
                .await?
                .and_then(|stat| stat.last_finish)
            {
                jobs.upsert_next_start(job_id, last_finish + job.schedule_interval)
                    .await?;
            }
        }

        if let Some(next_start) = alteration.next_start {
            jobs.upsert_next_start(job_id, next_start).await?;
        }

        let next_start = jobs
            .get_run_stat(job_id)
            .await?
            .and_then(|stat| stat.next_start);

        Ok(AlteredJob { job, next_start })
    }
}

#[derive(Debug, Clone)]
pub struct AlteredJob {
    pub job: Job,
    pub next_start: Option<DateTime<Utc>>,
}

fn register_builtin_policies(registry: &mut ActionRegistry, services: &PolicyServices) {
    for kind in PolicyKind::ALL {
        let services = services.clone();
        registry.register_procedure(kind.routine(), move |args, session| {
            let services = services.clone();
            boxed(async move {
                let now = session.transaction_timestamp().ok_or_else(|| {
                    PolicyError::InvariantViolation(format!(
                        "{} executed outside a transaction",
                        kind.proc_name()
                    ))
                })?;
                let services = session.bind_services(&services);
                let run =
                    policy::execute(kind, &services, args.job_id, args.config.as_ref(), now).await?;
                debug!(job_id = args.job_id, ?run, "policy run finished");
                Ok(())
            })
        });
    }
}

/// Jobs per policy kind, user-defined actions counted separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobTypeCounts {
    pub policy_cagg: i32,
    pub policy_compression: i32,
    pub policy_reorder: i32,
    pub policy_retention: i32,
    pub policy_telemetry: i32,
    pub user_defined_action: i32,
}

pub fn job_type_counts(jobs: &[Job]) -> JobTypeCounts {
    let mut counts = JobTypeCounts::default();

    for job in jobs {
        if job.routine.schema != INTERNAL_SCHEMA {
            counts.user_defined_action += 1;
            continue;
        }
        match PolicyKind::from_routine(&job.routine) {
            Some(PolicyKind::Refresh) => counts.policy_cagg += 1,
            Some(PolicyKind::Compression) => counts.policy_compression += 1,
            Some(PolicyKind::Reorder) => counts.policy_reorder += 1,
            Some(PolicyKind::Retention) => counts.policy_retention += 1,
            None if job.routine.name == "policy_telemetry" => counts.policy_telemetry += 1,
            None => {}
        }
    }

    counts
}
