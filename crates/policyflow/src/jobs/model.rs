use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::fmt;

/// Schema-qualified name of the routine a job invokes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutineName {
    pub schema: String,
    pub name: String,
}

impl RoutineName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RoutineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: i32,
    pub application_name: String,
    pub routine: RoutineName,
    pub schedule_interval: Duration,
    /// Advisory only; zero means unlimited.
    pub max_runtime: Duration,
    /// Negative means retry forever.
    pub max_retries: i32,
    pub retry_period: Duration,
    pub scheduled: bool,
    pub config: Option<Value>,
    pub owner: String,
    pub hypertable_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRunStat {
    pub job_id: i32,
    pub last_start: Option<DateTime<Utc>>,
    pub last_finish: Option<DateTime<Utc>>,
    /// `None` until someone (the scheduler, or the job itself) sets it.
    pub next_start: Option<DateTime<Utc>>,
    pub last_successful_finish: Option<DateTime<Utc>>,
    pub total_runs: i64,
    pub total_failures: i64,
    pub consecutive_failures: i32,
}

impl JobRunStat {
    pub fn new(job_id: i32) -> Self {
        Self {
            job_id,
            last_start: None,
            last_finish: None,
            next_start: None,
            last_successful_finish: None,
            total_runs: 0,
            total_failures: 0,
            consecutive_failures: 0,
        }
    }
}

/// The job fields `alter_job` may overwrite.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleFields {
    pub schedule_interval: Duration,
    pub max_runtime: Duration,
    pub max_retries: i32,
    pub retry_period: Duration,
    pub scheduled: bool,
    pub config: Option<Value>,
}

impl From<&Job> for ScheduleFields {
    fn from(job: &Job) -> Self {
        Self {
            schedule_interval: job.schedule_interval,
            max_runtime: job.max_runtime,
            max_retries: job.max_retries,
            retry_period: job.retry_period,
            scheduled: job.scheduled,
            config: job.config.clone(),
        }
    }
}

/// A partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct JobAlteration {
    pub schedule_interval: Option<Duration>,
    pub max_runtime: Option<Duration>,
    pub max_retries: Option<i32>,
    pub retry_period: Option<Duration>,
    pub scheduled: Option<bool>,
    pub config: Option<Value>,
    pub next_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
        }
    }
}
