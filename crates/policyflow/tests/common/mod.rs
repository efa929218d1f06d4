#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use policyflow::jobs::{Job, RoutineName};
use policyflow::memory::MemoryCatalog;
use policyflow::partitions::{ContinuousAgg, IntegerNowFunc, RelationName};
use policyflow::policy::PolicyKind;
use policyflow::time::{datetime_to_internal, PartitionKeyType};
use policyflow::PolicyEngine;
use serde_json::Value;

pub const CONDITIONS: i32 = 1;
pub const CONDITIONS_DAILY_MAT: i32 = 2;
pub const READINGS: i32 = 10;
pub const READINGS_MAT: i32 = 11;

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid rfc3339")
        .with_timezone(&Utc)
}

/// Every test runs at this instant.
pub fn now() -> DateTime<Utc> {
    ts("2024-06-01T00:00:00Z")
}

pub fn micros(s: &str) -> i64 {
    datetime_to_internal(ts(s))
}

pub fn conditions() -> RelationName {
    RelationName::new("public", "conditions")
}

pub fn conditions_time_idx() -> RelationName {
    RelationName::new("public", "conditions_time_idx")
}

pub fn conditions_daily() -> RelationName {
    RelationName::new("public", "conditions_daily")
}

pub struct Fixture {
    pub catalog: MemoryCatalog,
    pub engine: PolicyEngine,
}

pub fn fixture() -> Fixture {
    let catalog = MemoryCatalog::new();
    let engine = PolicyEngine::new(catalog.services());
    Fixture { catalog, engine }
}

/// `public.conditions`, timestamptz-partitioned with a time index, and a
/// daily continuous aggregate materialized into hypertable 2.
pub fn seed_conditions(catalog: &MemoryCatalog) {
    catalog.add_hypertable(CONDITIONS, conditions(), PartitionKeyType::TimestampTz);
    catalog.add_index(conditions_time_idx(), conditions());

    catalog.add_hypertable(
        CONDITIONS_DAILY_MAT,
        RelationName::new("_policyflow_internal", "_materialized_hypertable_2"),
        PartitionKeyType::TimestampTz,
    );
    catalog.add_continuous_agg(ContinuousAgg {
        mat_hypertable_id: CONDITIONS_DAILY_MAT,
        raw_hypertable_id: CONDITIONS,
        user_view: conditions_daily(),
    });
}

/// Adds one-day chunks to `hypertable`, starting at each given date.
pub fn add_day_chunks(catalog: &MemoryCatalog, hypertable: i32, first_chunk_id: i32, days: &[&str]) {
    for (i, day) in days.iter().enumerate() {
        let start = ts(&format!("{day}T00:00:00Z"));
        let end = start + Duration::days(1);
        catalog.add_chunk(
            hypertable,
            first_chunk_id + i as i32,
            datetime_to_internal(start),
            datetime_to_internal(end),
        );
    }
}

/// `public.readings`, bigint-partitioned with `integer_now() = now`, and an
/// aggregate on it materialized into a bigint hypertable without its own
/// integer-now function.
pub fn seed_readings(catalog: &MemoryCatalog, integer_now: Option<i64>) {
    catalog.add_hypertable(
        READINGS,
        RelationName::new("public", "readings"),
        PartitionKeyType::BigInt,
    );
    if let Some(now) = integer_now {
        catalog.set_integer_now(
            READINGS,
            IntegerNowFunc {
                schema: "public".into(),
                name: "readings_now".into(),
            },
            now,
        );
    }
    catalog.add_hypertable(
        READINGS_MAT,
        RelationName::new("_policyflow_internal", "_materialized_hypertable_11"),
        PartitionKeyType::BigInt,
    );
    catalog.add_continuous_agg(ContinuousAgg {
        mat_hypertable_id: READINGS_MAT,
        raw_hypertable_id: READINGS,
        user_view: RelationName::new("public", "readings_hourly"),
    });
}

pub fn job(id: i32, routine: RoutineName, config: Option<Value>) -> Job {
    Job {
        id,
        application_name: format!("job {id}"),
        routine,
        schedule_interval: Duration::hours(1),
        max_runtime: Duration::zero(),
        max_retries: -1,
        retry_period: Duration::minutes(5),
        scheduled: true,
        config,
        owner: "postgres".into(),
        hypertable_id: None,
    }
}

pub fn policy_job(id: i32, kind: PolicyKind, config: Value) -> Job {
    job(id, kind.routine(), Some(config))
}
