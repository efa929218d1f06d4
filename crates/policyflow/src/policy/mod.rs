//! Policy descriptors, their validators and their unit-of-work selectors.

pub mod boundary;
pub mod compression;
pub(crate) mod config;
pub mod fast_restart;
pub mod refresh;
pub mod reorder;
pub mod retention;

pub use boundary::{window_boundary, Boundary};
pub use compression::CompressionPolicy;
pub use refresh::RefreshPolicy;
pub use reorder::ReorderPolicy;
pub use retention::RetentionPolicy;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{PolicyError, Result};
use crate::jobs::{JobCatalog, RoutineName};
use crate::maintenance::{MaintenanceOps, RefreshWindow};
use crate::partitions::{
    ChunkId, ContinuousAggResolver, Dimension, Hypertable, HypertableCache, PartitionCatalog,
    RelationName,
};

/// Schema holding the engine's built-in policy routines.
pub const INTERNAL_SCHEMA: &str = "_policyflow_internal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Reorder,
    Retention,
    Compression,
    Refresh,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 4] = [
        PolicyKind::Reorder,
        PolicyKind::Retention,
        PolicyKind::Compression,
        PolicyKind::Refresh,
    ];

    pub fn proc_name(&self) -> &'static str {
        match self {
            PolicyKind::Reorder => "policy_reorder",
            PolicyKind::Retention => "policy_retention",
            PolicyKind::Compression => "policy_compression",
            PolicyKind::Refresh => "policy_refresh_continuous_aggregate",
        }
    }

    pub fn routine(&self) -> RoutineName {
        RoutineName::new(INTERNAL_SCHEMA, self.proc_name())
    }

    pub fn from_routine(routine: &RoutineName) -> Option<Self> {
        if routine.schema != INTERNAL_SCHEMA {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|k| k.proc_name() == routine.name)
    }
}

/// A validated policy. Only the per-kind validators construct these, and each
/// run derives a fresh one from the job's current config.
#[derive(Debug, PartialEq)]
pub enum PolicyDescriptor {
    Reorder(ReorderPolicy),
    Retention(RetentionPolicy),
    Compression(CompressionPolicy),
    Refresh(RefreshPolicy),
}

impl PolicyDescriptor {
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicyDescriptor::Reorder(_) => PolicyKind::Reorder,
            PolicyDescriptor::Retention(_) => PolicyKind::Retention,
            PolicyDescriptor::Compression(_) => PolicyKind::Compression,
            PolicyDescriptor::Refresh(_) => PolicyKind::Refresh,
        }
    }
}

/// Read-side collaborators plus the "now" a validation is evaluated at.
#[derive(Clone, Copy)]
pub struct PolicyContext<'a> {
    pub partitions: &'a dyn PartitionCatalog,
    pub caggs: &'a dyn ContinuousAggResolver,
    pub cache: &'a HypertableCache,
    pub now: DateTime<Utc>,
}

/// Everything a policy run touches.
#[derive(Clone)]
pub struct PolicyServices {
    pub jobs: Arc<dyn JobCatalog>,
    pub partitions: Arc<dyn PartitionCatalog>,
    pub caggs: Arc<dyn ContinuousAggResolver>,
    pub ops: Arc<dyn MaintenanceOps>,
    pub cache: HypertableCache,
}

impl PolicyServices {
    pub fn context(&self, now: DateTime<Utc>) -> PolicyContext<'_> {
        PolicyContext {
            partitions: self.partitions.as_ref(),
            caggs: self.caggs.as_ref(),
            cache: &self.cache,
            now,
        }
    }
}

/// What one policy execution did.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyRun {
    NoWork,
    Reordered {
        chunk_id: ChunkId,
        fast_restart: bool,
    },
    Compressed {
        chunk_id: ChunkId,
        fast_restart: bool,
    },
    Dropped {
        target: RelationName,
        boundary: Boundary,
        chunks: u64,
    },
    Refreshed {
        window: RefreshWindow,
    },
}

/// Decodes and validates `config` as a `kind` policy.
pub async fn validate(
    kind: PolicyKind,
    config: Option<&Value>,
    ctx: &PolicyContext<'_>,
) -> Result<PolicyDescriptor> {
    Ok(match kind {
        PolicyKind::Reorder => PolicyDescriptor::Reorder(ReorderPolicy::validate(config, ctx).await?),
        PolicyKind::Retention => {
            PolicyDescriptor::Retention(RetentionPolicy::validate(config, ctx).await?)
        }
        PolicyKind::Compression => {
            PolicyDescriptor::Compression(CompressionPolicy::validate(config, ctx).await?)
        }
        PolicyKind::Refresh => PolicyDescriptor::Refresh(RefreshPolicy::validate(config, ctx).await?),
    })
}

/// Runs one policy end to end: validate, select, act, maybe fast-restart.
pub async fn execute(
    kind: PolicyKind,
    services: &PolicyServices,
    job_id: i32,
    config: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<PolicyRun> {
    match kind {
        PolicyKind::Reorder => reorder::execute(services, job_id, config, now).await,
        PolicyKind::Retention => retention::execute(services, config, now).await,
        PolicyKind::Compression => compression::execute(services, job_id, config, now).await,
        PolicyKind::Refresh => refresh::execute(services, config, now).await,
    }
}

/// The dimension boundary math runs against. Integer-keyed hypertables (and
/// continuous-aggregate materializations in particular) resolve it through the
/// integer-now chain.
pub(crate) async fn open_dimension_for_boundary(
    ctx: &PolicyContext<'_>,
    hypertable: &Hypertable,
) -> Result<Dimension> {
    let open_dim = ctx.partitions.get_open_dimension(hypertable).await?;
    if !open_dim.key_type.is_integer() {
        return Ok(open_dim);
    }

    ctx.caggs
        .find_integer_now_dimension_by_materialization_id(hypertable.id)
        .await?
        .ok_or_else(|| {
            PolicyError::config(format!(
                "missing integer now function for hypertable \"{}\"",
                hypertable.relation
            ))
        })
}

pub(crate) fn hypertable_not_found(id: i32) -> PolicyError {
    PolicyError::config(format!("configuration hypertable id {id} not found"))
}
