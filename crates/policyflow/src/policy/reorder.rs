use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::config::PolicyConfig;
use super::{fast_restart, hypertable_not_found, PolicyContext, PolicyRun, PolicyServices};
use crate::error::{PolicyError, Result};
use crate::partitions::{ChunkId, Dimension, Hypertable, IndexInfo};

/// The most recent slices of the open dimension are still being written to
/// and are never reordered.
pub const REORDER_SKIP_RECENT_DIM_SLICES_N: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ReorderPolicy {
    hypertable: Hypertable,
    dimension: Dimension,
    index: IndexInfo,
}

impl ReorderPolicy {
    pub fn hypertable(&self) -> &Hypertable {
        &self.hypertable
    }

    pub fn index(&self) -> &IndexInfo {
        &self.index
    }

    pub async fn validate(config: Option<&Value>, ctx: &PolicyContext<'_>) -> Result<Self> {
        let cfg = PolicyConfig::new(config)?;
        let htid = cfg.get_i32("hypertable_id")?;
        let index_name = cfg.get_str("index_name")?;

        let hypertable = ctx
            .partitions
            .get_hypertable(htid)
            .await?
            .ok_or_else(|| hypertable_not_found(htid))?;

        let index = ctx
            .partitions
            .find_index(&hypertable.relation.schema, index_name)
            .await?
            .ok_or_else(|| {
                PolicyError::config("reorder index not found")
                    .with_detail(format!("The index \"{index_name}\" could not be found"))
            })?;

        if index.table != hypertable.relation {
            return Err(PolicyError::config("invalid reorder index").with_hint(format!(
                "The reorder index must be an index on hypertable \"{}\".",
                hypertable.relation.name
            )));
        }

        let dimension = ctx.partitions.get_open_dimension(&hypertable).await?;

        Ok(Self {
            hypertable,
            dimension,
            index,
        })
    }

    /// Oldest chunk older than the newest `REORDER_SKIP_RECENT_DIM_SLICES_N`
    /// slices that is uncompressed and has never been reordered by this job.
    /// Slices stand in for chunks, so the skip is approximate on
    /// multi-dimensional hypertables.
    pub async fn select_chunk(
        &self,
        ctx: &PolicyContext<'_>,
        job_id: i32,
    ) -> Result<Option<ChunkId>> {
        let Some(nth) = ctx
            .partitions
            .get_nth_latest_slice(self.dimension.id, REORDER_SKIP_RECENT_DIM_SLICES_N)
            .await?
        else {
            return Ok(None);
        };

        ctx.partitions
            .find_chunk_for_reorder(job_id, self.dimension.id, nth.range_start)
            .await
    }
}

pub(crate) async fn execute(
    services: &PolicyServices,
    job_id: i32,
    config: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<PolicyRun> {
    let ctx = services.context(now);
    let policy = ReorderPolicy::validate(config, &ctx).await?;

    let Some(chunk_id) = policy.select_chunk(&ctx, job_id).await? else {
        info!(
            job_id,
            "no chunks need reordering for hypertable {}", policy.hypertable.relation
        );
        return Ok(PolicyRun::NoWork);
    };

    // The hypertable index is passed; the storage layer maps it to the chunk's index.
    let chunk = services.partitions.resolve_chunk(chunk_id).await?;
    debug!(job_id, chunk = %chunk.relation, "reordering chunk");
    services.ops.reorder_chunk(&chunk, &policy.index.index).await?;
    debug!(job_id, chunk = %chunk.relation, "completed reordering chunk");

    services.jobs.record_run(job_id, chunk_id, now).await?;

    let pending = policy.select_chunk(&ctx, job_id).await.map(|c| c.is_some());
    let fast_restart =
        fast_restart::reschedule_if_pending(services.jobs.as_ref(), job_id, "reorder", now, pending)
            .await;

    Ok(PolicyRun::Reordered {
        chunk_id,
        fast_restart,
    })
}
