use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::config::PolicyConfig;
use super::{
    fast_restart, hypertable_not_found, window_boundary, PolicyContext, PolicyRun, PolicyServices,
};
use crate::error::Result;
use crate::partitions::{CachedHypertable, ChunkId, Dimension};
use crate::time::Lag;

/// Holds a pinned cache entry for its hypertable; dropping the policy
/// releases it.
#[derive(Debug, PartialEq)]
pub struct CompressionPolicy {
    hypertable: CachedHypertable,
    dimension: Dimension,
    compress_after: Lag,
}

impl CompressionPolicy {
    pub fn hypertable(&self) -> &CachedHypertable {
        &self.hypertable
    }

    pub fn compress_after(&self) -> Lag {
        self.compress_after
    }

    pub async fn validate(config: Option<&Value>, ctx: &PolicyContext<'_>) -> Result<Self> {
        let cfg = PolicyConfig::new(config)?;
        let htid = cfg.get_i32("hypertable_id")?;
        let compress_after = cfg.get_lag("compress_after")?;

        let hypertable = ctx
            .cache
            .acquire(ctx.partitions, htid)
            .await?
            .ok_or_else(|| hypertable_not_found(htid))?;
        let dimension = ctx
            .partitions
            .get_open_dimension(hypertable.hypertable())
            .await?;

        // a lag of the wrong kind fails here rather than on first run
        window_boundary(ctx.partitions, &dimension, compress_after, ctx.now).await?;

        Ok(Self {
            hypertable,
            dimension,
            compress_after,
        })
    }

    /// Oldest uncompressed chunk ending strictly before `now - compress_after`.
    pub async fn select_chunk(&self, ctx: &PolicyContext<'_>) -> Result<Option<ChunkId>> {
        let boundary =
            window_boundary(ctx.partitions, &self.dimension, self.compress_after, ctx.now).await?;
        ctx.partitions
            .find_chunk_for_compression(self.dimension.id, boundary.value)
            .await
    }
}

/// Compresses at most one chunk per run.
pub(crate) async fn execute(
    services: &PolicyServices,
    job_id: i32,
    config: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<PolicyRun> {
    let ctx = services.context(now);
    let policy = CompressionPolicy::validate(config, &ctx).await?;

    let Some(chunk_id) = policy.select_chunk(&ctx).await? else {
        info!(
            job_id,
            "no chunks for hypertable {} that satisfy compress chunk policy",
            policy.hypertable.hypertable().relation
        );
        return Ok(PolicyRun::NoWork);
    };

    let chunk = services.partitions.resolve_chunk(chunk_id).await?;
    services.ops.compress_chunk(&chunk).await?;
    info!(job_id, chunk = %chunk.relation, "completed compressing chunk");

    let pending = policy.select_chunk(&ctx).await.map(|c| c.is_some());
    let fast_restart = fast_restart::reschedule_if_pending(
        services.jobs.as_ref(),
        job_id,
        "compression",
        now,
        pending,
    )
    .await;

    debug!(job_id, "job completed compressing chunk");
    Ok(PolicyRun::Compressed {
        chunk_id,
        fast_restart,
    })
}
