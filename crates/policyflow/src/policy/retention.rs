use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use super::config::PolicyConfig;
use super::{
    hypertable_not_found, open_dimension_for_boundary, window_boundary, Boundary, PolicyContext,
    PolicyRun, PolicyServices,
};
use crate::error::Result;
use crate::partitions::{Hypertable, RelationName};
use crate::time::Lag;

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    hypertable: Hypertable,
    drop_after: Lag,
    boundary: Boundary,
    target: RelationName,
}

impl RetentionPolicy {
    pub fn hypertable(&self) -> &Hypertable {
        &self.hypertable
    }

    pub fn drop_after(&self) -> Lag {
        self.drop_after
    }

    /// Chunks lying entirely before this are dropped.
    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// The object `drop_chunks` acts on: the hypertable itself, or the user
    /// view when the hypertable materializes a continuous aggregate.
    pub fn target(&self) -> &RelationName {
        &self.target
    }

    pub async fn validate(config: Option<&Value>, ctx: &PolicyContext<'_>) -> Result<Self> {
        let cfg = PolicyConfig::new(config)?;
        let htid = cfg.get_i32("hypertable_id")?;
        let drop_after = cfg.get_lag("drop_after")?;

        let hypertable = {
            let cached = ctx
                .cache
                .acquire(ctx.partitions, htid)
                .await?
                .ok_or_else(|| hypertable_not_found(htid))?;
            cached.hypertable().clone()
        };

        let open_dim = open_dimension_for_boundary(ctx, &hypertable).await?;
        let boundary = window_boundary(ctx.partitions, &open_dim, drop_after, ctx.now).await?;

        let target = match ctx.caggs.find_by_materialization_id(hypertable.id).await? {
            Some(cagg) => cagg.user_view,
            None => hypertable.relation.clone(),
        };

        Ok(Self {
            hypertable,
            drop_after,
            boundary,
            target,
        })
    }
}

pub(crate) async fn execute(
    services: &PolicyServices,
    config: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<PolicyRun> {
    let policy = RetentionPolicy::validate(config, &services.context(now)).await?;

    let chunks = services
        .ops
        .drop_chunks(&policy.target, policy.boundary)
        .await?;
    info!(
        target_relation = %policy.target,
        older_than = %policy.boundary,
        chunks,
        "dropped chunks"
    );

    Ok(PolicyRun::Dropped {
        target: policy.target,
        boundary: policy.boundary,
        chunks,
    })
}
