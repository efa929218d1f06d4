use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use super::config::PolicyConfig;
use super::{open_dimension_for_boundary, window_boundary, PolicyContext, PolicyRun, PolicyServices};
use crate::error::{PolicyError, Result};
use crate::maintenance::RefreshWindow;
use crate::partitions::{ContinuousAgg, Dimension};
use crate::time::Lag;

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPolicy {
    cagg: ContinuousAgg,
    start_offset: Option<Lag>,
    end_offset: Option<Lag>,
    window: RefreshWindow,
}

impl RefreshPolicy {
    pub fn continuous_agg(&self) -> &ContinuousAgg {
        &self.cagg
    }

    pub fn window(&self) -> RefreshWindow {
        self.window
    }

    pub fn offsets(&self) -> (Option<Lag>, Option<Lag>) {
        (self.start_offset, self.end_offset)
    }

    pub async fn validate(config: Option<&Value>, ctx: &PolicyContext<'_>) -> Result<Self> {
        let cfg = PolicyConfig::new(config)?;
        let mat_id = cfg.get_i32("mat_hypertable_id")?;
        let start_offset = cfg.get_optional_lag("start_offset")?;
        let end_offset = cfg.get_optional_lag("end_offset")?;

        let mat_ht = ctx.partitions.get_hypertable(mat_id).await?.ok_or_else(|| {
            PolicyError::config(format!(
                "configuration materialization hypertable id {mat_id} not found"
            ))
        })?;
        let cagg = ctx
            .caggs
            .find_by_materialization_id(mat_id)
            .await?
            .ok_or_else(|| {
                PolicyError::config(format!(
                    "no continuous aggregate uses materialization hypertable \"{}\"",
                    mat_ht.relation
                ))
            })?;

        let open_dim = open_dimension_for_boundary(ctx, &mat_ht).await?;
        let key_type = open_dim.key_type;
        let start = offset_to_value(ctx, &open_dim, start_offset, key_type.min_value()).await?;
        let end = offset_to_value(ctx, &open_dim, end_offset, key_type.max_value()).await?;

        if start >= end {
            return Err(PolicyError::config("invalid refresh window")
                .with_detail(format!(
                    "start_offset: {}, end_offset: {}",
                    key_type.format_value(start),
                    key_type.format_value(end)
                ))
                .with_hint("The start of the window must be before the end."));
        }

        Ok(Self {
            cagg,
            start_offset,
            end_offset,
            window: RefreshWindow {
                key_type,
                start,
                end,
            },
        })
    }
}

/// `now - offset`, or `unbounded` when no offset is configured.
async fn offset_to_value(
    ctx: &PolicyContext<'_>,
    dim: &Dimension,
    offset: Option<Lag>,
    unbounded: i64,
) -> Result<i64> {
    match offset {
        Some(lag) => Ok(window_boundary(ctx.partitions, dim, lag, ctx.now).await?.value),
        None => Ok(unbounded),
    }
}

pub(crate) async fn execute(
    services: &PolicyServices,
    config: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<PolicyRun> {
    let policy = RefreshPolicy::validate(config, &services.context(now)).await?;
    let window = policy.window;

    info!(
        "refresh continuous aggregate range {} , {}",
        window.start_boundary(),
        window.end_boundary()
    );
    services
        .ops
        .refresh_continuous_aggregate(&policy.cagg, window)
        .await?;

    Ok(PolicyRun::Refreshed { window })
}
