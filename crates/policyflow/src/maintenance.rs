//! Storage-layer actions the policies delegate to.

use async_trait::async_trait;

use crate::error::Result;
use crate::partitions::{Chunk, ContinuousAgg, RelationName};
use crate::policy::Boundary;
use crate::time::PartitionKeyType;

/// A `[start, end)` window in a dimension's key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshWindow {
    pub key_type: PartitionKeyType,
    pub start: i64,
    pub end: i64,
}

impl RefreshWindow {
    pub fn start_boundary(&self) -> Boundary {
        Boundary {
            value: self.start,
            key_type: self.key_type,
        }
    }

    pub fn end_boundary(&self) -> Boundary {
        Boundary {
            value: self.end,
            key_type: self.key_type,
        }
    }
}

#[async_trait]
pub trait MaintenanceOps: Send + Sync {
    /// Rewrites the chunk ordered by the hypertable index `index`.
    async fn reorder_chunk(&self, chunk: &Chunk, index: &RelationName) -> Result<()>;

    async fn compress_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// Drops every chunk of `relation` lying entirely before `older_than`.
    /// Returns the number of chunks dropped.
    async fn drop_chunks(&self, relation: &RelationName, older_than: Boundary) -> Result<u64>;

    async fn refresh_continuous_aggregate(
        &self,
        cagg: &ContinuousAgg,
        window: RefreshWindow,
    ) -> Result<()>;
}
