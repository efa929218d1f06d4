pub mod cache;
pub mod model;

pub use cache::{CachedHypertable, HypertableCache};
pub use model::{
    Chunk, ChunkId, ContinuousAgg, Dimension, DimensionSlice, Hypertable, IndexInfo,
    IntegerNowFunc, RelationName,
};

use async_trait::async_trait;

use crate::error::Result;

/// Read-only access to hypertable partition metadata.
#[async_trait]
pub trait PartitionCatalog: Send + Sync {
    async fn get_hypertable(&self, id: i32) -> Result<Option<Hypertable>>;

    /// First open (time-like) dimension of the hypertable.
    async fn get_open_dimension(&self, hypertable: &Hypertable) -> Result<Dimension>;

    async fn find_index(&self, schema: &str, index_name: &str) -> Result<Option<IndexInfo>>;

    /// The `n`-th most recent slice of a dimension by range start, 1-based.
    async fn get_nth_latest_slice(&self, dimension_id: i32, n: usize)
        -> Result<Option<DimensionSlice>>;

    /// Oldest chunk with a slice starting strictly before `before_range_start`
    /// that is neither compressed, dropped, nor recorded in `job_id`'s reorder
    /// ledger.
    async fn find_chunk_for_reorder(
        &self,
        job_id: i32,
        dimension_id: i32,
        before_range_start: i64,
    ) -> Result<Option<ChunkId>>;

    /// Oldest uncompressed, undropped chunk whose slice ends strictly before
    /// `boundary`.
    async fn find_chunk_for_compression(
        &self,
        dimension_id: i32,
        boundary: i64,
    ) -> Result<Option<ChunkId>>;

    async fn resolve_chunk(&self, id: ChunkId) -> Result<Chunk>;

    /// Evaluates the dimension's integer-now function.
    async fn integer_now(&self, dimension: &Dimension) -> Result<i64>;
}

#[async_trait]
pub trait ContinuousAggResolver: Send + Sync {
    async fn find_by_materialization_id(&self, mat_hypertable_id: i32)
        -> Result<Option<ContinuousAgg>>;

    /// Walks materialization -> raw hypertable until an open dimension with an
    /// integer-now function is found.
    async fn find_integer_now_dimension_by_materialization_id(
        &self,
        mat_hypertable_id: i32,
    ) -> Result<Option<Dimension>>;
}
