use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{PolicyError, Result};
use crate::jobs::{Job, JobCatalog, JobRunStat, RunOutcome, ScheduleFields};
use crate::maintenance::{MaintenanceOps, RefreshWindow};
use crate::partitions::{
    Chunk, ChunkId, ContinuousAgg, ContinuousAggResolver, Dimension, DimensionSlice, Hypertable,
    IndexInfo, IntegerNowFunc, PartitionCatalog, RelationName,
};
use crate::partitions::HypertableCache;
use crate::policy::{Boundary, PolicyServices};
use crate::time::PartitionKeyType;

/// A storage-layer call made through `MaintenanceOps`.
#[derive(Debug, Clone, PartialEq)]
pub enum MaintenanceCall {
    Reorder { chunk_id: ChunkId, index: RelationName },
    Compress { chunk_id: ChunkId },
    DropChunks { relation: RelationName, older_than: Boundary },
    Refresh { mat_hypertable_id: i32, window: RefreshWindow },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRunStat {
    pub num_times_job_run: i32,
    pub last_time_job_run: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    jobs: BTreeMap<i32, Job>,
    stats: HashMap<i32, JobRunStat>,
    chunk_stats: HashMap<(i32, ChunkId), ChunkRunStat>,

    hypertables: HashMap<i32, Hypertable>,
    dimensions: HashMap<i32, Dimension>,
    slices: BTreeMap<i32, DimensionSlice>,
    chunks: BTreeMap<ChunkId, Chunk>,
    chunk_slices: HashMap<ChunkId, Vec<i32>>,
    indexes: HashMap<(String, String), IndexInfo>,
    caggs: HashMap<i32, ContinuousAgg>,
    integer_now: HashMap<i32, i64>,

    calls: Vec<MaintenanceCall>,
}

impl State {
    fn open_dimension(&self, hypertable_id: i32) -> Option<&Dimension> {
        self.dimensions
            .values()
            .filter(|d| d.hypertable_id == hypertable_id)
            .min_by_key(|d| d.id)
    }

    /// Chunks of `dimension_id` with their slice, oldest first.
    fn chunks_on(&self, dimension_id: i32) -> Vec<(&Chunk, &DimensionSlice)> {
        let mut out: Vec<(&Chunk, &DimensionSlice)> = self
            .chunks
            .values()
            .filter_map(|chunk| {
                let slice = self
                    .chunk_slices
                    .get(&chunk.id)?
                    .iter()
                    .filter_map(|sid| self.slices.get(sid))
                    .find(|s| s.dimension_id == dimension_id)?;
                Some((chunk, slice))
            })
            .collect();
        out.sort_by_key(|(chunk, slice)| (slice.range_start, chunk.id));
        out
    }

    fn hypertable_for_relation(&self, relation: &RelationName) -> Option<i32> {
        self.hypertables
            .values()
            .find(|h| &h.relation == relation)
            .map(|h| h.id)
            .or_else(|| {
                self.caggs
                    .values()
                    .find(|c| &c.user_view == relation)
                    .map(|c| c.mat_hypertable_id)
            })
    }
}

/// Jobs, partition metadata and the storage layer in one in-process store.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<State>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// This catalog behind every collaborator, with a fresh cache.
    pub fn services(&self) -> PolicyServices {
        PolicyServices {
            jobs: Arc::new(self.clone()),
            partitions: Arc::new(self.clone()),
            caggs: Arc::new(self.clone()),
            ops: Arc::new(self.clone()),
            cache: HypertableCache::new(),
        }
    }

    // ----------------------------
    // Partition metadata setup
    // ----------------------------

    /// Adds a hypertable whose open dimension has the same id.
    pub fn add_hypertable(&self, id: i32, relation: RelationName, key_type: PartitionKeyType) {
        let mut st = self.state.lock();
        st.hypertables.insert(id, Hypertable { id, relation });
        st.dimensions.insert(
            id,
            Dimension {
                id,
                hypertable_id: id,
                column_name: "time".to_string(),
                key_type,
                integer_now_func: None,
            },
        );
    }

    /// Registers an integer-now function on the hypertable's open dimension
    /// that evaluates to `now`.
    pub fn set_integer_now(&self, hypertable_id: i32, func: IntegerNowFunc, now: i64) {
        let mut st = self.state.lock();
        if let Some(dim) = st.dimensions.get_mut(&hypertable_id) {
            dim.integer_now_func = Some(func);
        }
        st.integer_now.insert(hypertable_id, now);
    }

    /// Changes what an existing integer-now function returns.
    pub fn advance_integer_now(&self, hypertable_id: i32, now: i64) {
        self.state.lock().integer_now.insert(hypertable_id, now);
    }

    /// Adds a chunk covering `[range_start, range_end)` on the open dimension.
    pub fn add_chunk(&self, hypertable_id: i32, chunk_id: ChunkId, range_start: i64, range_end: i64) {
        let mut st = self.state.lock();
        let relation = RelationName::new(
            "_policyflow_chunks",
            format!("_hyper_{hypertable_id}_{chunk_id}_chunk"),
        );
        let slice_id = st.slices.keys().next_back().copied().unwrap_or(0) + 1;
        st.slices.insert(
            slice_id,
            DimensionSlice {
                id: slice_id,
                dimension_id: hypertable_id,
                range_start,
                range_end,
            },
        );
        st.chunks.insert(
            chunk_id,
            Chunk {
                id: chunk_id,
                hypertable_id,
                relation,
                compressed: false,
                dropped: false,
            },
        );
        st.chunk_slices.insert(chunk_id, vec![slice_id]);
    }

    pub fn set_compressed(&self, chunk_id: ChunkId) {
        if let Some(chunk) = self.state.lock().chunks.get_mut(&chunk_id) {
            chunk.compressed = true;
        }
    }

    pub fn rename_hypertable(&self, id: i32, relation: RelationName) {
        if let Some(ht) = self.state.lock().hypertables.get_mut(&id) {
            ht.relation = relation;
        }
    }

    /// Removes the hypertable row only; its dimension and chunks stay behind.
    pub fn remove_hypertable(&self, id: i32) {
        self.state.lock().hypertables.remove(&id);
    }

    pub fn add_index(&self, index: RelationName, table: RelationName) {
        self.state.lock().indexes.insert(
            (index.schema.clone(), index.name.clone()),
            IndexInfo { index, table },
        );
    }

    pub fn add_continuous_agg(&self, cagg: ContinuousAgg) {
        self.state.lock().caggs.insert(cagg.mat_hypertable_id, cagg);
    }

    pub fn chunk(&self, id: ChunkId) -> Option<Chunk> {
        self.state.lock().chunks.get(&id).cloned()
    }

    pub fn calls(&self) -> Vec<MaintenanceCall> {
        self.state.lock().calls.clone()
    }

    // ----------------------------
    // Job setup / inspection
    // ----------------------------

    pub fn insert_job(&self, job: Job) {
        self.state.lock().jobs.insert(job.id, job);
    }

    pub fn insert_run_stat(&self, stat: JobRunStat) {
        self.state.lock().stats.insert(stat.job_id, stat);
    }

    pub fn chunk_run_stat(&self, job_id: i32, chunk_id: ChunkId) -> Option<ChunkRunStat> {
        self.state.lock().chunk_stats.get(&(job_id, chunk_id)).copied()
    }
}

#[async_trait]
impl JobCatalog for MemoryCatalog {
    async fn find_job(&self, id: i32) -> Result<Option<Job>> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.state.lock().jobs.values().cloned().collect())
    }

    async fn update_job_schedule_fields(&self, id: i32, fields: &ScheduleFields) -> Result<()> {
        let mut st = self.state.lock();
        let job = st
            .jobs
            .get_mut(&id)
            .ok_or_else(|| PolicyError::NotFound(format!("job {id}")))?;
        job.schedule_interval = fields.schedule_interval;
        job.max_runtime = fields.max_runtime;
        job.max_retries = fields.max_retries;
        job.retry_period = fields.retry_period;
        job.scheduled = fields.scheduled;
        job.config = fields.config.clone();
        Ok(())
    }

    async fn record_run(&self, job_id: i32, chunk_id: ChunkId, at: DateTime<Utc>) -> Result<()> {
        let mut st = self.state.lock();
        let entry = st.chunk_stats.entry((job_id, chunk_id)).or_insert(ChunkRunStat {
            num_times_job_run: 0,
            last_time_job_run: at,
        });
        entry.num_times_job_run += 1;
        entry.last_time_job_run = at;
        Ok(())
    }

    async fn upsert_next_start(&self, job_id: i32, next_start: DateTime<Utc>) -> Result<()> {
        let mut st = self.state.lock();
        st.stats
            .entry(job_id)
            .or_insert_with(|| JobRunStat::new(job_id))
            .next_start = Some(next_start);
        Ok(())
    }

    async fn get_run_stat(&self, job_id: i32) -> Result<Option<JobRunStat>> {
        Ok(self.state.lock().stats.get(&job_id).cloned())
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let st = self.state.lock();
        let mut due: Vec<(Option<DateTime<Utc>>, Job)> = st
            .jobs
            .values()
            .filter(|j| j.scheduled)
            .filter_map(|j| {
                let next = st.stats.get(&j.id).and_then(|s| s.next_start);
                match next {
                    Some(ts) if ts > now => None,
                    _ => Some((next, j.clone())),
                }
            })
            .collect();
        due.sort_by_key(|(next, job)| (*next, job.id));
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, j)| j)
            .collect())
    }

    async fn mark_start(&self, job_id: i32, at: DateTime<Utc>) -> Result<()> {
        let mut st = self.state.lock();
        let stat = st
            .stats
            .entry(job_id)
            .or_insert_with(|| JobRunStat::new(job_id));
        stat.last_start = Some(at);
        stat.next_start = None;
        stat.total_runs += 1;
        Ok(())
    }

    async fn mark_end(
        &self,
        job_id: i32,
        finished_at: DateTime<Utc>,
        outcome: RunOutcome,
        next_start: DateTime<Utc>,
    ) -> Result<JobRunStat> {
        let mut st = self.state.lock();
        let stat = st
            .stats
            .entry(job_id)
            .or_insert_with(|| JobRunStat::new(job_id));
        stat.last_finish = Some(finished_at);
        match outcome {
            RunOutcome::Succeeded => {
                stat.last_successful_finish = Some(finished_at);
                stat.consecutive_failures = 0;
                stat.next_start = Some(stat.next_start.unwrap_or(next_start));
            }
            RunOutcome::Failed => {
                stat.total_failures += 1;
                stat.consecutive_failures += 1;
                stat.next_start = Some(next_start);
            }
        }
        Ok(stat.clone())
    }
}

#[async_trait]
impl PartitionCatalog for MemoryCatalog {
    async fn get_hypertable(&self, id: i32) -> Result<Option<Hypertable>> {
        Ok(self.state.lock().hypertables.get(&id).cloned())
    }

    async fn get_open_dimension(&self, hypertable: &Hypertable) -> Result<Dimension> {
        self.state
            .lock()
            .open_dimension(hypertable.id)
            .cloned()
            .ok_or_else(|| {
                PolicyError::NotFound(format!("open dimension of hypertable {}", hypertable.relation))
            })
    }

    async fn find_index(&self, schema: &str, index_name: &str) -> Result<Option<IndexInfo>> {
        Ok(self
            .state
            .lock()
            .indexes
            .get(&(schema.to_string(), index_name.to_string()))
            .cloned())
    }

    async fn get_nth_latest_slice(
        &self,
        dimension_id: i32,
        n: usize,
    ) -> Result<Option<DimensionSlice>> {
        if n == 0 {
            return Ok(None);
        }
        let st = self.state.lock();
        let mut live: Vec<&DimensionSlice> = st
            .chunks_on(dimension_id)
            .into_iter()
            .filter(|(chunk, _)| !chunk.dropped)
            .map(|(_, slice)| slice)
            .collect();
        live.sort_by_key(|s| std::cmp::Reverse((s.range_start, s.id)));
        live.dedup_by_key(|s| s.id);
        Ok(live.get(n - 1).map(|s| (*s).clone()))
    }

    async fn find_chunk_for_reorder(
        &self,
        job_id: i32,
        dimension_id: i32,
        before_range_start: i64,
    ) -> Result<Option<ChunkId>> {
        let st = self.state.lock();
        Ok(st
            .chunks_on(dimension_id)
            .into_iter()
            .find(|(chunk, slice)| {
                slice.range_start < before_range_start
                    && !chunk.compressed
                    && !chunk.dropped
                    && !st.chunk_stats.contains_key(&(job_id, chunk.id))
            })
            .map(|(chunk, _)| chunk.id))
    }

    async fn find_chunk_for_compression(
        &self,
        dimension_id: i32,
        boundary: i64,
    ) -> Result<Option<ChunkId>> {
        let st = self.state.lock();
        Ok(st
            .chunks_on(dimension_id)
            .into_iter()
            .find(|(chunk, slice)| slice.range_end < boundary && !chunk.compressed && !chunk.dropped)
            .map(|(chunk, _)| chunk.id))
    }

    async fn resolve_chunk(&self, id: ChunkId) -> Result<Chunk> {
        self.state
            .lock()
            .chunks
            .get(&id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(format!("chunk {id}")))
    }

    async fn integer_now(&self, dimension: &Dimension) -> Result<i64> {
        self.state
            .lock()
            .integer_now
            .get(&dimension.id)
            .copied()
            .ok_or_else(|| {
                PolicyError::NotFound(format!(
                    "integer_now function for dimension \"{}\"",
                    dimension.column_name
                ))
            })
    }
}

#[async_trait]
impl ContinuousAggResolver for MemoryCatalog {
    async fn find_by_materialization_id(
        &self,
        mat_hypertable_id: i32,
    ) -> Result<Option<ContinuousAgg>> {
        Ok(self.state.lock().caggs.get(&mat_hypertable_id).cloned())
    }

    async fn find_integer_now_dimension_by_materialization_id(
        &self,
        mat_hypertable_id: i32,
    ) -> Result<Option<Dimension>> {
        let st = self.state.lock();
        let mut htid = Some(mat_hypertable_id);
        // bounded by the number of hypertables in case of a cyclic catalog
        for _ in 0..=st.hypertables.len() {
            let Some(id) = htid else { break };
            if let Some(dim) = st.open_dimension(id) {
                if dim.integer_now_func.is_some() {
                    return Ok(Some(dim.clone()));
                }
            }
            htid = st.caggs.get(&id).map(|c| c.raw_hypertable_id);
        }
        Ok(None)
    }
}

#[async_trait]
impl MaintenanceOps for MemoryCatalog {
    async fn reorder_chunk(&self, chunk: &Chunk, index: &RelationName) -> Result<()> {
        self.state.lock().calls.push(MaintenanceCall::Reorder {
            chunk_id: chunk.id,
            index: index.clone(),
        });
        Ok(())
    }

    async fn compress_chunk(&self, chunk: &Chunk) -> Result<()> {
        let mut st = self.state.lock();
        let stored = st
            .chunks
            .get_mut(&chunk.id)
            .ok_or_else(|| PolicyError::NotFound(format!("chunk {}", chunk.id)))?;
        if stored.compressed {
            return Err(PolicyError::Action(format!(
                "chunk \"{}\" is already compressed",
                stored.relation
            )));
        }
        stored.compressed = true;
        st.calls.push(MaintenanceCall::Compress { chunk_id: chunk.id });
        Ok(())
    }

    async fn drop_chunks(&self, relation: &RelationName, older_than: Boundary) -> Result<u64> {
        let mut st = self.state.lock();
        let htid = st.hypertable_for_relation(relation).ok_or_else(|| {
            PolicyError::Action(format!("\"{relation}\" is not a hypertable or a continuous aggregate"))
        })?;
        let dim_id = st
            .open_dimension(htid)
            .map(|d| d.id)
            .ok_or_else(|| PolicyError::NotFound(format!("open dimension of {relation}")))?;

        let doomed: Vec<ChunkId> = st
            .chunks_on(dim_id)
            .into_iter()
            .filter(|(chunk, slice)| !chunk.dropped && slice.range_end <= older_than.value)
            .map(|(chunk, _)| chunk.id)
            .collect();
        for id in &doomed {
            if let Some(chunk) = st.chunks.get_mut(id) {
                chunk.dropped = true;
            }
        }
        st.calls.push(MaintenanceCall::DropChunks {
            relation: relation.clone(),
            older_than,
        });
        Ok(doomed.len() as u64)
    }

    async fn refresh_continuous_aggregate(
        &self,
        cagg: &ContinuousAgg,
        window: RefreshWindow,
    ) -> Result<()> {
        self.state.lock().calls.push(MaintenanceCall::Refresh {
            mat_hypertable_id: cagg.mat_hypertable_id,
            window,
        });
        Ok(())
    }
}
