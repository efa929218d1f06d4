use async_trait::async_trait;
use super::conn::PgTarget;

use crate::error::{PolicyError, Result};
use crate::partitions::{
    Chunk, ChunkId, ContinuousAgg, ContinuousAggResolver, Dimension, DimensionSlice, Hypertable,
    IndexInfo, IntegerNowFunc, PartitionCatalog, RelationName,
};
use crate::time::PartitionKeyType;

/// Walks at most this many materialization levels.
const MAX_CAGG_DEPTH: i32 = 32;

#[derive(sqlx::FromRow)]
struct DimensionRow {
    id: i32,
    hypertable_id: i32,
    column_name: String,
    column_type: String,
    integer_now_func_schema: Option<String>,
    integer_now_func: Option<String>,
}

impl TryFrom<DimensionRow> for Dimension {
    type Error = PolicyError;

    fn try_from(r: DimensionRow) -> Result<Self> {
        let key_type = PartitionKeyType::parse(&r.column_type).ok_or_else(|| {
            PolicyError::InvariantViolation(format!(
                "unexpected partitioning column type \"{}\" for dimension {}",
                r.column_type, r.id
            ))
        })?;
        let integer_now_func = match (r.integer_now_func_schema, r.integer_now_func) {
            (Some(schema), Some(name)) => Some(IntegerNowFunc { schema, name }),
            _ => None,
        };
        Ok(Dimension {
            id: r.id,
            hypertable_id: r.hypertable_id,
            column_name: r.column_name,
            key_type,
            integer_now_func,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SliceRow {
    id: i32,
    dimension_id: i32,
    range_start: i64,
    range_end: i64,
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    id: i32,
    hypertable_id: i32,
    schema_name: String,
    table_name: String,
    compressed: bool,
    dropped: bool,
}

#[derive(sqlx::FromRow)]
struct CaggRow {
    mat_hypertable_id: i32,
    raw_hypertable_id: i32,
    user_view_schema: String,
    user_view_name: String,
}

impl From<CaggRow> for ContinuousAgg {
    fn from(r: CaggRow) -> Self {
        ContinuousAgg {
            mat_hypertable_id: r.mat_hypertable_id,
            raw_hypertable_id: r.raw_hypertable_id,
            user_view: RelationName::new(r.user_view_schema, r.user_view_name),
        }
    }
}

/// Reads `hypertable`, `dimension`, `dimension_slice` and `chunk`.
#[derive(Clone)]
pub struct PgPartitionCatalog {
    db: PgTarget,
}

impl PgPartitionCatalog {
    pub fn new(db: impl Into<PgTarget>) -> Self {
        Self { db: db.into() }
    }
}

#[async_trait]
impl PartitionCatalog for PgPartitionCatalog {
    async fn get_hypertable(&self, id: i32) -> Result<Option<Hypertable>> {
        let row = sqlx::query_as::<_, (i32, String, String)>(
            "SELECT id, schema_name, table_name FROM hypertable WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?;
        Ok(row.map(|(id, schema, name)| Hypertable {
            id,
            relation: RelationName::new(schema, name),
        }))
    }

    async fn get_open_dimension(&self, hypertable: &Hypertable) -> Result<Dimension> {
        let row = sqlx::query_as::<_, DimensionRow>(
            r#"
            SELECT id, hypertable_id, column_name, column_type,
                   integer_now_func_schema, integer_now_func
            FROM dimension
            WHERE hypertable_id = $1 AND interval_length IS NOT NULL
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(hypertable.id)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?
        .ok_or_else(|| {
            PolicyError::NotFound(format!(
                "open dimension of hypertable \"{}\"",
                hypertable.relation
            ))
        })?;
        row.try_into()
    }

    async fn find_index(&self, schema: &str, index_name: &str) -> Result<Option<IndexInfo>> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            r#"
            SELECT ins.nspname::text, ic.relname::text, tns.nspname::text, tc.relname::text
            FROM pg_index i
            JOIN pg_class ic ON ic.oid = i.indexrelid
            JOIN pg_namespace ins ON ins.oid = ic.relnamespace
            JOIN pg_class tc ON tc.oid = i.indrelid
            JOIN pg_namespace tns ON tns.oid = tc.relnamespace
            WHERE ins.nspname = $1 AND ic.relname = $2
            "#,
        )
        .bind(schema)
        .bind(index_name)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?;
        Ok(row.map(|(ischema, iname, tschema, tname)| IndexInfo {
            index: RelationName::new(ischema, iname),
            table: RelationName::new(tschema, tname),
        }))
    }

    async fn get_nth_latest_slice(
        &self,
        dimension_id: i32,
        n: usize,
    ) -> Result<Option<DimensionSlice>> {
        if n == 0 {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, SliceRow>(
            r#"
            SELECT ds.id, ds.dimension_id, ds.range_start, ds.range_end
            FROM dimension_slice ds
            WHERE ds.dimension_id = $1
              AND EXISTS (
                SELECT 1
                FROM chunk_constraint cc
                JOIN chunk c ON c.id = cc.chunk_id
                WHERE cc.dimension_slice_id = ds.id AND NOT c.dropped
              )
            ORDER BY ds.range_start DESC, ds.id DESC
            OFFSET $2
            LIMIT 1
            "#,
        )
        .bind(dimension_id)
        .bind(n as i64 - 1)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?;
        Ok(row.map(|r| DimensionSlice {
            id: r.id,
            dimension_id: r.dimension_id,
            range_start: r.range_start,
            range_end: r.range_end,
        }))
    }

    async fn find_chunk_for_reorder(
        &self,
        job_id: i32,
        dimension_id: i32,
        before_range_start: i64,
    ) -> Result<Option<ChunkId>> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT c.id
            FROM chunk c
            JOIN chunk_constraint cc ON cc.chunk_id = c.id
            JOIN dimension_slice ds ON ds.id = cc.dimension_slice_id
            WHERE ds.dimension_id = $2
              AND ds.range_start < $3
              AND NOT c.compressed
              AND NOT c.dropped
              AND NOT EXISTS (
                SELECT 1 FROM bgw_policy_chunk_stats st
                WHERE st.job_id = $1 AND st.chunk_id = c.id
              )
            ORDER BY ds.range_start ASC, c.id ASC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .bind(dimension_id)
        .bind(before_range_start)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?;
        Ok(id)
    }

    async fn find_chunk_for_compression(
        &self,
        dimension_id: i32,
        boundary: i64,
    ) -> Result<Option<ChunkId>> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT c.id
            FROM chunk c
            JOIN chunk_constraint cc ON cc.chunk_id = c.id
            JOIN dimension_slice ds ON ds.id = cc.dimension_slice_id
            WHERE ds.dimension_id = $1
              AND ds.range_end < $2
              AND NOT c.compressed
              AND NOT c.dropped
            ORDER BY ds.range_start ASC, c.id ASC
            LIMIT 1
            "#,
        )
        .bind(dimension_id)
        .bind(boundary)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?;
        Ok(id)
    }

    async fn resolve_chunk(&self, id: ChunkId) -> Result<Chunk> {
        let row = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT id, hypertable_id, schema_name, table_name, compressed, dropped
            FROM chunk
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?
        .ok_or_else(|| PolicyError::NotFound(format!("chunk {id}")))?;
        Ok(Chunk {
            id: row.id,
            hypertable_id: row.hypertable_id,
            relation: RelationName::new(row.schema_name, row.table_name),
            compressed: row.compressed,
            dropped: row.dropped,
        })
    }

    async fn integer_now(&self, dimension: &Dimension) -> Result<i64> {
        let func = dimension.integer_now_func.as_ref().ok_or_else(|| {
            PolicyError::NotFound(format!(
                "integer_now function for dimension \"{}\"",
                dimension.column_name
            ))
        })?;
        // identifiers cannot be bound; quote them instead
        let sql = format!(
            "SELECT ({}())::bigint",
            RelationName::new(func.schema.as_str(), func.name.as_str()).quoted()
        );
        let now = sqlx::query_scalar::<_, Option<i64>>(&sql)
            .fetch_one(&mut *self.db.acquire().await?)
            .await?;
        now.ok_or_else(|| {
            PolicyError::config(format!(
                "integer_now function {}.{} returned NULL",
                func.schema, func.name
            ))
        })
    }
}

/// Reads `continuous_agg`.
#[derive(Clone)]
pub struct PgCaggResolver {
    db: PgTarget,
}

impl PgCaggResolver {
    pub fn new(db: impl Into<PgTarget>) -> Self {
        Self { db: db.into() }
    }
}

#[async_trait]
impl ContinuousAggResolver for PgCaggResolver {
    async fn find_by_materialization_id(
        &self,
        mat_hypertable_id: i32,
    ) -> Result<Option<ContinuousAgg>> {
        let row = sqlx::query_as::<_, CaggRow>(
            r#"
            SELECT mat_hypertable_id, raw_hypertable_id, user_view_schema, user_view_name
            FROM continuous_agg
            WHERE mat_hypertable_id = $1
            "#,
        )
        .bind(mat_hypertable_id)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?;
        Ok(row.map(ContinuousAgg::from))
    }

    async fn find_integer_now_dimension_by_materialization_id(
        &self,
        mat_hypertable_id: i32,
    ) -> Result<Option<Dimension>> {
        let row = sqlx::query_as::<_, DimensionRow>(
            r#"
            WITH RECURSIVE chain (hypertable_id, depth) AS (
              SELECT $1::int, 0
              UNION ALL
              SELECT ca.raw_hypertable_id, chain.depth + 1
              FROM continuous_agg ca
              JOIN chain ON ca.mat_hypertable_id = chain.hypertable_id
              WHERE chain.depth < $2
            )
            SELECT d.id, d.hypertable_id, d.column_name, d.column_type,
                   d.integer_now_func_schema, d.integer_now_func
            FROM chain
            JOIN dimension d ON d.hypertable_id = chain.hypertable_id
            WHERE d.interval_length IS NOT NULL
              AND d.integer_now_func IS NOT NULL
            ORDER BY chain.depth ASC, d.id ASC
            LIMIT 1
            "#,
        )
        .bind(mat_hypertable_id)
        .bind(MAX_CAGG_DEPTH)
        .fetch_optional(&mut *self.db.acquire().await?)
        .await?;
        row.map(Dimension::try_from).transpose()
    }
}
