use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::conn::{PgTarget, SharedConnection};
use crate::error::{PolicyError, Result};
use crate::maintenance::{MaintenanceOps, RefreshWindow};
use crate::partitions::{Chunk, ContinuousAgg, RelationName};
use crate::policy::Boundary;

/// Storage-layer rejections surface as `Action`; everything else stays a
/// database error.
fn action_error(err: sqlx::Error) -> PolicyError {
    match err {
        sqlx::Error::Database(db) => PolicyError::Action(db.message().to_string()),
        other => PolicyError::Database(other),
    }
}

/// Literal for a key value, cast back to the key type inside the statement.
/// `None` for the unbounded ends of the key space.
fn key_literal(boundary: Boundary) -> Option<String> {
    let key_type = boundary.key_type;
    if boundary.value == key_type.min_value() || boundary.value == key_type.max_value() {
        return None;
    }
    Some(key_type.format_value(boundary.value))
}

/// Calls the storage layer's SQL API and keeps the local chunk metadata in
/// step with what it did. Each action is a single statement, so the action
/// and its bookkeeping land together whether they run on the job session's
/// connection or in autocommit.
#[derive(Clone)]
pub struct SqlMaintenanceOps {
    db: PgTarget,
    pool: PgPool,
}

impl SqlMaintenanceOps {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: PgTarget::Pool(pool.clone()),
            pool,
        }
    }

    /// Runs reorder, compress and drop on `conn`. Refreshes still go
    /// through `pool`.
    pub fn on_connection(pool: PgPool, conn: SharedConnection) -> Self {
        Self {
            db: PgTarget::Session(conn),
            pool,
        }
    }
}

#[async_trait]
impl MaintenanceOps for SqlMaintenanceOps {
    async fn reorder_chunk(&self, chunk: &Chunk, index: &RelationName) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        sqlx::query("SELECT reorder_chunk($1::regclass, $2::regclass)")
            .bind(chunk.relation.quoted())
            .bind(index.quoted())
            .execute(&mut *conn)
            .await
            .map_err(action_error)?;
        Ok(())
    }

    async fn compress_chunk(&self, chunk: &Chunk) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        sqlx::query(
            r#"
            WITH compressed AS (
              SELECT compress_chunk($1::regclass)
            )
            UPDATE chunk SET compressed = TRUE
            WHERE id = $2 AND EXISTS (SELECT 1 FROM compressed)
            "#,
        )
        .bind(chunk.relation.quoted())
        .bind(chunk.id)
        .execute(&mut *conn)
        .await
        .map_err(action_error)?;
        Ok(())
    }

    async fn drop_chunks(&self, relation: &RelationName, older_than: Boundary) -> Result<u64> {
        let literal = key_literal(older_than).ok_or_else(|| {
            PolicyError::config(format!(
                "invalid drop_chunks boundary {older_than} for \"{relation}\""
            ))
        })?;
        let key_type = older_than.key_type.as_str();

        // `relation` is either a hypertable or a continuous aggregate's view
        let sql = format!(
            r#"
            WITH dropped AS (
              SELECT count(*) AS n
              FROM drop_chunks($1::regclass, older_than => $2::text::{key_type})
            ),
            marked AS (
              UPDATE chunk c
              SET dropped = TRUE
              FROM chunk_constraint cc, dimension_slice ds, dimension d
              WHERE cc.chunk_id = c.id
                AND ds.id = cc.dimension_slice_id
                AND d.id = ds.dimension_id
                AND d.interval_length IS NOT NULL
                AND NOT c.dropped
                AND ds.range_end <= $5
                AND c.hypertable_id IN (
                  SELECT h.id FROM hypertable h
                  WHERE h.schema_name = $3 AND h.table_name = $4
                  UNION
                  SELECT ca.mat_hypertable_id FROM continuous_agg ca
                  WHERE ca.user_view_schema = $3 AND ca.user_view_name = $4
                )
              RETURNING c.id
            )
            SELECT (SELECT n FROM dropped), (SELECT count(*) FROM marked)
            "#
        );

        let mut conn = self.db.acquire().await?;
        let (dropped, marked) = sqlx::query_as::<_, (i64, i64)>(&sql)
            .bind(relation.quoted())
            .bind(&literal)
            .bind(&relation.schema)
            .bind(&relation.name)
            .bind(older_than.value)
            .fetch_one(&mut *conn)
            .await
            .map_err(action_error)?;

        debug!(relation = %relation, dropped, marked, "drop_chunks finished");
        Ok(dropped.max(0) as u64)
    }

    async fn refresh_continuous_aggregate(
        &self,
        cagg: &ContinuousAgg,
        window: RefreshWindow,
    ) -> Result<()> {
        let key_type = window.key_type.as_str();
        let sql = format!(
            "CALL refresh_continuous_aggregate($1::regclass, $2::text::{key_type}, $3::text::{key_type})"
        );
        // refresh cannot run inside a transaction block, so it never uses the
        // session's connection
        sqlx::query(&sql)
            .bind(cagg.user_view.quoted())
            .bind(key_literal(window.start_boundary()))
            .bind(key_literal(window.end_boundary()))
            .execute(&self.pool)
            .await
            .map_err(action_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::PartitionKeyType;

    #[test]
    fn unbounded_ends_have_no_literal() {
        let kt = PartitionKeyType::Integer;
        assert_eq!(key_literal(Boundary { value: kt.min_value(), key_type: kt }), None);
        assert_eq!(key_literal(Boundary { value: kt.max_value(), key_type: kt }), None);
        assert_eq!(
            key_literal(Boundary { value: 42, key_type: kt }).as_deref(),
            Some("42")
        );
    }

    #[test]
    fn date_literal_is_a_plain_date() {
        let kt = PartitionKeyType::Date;
        // 2024-01-02 00:00:00 UTC
        let value = 1_704_153_600_000_000;
        assert_eq!(
            key_literal(Boundary { value, key_type: kt }).as_deref(),
            Some("2024-01-02")
        );
    }
}
