use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use super::conn::SharedConnection;
use super::{PgCaggResolver, PgJobCatalog, PgPartitionCatalog, SqlMaintenanceOps};
use crate::error::{PolicyError, Result};
use crate::exec::{Session, SessionState};
use crate::policy::PolicyServices;

/// A `Session` over one pooled connection.
///
/// Postgres exposes no client-side snapshot stack, so pushes record the
/// transaction's current snapshot and pops discard the newest record.
///
/// Built-in policies run on this same connection (see `bind_services`), so
/// what they change is committed or rolled back with the session.
pub struct PgSession {
    pool: PgPool,
    conn: SharedConnection,
    in_transaction: bool,
    txn_started_at: Option<DateTime<Utc>>,
    snapshots: Vec<String>,
}

impl PgSession {
    pub async fn acquire(pool: &PgPool) -> Result<Self> {
        Ok(Self {
            pool: pool.clone(),
            conn: Arc::new(Mutex::new(pool.acquire().await?)),
            in_transaction: false,
            txn_started_at: None,
            snapshots: Vec::new(),
        })
    }

    /// Rolls back anything still open before the connection goes back to
    /// the pool.
    pub async fn close(mut self) -> Result<()> {
        if self.in_transaction {
            warn!("session closed with an open transaction; rolling back");
            self.rollback().await?;
        }
        Ok(())
    }

    pub fn snapshots(&self) -> &[String] {
        &self.snapshots
    }

    async fn exec(&mut self, sql: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::query(sql).execute(&mut **conn).await?;
        Ok(())
    }

    async fn load_transaction_timestamp(&mut self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let now = sqlx::query_scalar::<_, DateTime<Utc>>("SELECT now()")
            .fetch_one(&mut **conn)
            .await?;
        self.txn_started_at = Some(now);
        Ok(())
    }

    fn require_transaction(&self, op: &str) -> Result<()> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(PolicyError::InvariantViolation(format!(
                "{op} with no transaction in progress"
            )))
        }
    }

    fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.txn_started_at = None;
        self.snapshots.clear();
    }
}

#[async_trait]
impl Session for PgSession {
    fn state(&self) -> SessionState {
        SessionState {
            in_transaction: self.in_transaction,
            snapshot_active: !self.snapshots.is_empty(),
        }
    }

    fn transaction_timestamp(&self) -> Option<DateTime<Utc>> {
        self.txn_started_at
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(PolicyError::InvariantViolation(
                "there is already a transaction in progress".into(),
            ));
        }
        self.exec("BEGIN").await?;
        self.in_transaction = true;
        self.load_transaction_timestamp().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.exec("COMMIT").await?;
        self.end_transaction();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.require_transaction("rollback")?;
        self.exec("ROLLBACK").await?;
        self.end_transaction();
        Ok(())
    }

    async fn commit_and_chain(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.exec("COMMIT AND CHAIN").await?;
        self.snapshots.clear();
        self.load_transaction_timestamp().await
    }

    async fn push_snapshot(&mut self) -> Result<()> {
        self.require_transaction("push snapshot")?;
        let snapshot = {
            let mut conn = self.conn.lock().await;
            sqlx::query_scalar::<_, String>("SELECT pg_current_snapshot()::text")
                .fetch_one(&mut **conn)
                .await?
        };
        self.snapshots.push(snapshot);
        Ok(())
    }

    async fn pop_snapshot(&mut self) -> Result<()> {
        self.snapshots
            .pop()
            .map(|_| ())
            .ok_or_else(|| PolicyError::InvariantViolation("no active snapshot to pop".into()))
    }

    fn bind_services(&self, shared: &PolicyServices) -> PolicyServices {
        PolicyServices {
            jobs: Arc::new(PgJobCatalog::new(self.conn.clone())),
            partitions: Arc::new(PgPartitionCatalog::new(self.conn.clone())),
            caggs: Arc::new(PgCaggResolver::new(self.conn.clone())),
            ops: Arc::new(SqlMaintenanceOps::on_connection(
                self.pool.clone(),
                self.conn.clone(),
            )),
            cache: shared.cache.clone(),
        }
    }
}
