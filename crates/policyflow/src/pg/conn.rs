use sqlx::{pool::PoolConnection, PgConnection, PgPool, Postgres};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

/// The connection a `PgSession` holds, shared with the adapters bound to it.
pub type SharedConnection = Arc<Mutex<PoolConnection<Postgres>>>;

/// Where an adapter runs its statements: a pooled connection per call
/// (autocommit), or the job session's connection inside its transaction.
#[derive(Clone)]
pub enum PgTarget {
    Pool(PgPool),
    Session(SharedConnection),
}

impl PgTarget {
    pub async fn acquire(&self) -> Result<PgConn<'_>> {
        match self {
            Self::Pool(pool) => Ok(PgConn::Pooled(pool.acquire().await?)),
            Self::Session(conn) => Ok(PgConn::Session(conn.lock().await)),
        }
    }
}

impl From<PgPool> for PgTarget {
    fn from(pool: PgPool) -> Self {
        Self::Pool(pool)
    }
}

impl From<SharedConnection> for PgTarget {
    fn from(conn: SharedConnection) -> Self {
        Self::Session(conn)
    }
}

pub enum PgConn<'a> {
    Pooled(PoolConnection<Postgres>),
    Session(MutexGuard<'a, PoolConnection<Postgres>>),
}

impl Deref for PgConn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            Self::Pooled(conn) => conn,
            Self::Session(conn) => conn,
        }
    }
}

impl DerefMut for PgConn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            Self::Pooled(conn) => conn,
            Self::Session(conn) => conn,
        }
    }
}
