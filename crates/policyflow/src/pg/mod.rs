//! Postgres adapters over `sqlx::PgPool`, against the tables in
//! `migrations/` and the storage layer's SQL functions.

pub mod conn;
pub mod jobs;
pub mod ops;
pub mod partitions;
pub mod session;

pub use conn::{PgConn, PgTarget, SharedConnection};
pub use jobs::PgJobCatalog;
pub use ops::SqlMaintenanceOps;
pub use partitions::{PgCaggResolver, PgPartitionCatalog};
pub use session::PgSession;

use sqlx::PgPool;
use std::sync::Arc;

use crate::partitions::HypertableCache;
use crate::policy::PolicyServices;

/// Wires every collaborator to the same pool. A `PgSession` rebinds them to
/// its own connection for the duration of a built-in policy run.
pub fn services(pool: PgPool) -> PolicyServices {
    PolicyServices {
        jobs: Arc::new(PgJobCatalog::new(pool.clone())),
        partitions: Arc::new(PgPartitionCatalog::new(pool.clone())),
        caggs: Arc::new(PgCaggResolver::new(pool.clone())),
        ops: Arc::new(SqlMaintenanceOps::new(pool)),
        cache: HypertableCache::new(),
    }
}
