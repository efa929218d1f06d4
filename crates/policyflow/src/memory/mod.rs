//! In-process adapters. Used by tests and by embedders that keep their
//! catalog somewhere other than PostgreSQL.

pub mod catalog;
pub mod session;

pub use catalog::{ChunkRunStat, MaintenanceCall, MemoryCatalog};
pub use session::{MemorySession, SessionEvent};
