pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod exec;
pub mod jobs;
pub mod maintenance;
pub mod memory;
pub mod partitions;
pub mod pg;
pub mod policy;
pub mod telemetry;
pub mod time;

pub use engine::{job_type_counts, AlteredJob, JobTypeCounts, PolicyEngine};
pub use error::{PolicyError, Result};
