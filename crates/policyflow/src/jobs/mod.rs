pub mod catalog;
pub mod model;
pub mod retry;
pub mod runner;

pub use catalog::JobCatalog;
pub use model::{Job, JobAlteration, JobRunStat, RoutineName, RunOutcome, ScheduleFields};
pub use retry::RetryConfig;
pub use runner::JobRunner;
