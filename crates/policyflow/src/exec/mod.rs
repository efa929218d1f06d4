pub mod driver;
pub mod registry;
pub mod session;

pub use driver::{execute_job, Bookkeeping, DriverState, ExecutionReport};
pub use registry::{boxed, ActionArgs, ActionRegistry, BoxFuture, RegisteredRoutine, RoutineKind};
pub use session::{Session, SessionState};
