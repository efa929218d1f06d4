//! Transaction and snapshot state of the context a job executes in.
//!
//! The driver never consults global state: it asks the session what is open,
//! acts on that, and settles its own obligations on exit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{PolicyError, Result};
use crate::policy::PolicyServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub in_transaction: bool,
    pub snapshot_active: bool,
}

#[async_trait]
pub trait Session: Send {
    fn state(&self) -> SessionState;

    /// Start time of the current transaction; the policies' notion of "now".
    fn transaction_timestamp(&self) -> Option<DateTime<Utc>>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Commits and immediately opens a new transaction with no active
    /// snapshot, as a procedure-level `COMMIT` does.
    async fn commit_and_chain(&mut self) -> Result<()>;

    async fn push_snapshot(&mut self) -> Result<()>;

    /// Fails with `InvariantViolation` when no snapshot is active.
    async fn pop_snapshot(&mut self) -> Result<()>;

    /// The collaborators a built-in policy uses while running in this
    /// session. Sessions that own a database connection rebind them to it so
    /// the policy's work commits or rolls back with the session's transaction.
    fn bind_services(&self, shared: &PolicyServices) -> PolicyServices {
        shared.clone()
    }
}

/// The view of a session handed to plain functions: they run inside the
/// current transaction and may not end it.
pub(crate) struct FunctionScope<'a> {
    inner: &'a mut dyn Session,
}

impl<'a> FunctionScope<'a> {
    pub(crate) fn new(inner: &'a mut dyn Session) -> Self {
        Self { inner }
    }
}

fn invalid_termination() -> PolicyError {
    PolicyError::InvariantViolation("invalid transaction termination inside a function".into())
}

#[async_trait]
impl Session for FunctionScope<'_> {
    fn state(&self) -> SessionState {
        self.inner.state()
    }

    fn transaction_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.transaction_timestamp()
    }

    async fn begin(&mut self) -> Result<()> {
        Err(invalid_termination())
    }

    async fn commit(&mut self) -> Result<()> {
        Err(invalid_termination())
    }

    async fn rollback(&mut self) -> Result<()> {
        Err(invalid_termination())
    }

    async fn commit_and_chain(&mut self) -> Result<()> {
        Err(invalid_termination())
    }

    async fn push_snapshot(&mut self) -> Result<()> {
        self.inner.push_snapshot().await
    }

    async fn pop_snapshot(&mut self) -> Result<()> {
        self.inner.pop_snapshot().await
    }

    fn bind_services(&self, shared: &PolicyServices) -> PolicyServices {
        self.inner.bind_services(shared)
    }
}
