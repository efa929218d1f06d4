use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{PolicyError, Result};
use crate::exec::{Session, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Begin,
    Commit,
    Rollback,
    CommitAndChain,
    PushSnapshot,
    PopSnapshot,
}

/// An in-process session that tracks transaction and snapshot state and
/// records every transition.
#[derive(Debug, Default)]
pub struct MemorySession {
    in_transaction: bool,
    snapshots: usize,
    txn_started_at: Option<DateTime<Utc>>,
    fixed_now: Option<DateTime<Utc>>,
    events: Vec<SessionEvent>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transaction started by this session reports `now` as its start.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            fixed_now: Some(now),
            ..Self::default()
        }
    }

    /// A session whose caller already opened a transaction.
    pub fn in_transaction(now: DateTime<Utc>) -> Self {
        Self {
            in_transaction: true,
            txn_started_at: Some(now),
            fixed_now: Some(now),
            ..Self::default()
        }
    }

    pub fn with_snapshot(mut self) -> Self {
        self.snapshots += 1;
        self
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn snapshot_depth(&self) -> usize {
        self.snapshots
    }

    fn now(&self) -> DateTime<Utc> {
        self.fixed_now.unwrap_or_else(Utc::now)
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
}

#[async_trait]
impl Session for MemorySession {
    fn state(&self) -> SessionState {
        SessionState {
            in_transaction: self.in_transaction,
            snapshot_active: self.snapshots > 0,
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
        self.in_transaction = true;
        self.txn_started_at = Some(self.now());
        self.events.push(SessionEvent::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.in_transaction = false;
        self.snapshots = 0;
        self.txn_started_at = None;
        self.events.push(SessionEvent::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.require_transaction("rollback")?;
        self.in_transaction = false;
        self.snapshots = 0;
        self.txn_started_at = None;
        self.events.push(SessionEvent::Rollback);
        Ok(())
    }

    async fn commit_and_chain(&mut self) -> Result<()> {
        self.require_transaction("commit")?;
        self.snapshots = 0;
        self.txn_started_at = Some(self.now());
        self.events.push(SessionEvent::CommitAndChain);
        Ok(())
    }

    async fn push_snapshot(&mut self) -> Result<()> {
        self.require_transaction("push snapshot")?;
        self.snapshots += 1;
        self.events.push(SessionEvent::PushSnapshot);
        Ok(())
    }

    async fn pop_snapshot(&mut self) -> Result<()> {
        if self.snapshots == 0 {
            return Err(PolicyError::InvariantViolation(
                "no active snapshot to pop".into(),
            ));
        }
        self.snapshots -= 1;
        self.events.push(SessionEvent::PopSnapshot);
        Ok(())
    }
}
