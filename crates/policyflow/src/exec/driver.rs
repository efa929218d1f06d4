use tracing::{debug, info, warn};

use super::registry::{ActionArgs, ActionRegistry, RoutineKind};
use super::session::{FunctionScope, Session, SessionState};
use crate::error::{PolicyError, Result};
use crate::jobs::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    TransactionEnsured,
    SnapshotEnsured,
    Dispatching,
    Completed,
    Failed,
}

/// What the driver opened on entry and therefore must close on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bookkeeping {
    pub started_transaction: bool,
    pub pushed_snapshot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub job_id: i32,
    pub kind: RoutineKind,
    pub bookkeeping: Bookkeeping,
    pub exit_state: SessionState,
}

/// Runs the job's bound routine inside a transaction and snapshot, reusing
/// whichever of the two the caller already has open.
pub async fn execute_job(
    registry: &ActionRegistry,
    job: &Job,
    session: &mut dyn Session,
) -> Result<ExecutionReport> {
    let mut books = Bookkeeping::default();
    let mut state = DriverState::Idle;

    let outcome = match enter(session, &mut books, &mut state).await {
        Ok(()) => {
            state = DriverState::Dispatching;
            debug!(job_id = job.id, ?state, ?books, "job driver entered");
            dispatch(registry, job, session).await
        }
        Err(e) => Err(e),
    };

    let succeeded = outcome.is_ok();
    let settled = settle(session, books, succeeded).await;

    state = if succeeded && settled.is_ok() {
        DriverState::Completed
    } else {
        DriverState::Failed
    };
    debug!(job_id = job.id, ?state, ?books, "job driver finished");

    match (outcome, settled) {
        (Ok(kind), Ok(())) => Ok(ExecutionReport {
            job_id: job.id,
            kind,
            bookkeeping: books,
            exit_state: session.state(),
        }),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            warn!(job_id = job.id, error = %cleanup, "cleanup after failed job also failed");
            Err(e)
        }
    }
}

async fn enter(
    session: &mut dyn Session,
    books: &mut Bookkeeping,
    state: &mut DriverState,
) -> Result<()> {
    if !session.state().in_transaction {
        session.begin().await?;
        books.started_transaction = true;
    }
    *state = DriverState::TransactionEnsured;

    // evaluating the routine needs a snapshot
    if !session.state().snapshot_active {
        session.push_snapshot().await?;
        books.pushed_snapshot = true;
    }
    *state = DriverState::SnapshotEnsured;

    Ok(())
}

async fn dispatch(
    registry: &ActionRegistry,
    job: &Job,
    session: &mut dyn Session,
) -> Result<RoutineKind> {
    let routine = registry.lookup(&job.routine).ok_or_else(|| {
        PolicyError::NotFound(format!("function {}(integer, jsonb)", job.routine))
    })?;

    let args = ActionArgs {
        job_id: job.id,
        config: job.config.clone(),
    };

    info!(job_id = job.id, routine = %job.routine, kind = ?routine.kind, "dispatching job");

    match routine.kind {
        RoutineKind::Function => {
            let mut scope = FunctionScope::new(session);
            routine.call(args, &mut scope).await?;
        }
        RoutineKind::Procedure => routine.call(args, session).await?,
        kind => {
            return Err(PolicyError::UnsupportedAction {
                routine: job.routine.to_string(),
                kind,
            })
        }
    }

    Ok(routine.kind)
}

/// Closes what the driver opened. A failed pop still ends the transaction
/// (rolled back, since the exit is no longer clean); the first error wins.
async fn settle(session: &mut dyn Session, books: Bookkeeping, succeeded: bool) -> Result<()> {
    // A procedure that committed has already dropped our snapshot.
    let popped = if books.pushed_snapshot && session.state().snapshot_active {
        session.pop_snapshot().await
    } else {
        Ok(())
    };

    let ended = if books.started_transaction && session.state().in_transaction {
        if succeeded && popped.is_ok() {
            session.commit().await
        } else {
            session.rollback().await
        }
    } else {
        Ok(())
    };

    popped.and(ended)
}
