mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{job, now};
use policyflow::error::PolicyError;
use policyflow::exec::{
    boxed, execute_job, ActionRegistry, Bookkeeping, RoutineKind, Session, SessionState,
};
use policyflow::jobs::RoutineName;
use policyflow::memory::{MemorySession, SessionEvent};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn routine(name: &str) -> RoutineName {
    RoutineName::new("public", name)
}

fn registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register_function(routine("noop_fn"), |_args, _session| boxed(async { Ok(()) }));
    registry.register_procedure(routine("noop_proc"), |_args, _session| {
        boxed(async { Ok(()) })
    });
    registry.register_procedure(routine("chunked_proc"), |_args, session| {
        boxed(async move {
            session.commit_and_chain().await?;
            session.commit_and_chain().await?;
            Ok(())
        })
    });
    registry.register_function(routine("committing_fn"), |_args, session| {
        boxed(async move { session.commit().await })
    });
    registry.register_procedure(routine("failing_proc"), |_args, _session| {
        boxed(async { Err(PolicyError::Action("disk full".into())) })
    });
    registry.register(routine("my_sum"), RoutineKind::Aggregate, |_args, _session| {
        boxed(async { Ok(()) })
    });
    registry
}

#[tokio::test]
async fn driver_opens_and_closes_what_it_needs() {
    let mut session = MemorySession::at(now());
    let report = execute_job(&registry(), &job(1, routine("noop_proc"), None), &mut session)
        .await
        .unwrap();

    assert_eq!(report.kind, RoutineKind::Procedure);
    assert_eq!(
        report.bookkeeping,
        Bookkeeping {
            started_transaction: true,
            pushed_snapshot: true
        }
    );
    assert_eq!(report.exit_state, SessionState::default());
    assert_eq!(
        session.events(),
        &[
            SessionEvent::Begin,
            SessionEvent::PushSnapshot,
            SessionEvent::PopSnapshot,
            SessionEvent::Commit
        ]
    );
}

#[tokio::test]
async fn driver_reuses_the_callers_transaction_and_snapshot() {
    let mut session = MemorySession::in_transaction(now()).with_snapshot();
    let report = execute_job(&registry(), &job(1, routine("noop_fn"), None), &mut session)
        .await
        .unwrap();

    assert_eq!(report.bookkeeping, Bookkeeping::default());
    assert!(session.events().is_empty());
    assert_eq!(
        session.state(),
        SessionState {
            in_transaction: true,
            snapshot_active: true
        }
    );
    assert_eq!(session.snapshot_depth(), 1);
}

#[tokio::test]
async fn driver_pushes_a_snapshot_inside_an_open_transaction() {
    let mut session = MemorySession::in_transaction(now());
    let report = execute_job(&registry(), &job(1, routine("noop_fn"), None), &mut session)
        .await
        .unwrap();

    assert_eq!(
        report.bookkeeping,
        Bookkeeping {
            started_transaction: false,
            pushed_snapshot: true
        }
    );
    assert_eq!(
        session.events(),
        &[SessionEvent::PushSnapshot, SessionEvent::PopSnapshot]
    );
    assert!(session.state().in_transaction);
}

#[tokio::test]
async fn procedure_commit_drops_the_snapshot_without_a_pop() {
    let mut session = MemorySession::at(now());
    execute_job(&registry(), &job(1, routine("chunked_proc"), None), &mut session)
        .await
        .unwrap();

    assert_eq!(
        session.events(),
        &[
            SessionEvent::Begin,
            SessionEvent::PushSnapshot,
            SessionEvent::CommitAndChain,
            SessionEvent::CommitAndChain,
            SessionEvent::Commit
        ]
    );
    assert_eq!(session.state(), SessionState::default());
}

#[tokio::test]
async fn function_may_not_commit() {
    let mut session = MemorySession::at(now());
    let err = execute_job(&registry(), &job(1, routine("committing_fn"), None), &mut session)
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::InvariantViolation(_)), "{err:?}");
    assert_eq!(
        session.events(),
        &[
            SessionEvent::Begin,
            SessionEvent::PushSnapshot,
            SessionEvent::PopSnapshot,
            SessionEvent::Rollback
        ]
    );
    assert_eq!(session.state(), SessionState::default());
}

#[tokio::test]
async fn failing_action_rolls_back_and_surfaces_its_error() {
    let mut session = MemorySession::at(now());
    let err = execute_job(&registry(), &job(1, routine("failing_proc"), None), &mut session)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "action failed: disk full");
    assert_eq!(session.events().last(), Some(&SessionEvent::Rollback));
    assert!(!session.state().in_transaction);
}

#[tokio::test]
async fn failing_action_leaves_the_callers_transaction_open() {
    let mut session = MemorySession::in_transaction(now()).with_snapshot();
    execute_job(&registry(), &job(1, routine("failing_proc"), None), &mut session)
        .await
        .unwrap_err();

    assert!(session.events().is_empty());
    assert!(session.state().in_transaction);
}

#[tokio::test]
async fn unknown_routine_is_not_found() {
    let mut session = MemorySession::at(now());
    let err = execute_job(&registry(), &job(1, routine("missing"), None), &mut session)
        .await
        .unwrap_err();

    let PolicyError::NotFound(what) = err else {
        panic!("expected NotFound, got {err:?}");
    };
    assert_eq!(what, "function public.missing(integer, jsonb)");
    assert_eq!(session.events().last(), Some(&SessionEvent::Rollback));
}

#[tokio::test]
async fn aggregates_are_not_dispatchable() {
    let mut session = MemorySession::at(now());
    let err = execute_job(&registry(), &job(1, routine("my_sum"), None), &mut session)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PolicyError::UnsupportedAction {
            kind: RoutineKind::Aggregate,
            ..
        }
    ));
    assert!(!session.state().in_transaction);
}

#[tokio::test]
async fn actions_receive_job_id_and_config() {
    let seen = Arc::new(AtomicUsize::new(0));
    let mut registry = ActionRegistry::new();
    {
        let seen = seen.clone();
        registry.register_function(routine("check_args"), move |args, _session| {
            let seen = seen.clone();
            boxed(async move {
                assert_eq!(args.job_id, 42);
                assert_eq!(args.config, Some(json!({"batch": 10})));
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
    }

    let mut session = MemorySession::at(now());
    execute_job(
        &registry,
        &job(42, routine("check_args"), Some(json!({"batch": 10}))),
        &mut session,
    )
    .await
    .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

/// Delegates everything except `pop_snapshot`, which always fails.
struct PopFails(MemorySession);

#[async_trait]
impl Session for PopFails {
    fn state(&self) -> SessionState {
        self.0.state()
    }

    fn transaction_timestamp(&self) -> Option<DateTime<Utc>> {
        self.0.transaction_timestamp()
    }

    async fn begin(&mut self) -> policyflow::Result<()> {
        self.0.begin().await
    }

    async fn commit(&mut self) -> policyflow::Result<()> {
        self.0.commit().await
    }

    async fn rollback(&mut self) -> policyflow::Result<()> {
        self.0.rollback().await
    }

    async fn commit_and_chain(&mut self) -> policyflow::Result<()> {
        self.0.commit_and_chain().await
    }

    async fn push_snapshot(&mut self) -> policyflow::Result<()> {
        self.0.push_snapshot().await
    }

    async fn pop_snapshot(&mut self) -> policyflow::Result<()> {
        Err(PolicyError::Action("snapshot reference leaked".into()))
    }
}

#[tokio::test]
async fn failed_snapshot_pop_still_rolls_back_the_drivers_transaction() {
    let mut session = PopFails(MemorySession::at(now()));
    let err = execute_job(&registry(), &job(1, routine("noop_proc"), None), &mut session)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "action failed: snapshot reference leaked");
    assert_eq!(
        session.0.events(),
        &[
            SessionEvent::Begin,
            SessionEvent::PushSnapshot,
            SessionEvent::Rollback
        ]
    );
    assert!(!session.0.state().in_transaction);
}

#[tokio::test]
async fn failed_snapshot_pop_after_a_failed_action_reports_the_action_error() {
    let mut session = PopFails(MemorySession::at(now()));
    let err = execute_job(&registry(), &job(1, routine("failing_proc"), None), &mut session)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "action failed: disk full");
    assert_eq!(session.0.events().last(), Some(&SessionEvent::Rollback));
}
