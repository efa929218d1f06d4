use serde_json::Value;
use std::{collections::HashMap, pin::Pin, sync::Arc};

use super::session::Session;
use crate::error::Result;
use crate::jobs::RoutineName;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Every job routine has the signature `(job_id integer, config jsonb)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionArgs {
    pub job_id: i32,
    pub config: Option<Value>,
}

type HandlerFn =
    dyn for<'a> Fn(ActionArgs, &'a mut dyn Session) -> BoxFuture<'a, Result<()>> + Send + Sync;

/// Mirrors `pg_proc.prokind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Function,
    Procedure,
    Aggregate,
    Window,
}

impl RoutineKind {
    pub fn from_prokind(c: char) -> Option<Self> {
        match c {
            'f' => Some(Self::Function),
            'p' => Some(Self::Procedure),
            'a' => Some(Self::Aggregate),
            'w' => Some(Self::Window),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct RegisteredRoutine {
    pub kind: RoutineKind,
    handler: Arc<HandlerFn>,
}

impl RegisteredRoutine {
    pub(crate) fn call<'a>(
        &self,
        args: ActionArgs,
        session: &'a mut dyn Session,
    ) -> BoxFuture<'a, Result<()>> {
        (self.handler)(args, session)
    }
}

/// Maps `(schema, name)` to an executable handler.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    routines: HashMap<RoutineName, RegisteredRoutine>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, routine: RoutineName, kind: RoutineKind, handler: F)
    where
        F: for<'a> Fn(ActionArgs, &'a mut dyn Session) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.routines.insert(
            routine,
            RegisteredRoutine {
                kind,
                handler: Arc::new(handler),
            },
        );
    }

    pub fn register_function<F>(&mut self, routine: RoutineName, handler: F)
    where
        F: for<'a> Fn(ActionArgs, &'a mut dyn Session) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.register(routine, RoutineKind::Function, handler);
    }

    pub fn register_procedure<F>(&mut self, routine: RoutineName, handler: F)
    where
        F: for<'a> Fn(ActionArgs, &'a mut dyn Session) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.register(routine, RoutineKind::Procedure, handler);
    }

    pub fn lookup(&self, routine: &RoutineName) -> Option<RegisteredRoutine> {
        self.routines.get(routine).cloned()
    }

    pub fn contains(&self, routine: &RoutineName) -> bool {
        self.routines.contains_key(routine)
    }
}

pub fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}
