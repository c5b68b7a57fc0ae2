// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Small utilities shared across the orchestrator.
//!
//! The main export is [`Debounced`], the coalescing wrapper that keeps at
//! most one reflection pass in flight at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

type BoxedOp<A, R> =
    Arc<dyn Fn(A) -> Pin<Box<dyn Future<Output = anyhow::Result<R>> + Send>> + Send + Sync>;

/// Outcome of a call through [`Debounced`].
#[derive(Debug)]
pub enum DebounceOutcome<R> {
    /// Another call was already executing; this call was recorded as the
    /// single pending follow-up and absorbed. Callers are expected to ignore
    /// this outcome.
    Executing,
    /// The operation ran. `None` means it failed; the failure was already
    /// logged and is not propagated further.
    Completed(Option<R>),
}

impl<R> DebounceOutcome<R> {
    /// True if this call was absorbed into an in-flight execution.
    pub fn is_executing(&self) -> bool {
        matches!(self, DebounceOutcome::Executing)
    }
}

struct DebounceState<A> {
    executing: bool,
    pending: Option<A>,
}

/// Coalescing wrapper around an asynchronous operation.
///
/// At most one underlying execution is in flight at any time. A call arriving
/// mid-execution replaces the pending arguments (last write wins) and resolves
/// immediately with [`DebounceOutcome::Executing`]. When the in-flight
/// execution finishes and a pending call was recorded, exactly one follow-up
/// execution runs with the pending arguments; its result is discarded. This
/// guarantees the latest file system state is reflected at least once after a
/// burst of changes.
///
/// Failures inside the operation are logged and swallowed; they never block
/// subsequent invocations.
pub struct Debounced<A, R> {
    op: BoxedOp<A, R>,
    state: Arc<Mutex<DebounceState<A>>>,
}

impl<A, R> Clone for Debounced<A, R> {
    fn clone(&self) -> Self {
        Self {
            op: Arc::clone(&self.op),
            state: Arc::clone(&self.state),
        }
    }
}

impl<A, R> Debounced<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Wraps the given operation.
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Self {
            op: Arc::new(move |args| Box::pin(op(args))),
            state: Arc::new(Mutex::new(DebounceState {
                executing: false,
                pending: None,
            })),
        }
    }

    /// Invokes the wrapped operation, coalescing concurrent calls.
    pub async fn call(&self, args: A) -> DebounceOutcome<R> {
        {
            let mut state = self.state.lock().unwrap();
            if state.executing {
                state.pending = Some(args);
                return DebounceOutcome::Executing;
            }
            state.executing = true;
        }

        let result = self.run_logged(args).await;

        // One trailing re-execution with the latest recorded arguments. When
        // nothing is pending, `executing` must clear in the same lock scope as
        // the check: a call landing between a separate check and clear would
        // be absorbed with no follow-up ever running.
        let pending = {
            let mut state = self.state.lock().unwrap();
            let pending = state.pending.take();
            if pending.is_none() {
                state.executing = false;
            }
            pending
        };

        // The replay's own result is discarded; pending calls recorded while
        // it runs are cleared with it.
        if let Some(pending_args) = pending {
            let _ = self.run_logged(pending_args).await;
            let mut state = self.state.lock().unwrap();
            state.pending = None;
            state.executing = false;
        }

        DebounceOutcome::Completed(result)
    }

    async fn run_logged(&self, args: A) -> Option<R> {
        match (self.op)(args).await {
            Ok(result) => Some(result),
            Err(error) => {
                tracing::error!(%error, "debounced operation failed");
                None
            }
        }
    }
}

/// Clears the terminal before a restart cycle.
///
/// Disabled when not attached to a terminal or when log filtering is active,
/// so debugging output survives restarts.
pub fn clear_console() {
    if std::env::var_os("RUST_LOG").is_some() || std::env::var_os("GIRDER_NO_CLEAR").is_some() {
        return;
    }
    if !console::user_attended() {
        return;
    }
    let _ = console::Term::stdout().clear_screen();
}
