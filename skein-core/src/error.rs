// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! The kernel's error taxonomy. Every variant carries a [`miette::Diagnostic`]
//! code and help text, matching the style of
//! `r3bl_tui::core::resilient_reactor_thread::rrt_types::SubscribeError`.

use crate::task::TaskId;

/// Delivered into a task being cancelled.
///
/// If a task's future propagates this all the way out (i.e. it does not
/// catch and swallow it), the task terminates silently: `terminated()` is
/// `true`, `cancelled()` is `true`, and — unlike other errors — nothing is
/// logged even when `KernelConfig::log_errors` is set, since cancellation is
/// the expected outcome of `cancel_task`, not a bug.
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic)]
#[error("task {task} was cancelled")]
#[diagnostic(code(skein::cancelled), help("this is delivered by cancel_task(); catch it only to run cleanup, then re-raise"))]
pub struct CancelledError {
    pub task: TaskId,
}

/// A [`CancelledError`] delivered specifically because a `timeout_after`
/// deadline elapsed, rather than because of an explicit `cancel_task` call.
///
/// `ignore_after` catches exactly this variant (via [`TaskTimeout::from_cancelled`]
/// matching, not a bare `downcast`), never a plain [`CancelledError`] raised
/// for some unrelated reason.
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic)]
#[error("task {task} exceeded its deadline")]
#[diagnostic(code(skein::timeout), help("raised by timeout_after(); use ignore_after() if a deadline should return a sentinel instead of propagating"))]
pub struct TaskTimeout {
    pub task: TaskId,
}

impl TaskTimeout {
    #[must_use]
    pub fn as_cancelled(&self) -> CancelledError {
        CancelledError { task: self.task }
    }
}

/// Raised out of `Task::join()` when the joined task ended with any uncaught
/// error other than cancellation. Wraps the original error as `#[source]` so
/// the full diagnostic chain survives.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("task {task} terminated with an uncaught error")]
#[diagnostic(code(skein::task_failed))]
pub struct TaskError {
    pub task: TaskId,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

/// Invariant violations on [`Semaphore`]/[`BoundedSemaphore`].
///
/// [`Semaphore`]: https://docs.rs/skein (crate `skein::sync::Semaphore`)
/// [`BoundedSemaphore`]: https://docs.rs/skein (crate `skein::sync::BoundedSemaphore`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum SemaphoreError {
    /// `release()` would push the counter above the value it was
    /// constructed with.
    #[error("BoundedSemaphore over-released: counter would exceed its initial bound")]
    #[diagnostic(code(skein::semaphore::over_release), help("only release() as many permits as were ever acquire()d"))]
    OverRelease,
}

/// Invariant violations on [`Lock`].
///
/// [`Lock`]: https://docs.rs/skein (crate `skein::sync::Lock`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum LockError {
    /// `release()` called while the lock is not held by the caller.
    #[error("release() called on a Lock that is not held")]
    #[diagnostic(code(skein::lock::release_not_held), help("pair every release() with a prior successful acquire()"))]
    ReleaseNotHeld,
}

/// Invariant violations on [`Queue`].
///
/// [`Queue`]: https://docs.rs/skein (crate `skein::sync::Queue`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum QueueError {
    /// `task_done()` called more times than items were `put()`.
    #[error("task_done() called without a matching put()")]
    #[diagnostic(code(skein::queue::task_done_without_put), help("call task_done() exactly once per item retrieved via get()"))]
    TaskDoneWithoutPut,
}

/// Kernel-level (not task-level) errors: misuse of the `Kernel` type itself.
#[derive(Debug, Clone, Copy, thiserror::Error, miette::Diagnostic)]
pub enum KernelError {
    /// `cancel_task` was invoked on the task currently running (self-cancel).
    ///
    /// The distilled spec leaves this case as an open question; this kernel
    /// resolves it by rejecting the request (see `DESIGN.md` OQ-5).
    #[error("a task cannot cancel itself")]
    #[diagnostic(code(skein::kernel::self_cancel), help("spawn a sibling task to cancel this one, or simply return/break out of the loop instead"))]
    SelfCancel,

    /// `Kernel::run` was called a second time on a kernel whose
    /// configuration was already mutated, or that is already running.
    #[error("kernel configuration cannot change after the first run()")]
    #[diagnostic(code(skein::kernel::already_running), help("build a fresh Kernel with KernelConfig instead of reconfiguring a running one"))]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn timeout_converts_to_cancelled_with_same_task() {
        let counter = AtomicU64::new(0);
        let id = TaskId::next(&counter);
        let timeout = TaskTimeout { task: id };
        let cancelled = timeout.as_cancelled();
        assert_eq!(cancelled.task, id);
    }
}
