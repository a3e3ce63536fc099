// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! A FIFO-fair mutual-exclusion lock, matching curio's `Lock`.

use super::current_or_panic;
use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, LockError, TaskId, TaskState, WaitQueue};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

struct LockInner {
    owner: Option<TaskId>,
    waiters: WaitQueue,
}

/// Drops `task` out of a lock it was spliced or parked into without ever
/// completing its acquisition — removing it from the waiter queue, or, if it
/// had already been granted ownership outright, handing the lock on to the
/// next waiter exactly as [`Lock::release`] would. Returns the task (if any)
/// that needs marking ready as a result. Shared by [`Lock::abandon`] and
/// [`LockAcquireFuture`]'s own cancellation/drop paths so a task that was
/// granted ownership directly (via [`Lock::splice_waiters`]) can't leave the
/// lock permanently owned by nobody still around to release it.
fn abandon_inner(inner: &Rc<RefCell<LockInner>>, task: TaskId) -> Vec<TaskId> {
    let mut state = inner.borrow_mut();
    if state.owner == Some(task) {
        let next = state.waiters.notify_n(1);
        state.owner = next.first().copied();
        return next;
    }
    state.waiters.remove(task);
    Vec::new()
}

/// A non-reentrant lock. Unlike `std::sync::Mutex`, ownership is tracked by
/// task id so [`Lock::release`] can reject a release by anyone but the
/// current holder, and acquisition order is strict FIFO rather than
/// whatever the OS scheduler happens to prefer.
#[derive(Clone)]
pub struct Lock {
    inner: Rc<RefCell<LockInner>>,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Rc::new(RefCell::new(LockInner { owner: None, waiters: WaitQueue::new() })) }
    }

    #[must_use]
    pub fn locked(&self) -> bool {
        self.inner.borrow().owner.is_some()
    }

    #[must_use]
    pub fn acquire(&self) -> LockAcquireFuture {
        LockAcquireFuture { lock: Rc::clone(&self.inner), parked: None, cancel_registered: false }
    }

    /// Builds an acquire future for a task that is already known to be
    /// admitted into this lock's waiter queue (or already granted
    /// ownership outright) — used by `Condition::notify` so a woken waiter
    /// reacquires through this lock's own bookkeeping instead of calling
    /// `acquire()` fresh and re-enqueuing (which would panic: the task is
    /// already a member).
    #[must_use]
    pub(crate) fn acquire_already_queued(&self, task: TaskId) -> LockAcquireFuture {
        LockAcquireFuture { lock: Rc::clone(&self.inner), parked: Some(task), cancel_registered: false }
    }

    /// Directly admits `tasks` into this lock's own waiter queue, handing
    /// ownership outright to the first of them if the lock is currently
    /// unheld, rather than leaving them to race a fresh `acquire()` call
    /// against whatever else happens to be ready. Returns the tasks (at
    /// most one) granted ownership directly — the caller must mark those
    /// ready; the rest only become ready once `release()` reaches them.
    pub(crate) fn splice_waiters(&self, tasks: Vec<TaskId>) -> Vec<TaskId> {
        let mut state = self.inner.borrow_mut();
        let mut tasks = tasks.into_iter();
        let mut granted = Vec::new();
        if state.owner.is_none() {
            if let Some(first) = tasks.next() {
                state.owner = Some(first);
                granted.push(first);
            }
        }
        for task in tasks {
            state.waiters.enqueue(task);
        }
        granted
    }

    /// Cleans up after a task that was spliced in via [`Lock::splice_waiters`]
    /// but will never poll again (its future was dropped, e.g. on
    /// cancellation, before it got a chance to claim the lock) — removes it
    /// from the waiter queue, or, if it had already been granted ownership
    /// outright, hands the lock on to the next waiter exactly as
    /// [`Lock::release`] would. Returns the task (if any) that needs marking
    /// ready as a result.
    pub(crate) fn abandon(&self, task: TaskId) -> Vec<TaskId> {
        abandon_inner(&self.inner, task)
    }

    /// Releases the lock, handing it directly to the next FIFO waiter (if
    /// any) rather than letting it go uncontended.
    ///
    /// # Errors
    /// Returns [`LockError::ReleaseNotHeld`] if the calling task does not
    /// currently hold the lock.
    pub fn release(&self) -> Result<(), LockError> {
        let task = current_or_panic();
        let mut state = self.inner.borrow_mut();
        if state.owner != Some(task) {
            return Err(LockError::ReleaseNotHeld);
        }
        let next = state.waiters.notify_n(1);
        state.owner = next.first().copied();
        drop(state);
        if let Some(&woken) = next.first() {
            if let Some((kernel, _)) = current() {
                if let Some(kernel) = kernel.upgrade() {
                    kernel.borrow_mut().mark_ready(woken);
                }
            }
        }
        Ok(())
    }
}

pub struct LockAcquireFuture {
    lock: Rc<RefCell<LockInner>>,
    parked: Option<TaskId>,
    /// Whether a `cancel_func` has been installed for this future yet.
    /// Tracked separately from `parked`: a future built via
    /// `acquire_already_queued` starts with `parked` already `Some` (the
    /// task is already a member of the lock's waiter queue, spliced in by
    /// `Condition::notify`) but still needs its own `cancel_func`
    /// registered so a cancellation while it's still waiting (not yet
    /// granted ownership) gets requeued instead of hanging forever.
    cancel_registered: bool,
}

impl Future for LockAcquireFuture {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = current_or_panic();
        let Some((kernel, _)) = current() else { return Poll::Pending };
        let Some(kernel) = kernel.upgrade() else { return Poll::Ready(Ok(())) };
        let mut inner = kernel.borrow_mut();

        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if self.parked.take().is_some() {
                let next = abandon_inner(&self.lock, task);
                for woken in next {
                    inner.mark_ready(woken);
                }
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        let mut lock = self.lock.borrow_mut();
        if lock.owner.is_none() {
            lock.owner = Some(task);
            self.parked = None;
            return Poll::Ready(Ok(()));
        }
        if lock.owner == Some(task) {
            drop(lock);
            self.parked = None;
            return Poll::Ready(Ok(()));
        }

        if self.parked.is_none() {
            lock.waiters.enqueue(task);
            self.parked = Some(task);
        }
        drop(lock);
        if !self.cancel_registered {
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::QueueWait;
                let lock = Rc::clone(&self.lock);
                // `Kernel::cancel_task` invokes this closure eagerly, before
                // this future gets a chance to poll again — `release()` may
                // already have handed ownership directly to `task` by then
                // (setting `owner` without ever polling it), so this has to
                // release on `task`'s behalf via the same hand-off, not just
                // splice it out of the waiter queue it may no longer be in.
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    for woken in abandon_inner(&lock, task) {
                        inner.mark_ready(woken);
                    }
                    inner.mark_ready(task);
                }));
            }
            self.cancel_registered = true;
        }
        // `release()` hands ownership directly to the front waiter, so once
        // woken this future's next poll hits the `owner == Some(task)` check
        // above; reaching here just means it hasn't been handed off yet.
        Poll::Pending
    }
}

impl Drop for LockAcquireFuture {
    fn drop(&mut self) {
        let Some(task) = self.parked.take() else { return };
        // A future built via `acquire_already_queued` can already hold
        // ownership outright (granted by `Lock::splice_waiters`) by the time
        // it's dropped without ever completing its final poll — e.g. a
        // losing race in a `select`-style combinator. Plain removal would
        // leave the lock owned by a task that's gone and nobody left to
        // release it, so fall back to the same hand-off `release()` uses.
        let next = abandon_inner(&self.lock, task);
        if next.is_empty() {
            return;
        }
        if let Some((kernel, _)) = current() {
            if let Some(kernel) = kernel.upgrade() {
                let mut inner = kernel.borrow_mut();
                for task in next {
                    inner.mark_ready(task);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_is_unlocked() {
        let lock = Lock::new();
        assert!(!lock.locked());
    }
}
