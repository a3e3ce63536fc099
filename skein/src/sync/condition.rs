// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! A condition variable paired with a [`Lock`], matching curio's
//! `Condition`.

use super::current_or_panic;
use super::lock::Lock;
use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, LockError, TaskState, WaitQueue};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A condition variable. Always used together with its `lock`: callers must
/// hold the lock before calling [`Condition::wait`], which atomically
/// releases it while parked and reacquires it before returning.
#[derive(Clone)]
pub struct Condition {
    pub lock: Lock,
    waiters: Rc<RefCell<WaitQueue>>,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition {
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock(Lock::new())
    }

    #[must_use]
    pub fn with_lock(lock: Lock) -> Self {
        Self { lock, waiters: Rc::new(RefCell::new(WaitQueue::new())) }
    }

    #[must_use]
    pub fn acquire(&self) -> super::lock::LockAcquireFuture {
        self.lock.acquire()
    }

    /// # Errors
    /// See [`Lock::release`].
    pub fn release(&self) -> Result<(), LockError> {
        self.lock.release()
    }

    /// Releases the lock, parks until [`Condition::notify`]/[`Condition::notify_all`],
    /// then reacquires the lock before returning.
    #[must_use]
    pub fn wait(&self) -> ConditionWaitFuture {
        ConditionWaitFuture {
            waiters: Rc::clone(&self.waiters),
            lock: self.lock.clone(),
            reacquire: None,
            released: false,
            parked_task: None,
        }
    }

    /// Wakes up to `n` waiters (without releasing anything for them —
    /// callers are expected to still hold the lock, per the usual condition
    /// variable protocol).
    ///
    /// Woken waiters are spliced directly into the lock's own waiter queue
    /// (or handed ownership outright if the lock happens to be unheld)
    /// rather than marked ready to race a fresh `acquire()` call — otherwise
    /// a task that was never waiting on the condition at all could poll
    /// `acquire()` first and steal the lock ahead of whichever waiter this
    /// call meant to wake.
    pub fn notify(&self, n: usize) {
        let woken = self.waiters.borrow_mut().notify_n(n);
        if woken.is_empty() {
            return;
        }
        let granted = self.lock.splice_waiters(woken);
        if granted.is_empty() {
            return;
        }
        if let Some((kernel, _)) = current() {
            if let Some(kernel) = kernel.upgrade() {
                let mut inner = kernel.borrow_mut();
                for task in granted {
                    inner.mark_ready(task);
                }
            }
        }
    }

    pub fn notify_all(&self) {
        let n = self.waiters.borrow().len();
        self.notify(n);
    }
}

pub struct ConditionWaitFuture {
    waiters: Rc<RefCell<WaitQueue>>,
    lock: Lock,
    reacquire: Option<super::lock::LockAcquireFuture>,
    released: bool,
    parked_task: Option<skein_core::TaskId>,
}

impl Future for ConditionWaitFuture {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = current_or_panic();

        if let Some(reacquire) = &mut self.reacquire {
            return Pin::new(reacquire).poll(cx);
        }

        let Some((kernel, _)) = current() else { return Poll::Pending };
        let Some(kernel) = kernel.upgrade() else { return Poll::Ready(Ok(())) };
        let mut inner = kernel.borrow_mut();

        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if self.released {
                self.waiters.borrow_mut().remove(task);
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        if !self.released {
            let _ = self.lock.release();
            self.waiters.borrow_mut().enqueue(task);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::QueueWait;
                let waiters = Rc::clone(&self.waiters);
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    waiters.borrow_mut().remove(task);
                    inner.mark_ready(task);
                }));
            }
            self.released = true;
            self.parked_task = Some(task);
            return Poll::Pending;
        }

        if self.waiters.borrow().contains(task) {
            return Poll::Pending;
        }
        self.parked_task = None;

        // `notify` already spliced this task directly into the lock's own
        // waiter queue (or granted it ownership outright), so reacquire
        // through that registration rather than `Lock::acquire`, which would
        // re-enqueue a task that's already a member.
        self.reacquire = Some(self.lock.acquire_already_queued(task));
        Pin::new(self.reacquire.as_mut().expect("just set")).poll(cx)
    }
}

impl Drop for ConditionWaitFuture {
    fn drop(&mut self) {
        let Some(task) = self.parked_task.take() else { return };

        // Still in the condition's own queue: `notify` hasn't reached this
        // task yet, so a plain removal is enough.
        if self.waiters.borrow_mut().remove(task) {
            return;
        }

        // Already spliced into the lock's waiter queue (or granted
        // ownership outright) by `notify`, but dropped before `reacquire`
        // ever ran — clean up on the lock's side instead, so a dropped
        // waiter can't leave the lock permanently owned by nobody or a
        // phantom entry sitting in its waiter queue forever.
        let next = self.lock.abandon(task);
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
    fn fresh_condition_shares_a_fresh_lock() {
        let cond = Condition::new();
        assert!(!cond.lock.locked());
    }
}
