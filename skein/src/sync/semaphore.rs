// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Counting semaphores, matching curio's `Semaphore`/`BoundedSemaphore`.

use super::current_or_panic;
use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, SemaphoreError, TaskId, TaskState, WaitQueue};
use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

struct SemaphoreInner {
    value: usize,
    bound: Option<usize>,
    waiters: WaitQueue,
    /// Permits earmarked for a specific parked waiter by `release()`, not yet
    /// claimed by that waiter's own repoll. Kept separate from `value` (which
    /// only counts permits nobody is waiting for) so a task that was never
    /// parked can't poll `acquire()` in the gap and take a permit that was
    /// already handed to someone else.
    granted: HashSet<TaskId>,
}

/// A counting semaphore: `acquire()` blocks while the count is zero,
/// `release()` increments it and wakes the longest-waiting acquirer.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<RefCell<SemaphoreInner>>,
}

impl Semaphore {
    #[must_use]
    pub fn new(value: usize) -> Self {
        Self { inner: Rc::new(RefCell::new(SemaphoreInner { value, bound: None, waiters: WaitQueue::new(), granted: HashSet::new() })) }
    }

    #[must_use]
    pub fn value(&self) -> usize {
        self.inner.borrow().value
    }

    #[must_use]
    pub fn locked(&self) -> bool {
        self.value() == 0
    }

    #[must_use]
    pub fn acquire(&self) -> SemaphoreAcquireFuture {
        SemaphoreAcquireFuture { sem: Rc::clone(&self.inner), parked: None }
    }

    /// # Errors
    /// Returns [`SemaphoreError::OverRelease`] if this is a
    /// [`BoundedSemaphore`] and releasing would push the count above its
    /// original bound.
    ///
    /// A released permit is handed directly to the longest-waiting acquirer,
    /// if one is parked, rather than left in `value` for any caller of
    /// `acquire()` to pick up — matching [`super::lock::Lock::release`]'s
    /// direct hand-off, so a task that was never waiting can't poll first
    /// and steal the permit out from under the one this call meant to wake.
    pub fn release(&self) -> Result<(), SemaphoreError> {
        let granted_task = {
            let mut state = self.inner.borrow_mut();
            if let Some(bound) = state.bound {
                if state.value >= bound {
                    return Err(SemaphoreError::OverRelease);
                }
            }
            match state.waiters.notify_n(1).first().copied() {
                Some(task) => {
                    state.granted.insert(task);
                    Some(task)
                }
                None => {
                    state.value += 1;
                    None
                }
            }
        };
        if let Some(task) = granted_task {
            if let Some((kernel, _)) = current() {
                if let Some(kernel) = kernel.upgrade() {
                    kernel.borrow_mut().mark_ready(task);
                }
            }
        }
        Ok(())
    }
}

/// A [`Semaphore`] that rejects `release()` calls which would exceed the
/// bound it was constructed with (curio's `BoundedSemaphore`).
#[derive(Clone)]
pub struct BoundedSemaphore(Semaphore);

impl BoundedSemaphore {
    #[must_use]
    pub fn new(value: usize) -> Self {
        let sem = Semaphore {
            inner: Rc::new(RefCell::new(SemaphoreInner { value, bound: Some(value), waiters: WaitQueue::new(), granted: HashSet::new() })),
        };
        Self(sem)
    }

    #[must_use]
    pub fn value(&self) -> usize {
        self.0.value()
    }

    #[must_use]
    pub fn acquire(&self) -> SemaphoreAcquireFuture {
        self.0.acquire()
    }

    /// # Errors
    /// See [`Semaphore::release`].
    pub fn release(&self) -> Result<(), SemaphoreError> {
        self.0.release()
    }
}

pub struct SemaphoreAcquireFuture {
    sem: Rc<RefCell<SemaphoreInner>>,
    parked: Option<skein_core::TaskId>,
}

impl Future for SemaphoreAcquireFuture {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = current_or_panic();
        let Some((kernel, _)) = current() else { return Poll::Pending };
        let Some(kernel) = kernel.upgrade() else { return Poll::Ready(Ok(())) };
        let mut inner = kernel.borrow_mut();

        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if self.parked.take().is_some() {
                // `release()` may already have earmarked a permit for this
                // task in `granted` (popping it out of `waiters` to do so)
                // without ever polling it — reclaim that permit here rather
                // than leaving it stranded, since `Drop` won't see it either
                // once `self.parked` is cleared above.
                let mut sem = self.sem.borrow_mut();
                if sem.granted.remove(&task) {
                    sem.value += 1;
                } else {
                    sem.waiters.remove(task);
                }
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        let mut sem = self.sem.borrow_mut();
        if self.parked.is_some() && sem.granted.remove(&task) {
            self.parked = None;
            return Poll::Ready(Ok(()));
        }
        if self.parked.is_none() && sem.value > 0 {
            sem.value -= 1;
            return Poll::Ready(Ok(()));
        }

        if self.parked.is_none() {
            sem.waiters.enqueue(task);
            drop(sem);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::QueueWait;
                let sem_rc = Rc::clone(&self.sem);
                // `Kernel::cancel_task` invokes this closure eagerly, before
                // this future gets a chance to poll again — `release()` may
                // already have earmarked a permit for `task` in `granted` by
                // then, so reclaim it here rather than just splicing `task`
                // out of a `waiters` queue it may no longer be in.
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    let mut sem = sem_rc.borrow_mut();
                    if sem.granted.remove(&task) {
                        sem.value += 1;
                    } else {
                        sem.waiters.remove(task);
                    }
                    drop(sem);
                    inner.mark_ready(task);
                }));
            }
            self.parked = Some(task);
        }
        Poll::Pending
    }
}

impl Drop for SemaphoreAcquireFuture {
    fn drop(&mut self) {
        if let Some(task) = self.parked.take() {
            let mut sem = self.sem.borrow_mut();
            if sem.granted.remove(&task) {
                // Already earmarked for this task but never claimed — give
                // the permit back rather than losing it.
                sem.value += 1;
            } else {
                sem.waiters.remove(task);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_semaphore_reports_its_initial_value() {
        let sem = Semaphore::new(3);
        assert_eq!(sem.value(), 3);
        assert!(!sem.locked());
    }

    #[test]
    fn bounded_semaphore_rejects_over_release() {
        let sem = BoundedSemaphore::new(1);
        assert_eq!(sem.release(), Err(SemaphoreError::OverRelease));
    }
}
