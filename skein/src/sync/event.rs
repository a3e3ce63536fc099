// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! A one-shot, re-usable flag with FIFO-woken waiters, matching curio's
//! `Event`.

use super::current_or_panic;
use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, TaskState, WaitQueue};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

struct EventInner {
    is_set: bool,
    waiters: WaitQueue,
}

/// A flag that one or more tasks can wait on, and any task can set. Setting
/// it wakes every current waiter; tasks that call `wait()` afterward return
/// immediately until [`Event::clear`] resets it.
#[derive(Clone)]
pub struct Event {
    inner: Rc<RefCell<EventInner>>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Rc::new(RefCell::new(EventInner { is_set: false, waiters: WaitQueue::new() })) }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.borrow().is_set
    }

    /// Sets the event, waking every task currently parked in [`Event::wait`].
    pub fn set(&self) {
        let Some((kernel, _)) = current() else { return };
        let Some(kernel) = kernel.upgrade() else { return };
        let woken = {
            let mut state = self.inner.borrow_mut();
            state.is_set = true;
            state.waiters.notify_all()
        };
        let mut inner = kernel.borrow_mut();
        for task in woken {
            inner.mark_ready(task);
        }
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().is_set = false;
    }

    #[must_use]
    pub fn wait(&self) -> EventWaitFuture {
        EventWaitFuture { event: Rc::clone(&self.inner), parked: None }
    }
}

pub struct EventWaitFuture {
    event: Rc<RefCell<EventInner>>,
    parked: Option<skein_core::TaskId>,
}

impl Future for EventWaitFuture {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = current_or_panic();
        let Some((kernel, _)) = current() else { return Poll::Pending };
        let Some(kernel) = kernel.upgrade() else { return Poll::Ready(Ok(())) };

        if self.event.borrow().is_set {
            self.parked = None;
            return Poll::Ready(Ok(()));
        }

        let mut inner = kernel.borrow_mut();
        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if self.parked.take().is_some() {
                self.event.borrow_mut().waiters.remove(task);
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        if self.parked.is_none() {
            self.event.borrow_mut().waiters.enqueue(task);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::QueueWait;
                let event = Rc::clone(&self.event);
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    event.borrow_mut().waiters.remove(task);
                    inner.mark_ready(task);
                }));
            }
            self.parked = Some(task);
        }
        Poll::Pending
    }
}

impl Drop for EventWaitFuture {
    fn drop(&mut self) {
        if let Some(task) = self.parked.take() {
            self.event.borrow_mut().waiters.remove(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_event_is_not_set() {
        let event = Event::new();
        assert!(!event.is_set());
    }
}
