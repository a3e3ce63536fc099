// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! A bounded or unbounded FIFO work queue with `task_done`/`join` tracking,
//! matching curio's `Queue`.

use super::current_or_panic;
use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, QueueError, TaskId, TaskState, WaitQueue};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

struct QueueInner<T> {
    items: VecDeque<T>,
    maxsize: Option<usize>,
    unfinished: usize,
    getters: WaitQueue,
    putters: WaitQueue,
    join_waiters: WaitQueue,
    /// Items earmarked for a specific parked getter by a matching `put()`,
    /// not yet claimed by that getter's own repoll. Kept out of `items` so a
    /// getter that was never parked can't pop one that was already handed to
    /// someone else.
    granted_gets: HashMap<TaskId, T>,
    /// Putters granted the next open slot directly by a matching `get()`,
    /// for the same reason.
    granted_puts: HashSet<TaskId>,
}

/// A FIFO queue of `T` shared between producer and consumer tasks.
///
/// `get()` blocks while empty; `put()` blocks while at `maxsize` (if any).
/// `task_done()`/`join()` let producers wait until every item `put()` has
/// had a matching `task_done()`, the same "all work drained" protocol
/// Python's `queue.Queue` offers.
pub struct Queue<T> {
    inner: Rc<RefCell<QueueInner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T> Queue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_maxsize(None)
    }

    #[must_use]
    pub fn with_maxsize(maxsize: Option<usize>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueInner {
                items: VecDeque::new(),
                maxsize,
                unfinished: 0,
                getters: WaitQueue::new(),
                putters: WaitQueue::new(),
                join_waiters: WaitQueue::new(),
                granted_gets: HashMap::new(),
                granted_puts: HashSet::new(),
            })),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        let inner = self.inner.borrow();
        inner.maxsize.is_some_and(|m| inner.items.len() >= m)
    }

    #[must_use]
    pub fn put(&self, item: T) -> QueuePutFuture<T> {
        QueuePutFuture { queue: Rc::clone(&self.inner), item: Some(item), parked: None }
    }

    #[must_use]
    pub fn get(&self) -> QueueGetFuture<T> {
        QueueGetFuture { queue: Rc::clone(&self.inner), parked: None }
    }

    /// Marks one previously-`get()`-returned item as fully processed.
    ///
    /// # Errors
    /// Returns [`QueueError::TaskDoneWithoutPut`] if called more times than
    /// items have been `put()` and not yet marked done.
    pub fn task_done(&self) -> Result<(), QueueError> {
        let woken = {
            let mut inner = self.inner.borrow_mut();
            if inner.unfinished == 0 {
                return Err(QueueError::TaskDoneWithoutPut);
            }
            inner.unfinished -= 1;
            if inner.unfinished == 0 {
                inner.join_waiters.notify_all()
            } else {
                Vec::new()
            }
        };
        if !woken.is_empty() {
            if let Some((kernel, _)) = current() {
                if let Some(kernel) = kernel.upgrade() {
                    let mut inner = kernel.borrow_mut();
                    for task in woken {
                        inner.mark_ready(task);
                    }
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn join(&self) -> QueueJoinFuture<T> {
        QueueJoinFuture { queue: Rc::clone(&self.inner), parked: None }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct QueuePutFuture<T> {
    queue: Rc<RefCell<QueueInner<T>>>,
    item: Option<T>,
    parked: Option<skein_core::TaskId>,
}

impl<T> QueuePutFuture<T> {
    /// Pushes `item`, directly handing it to a parked getter if one exists
    /// instead of leaving it in `items` for any getter to take — mirroring
    /// [`super::lock::Lock::release`]'s direct hand-off so a getter that was
    /// never parked can't pop an item that was already earmarked for a
    /// specific waiter.
    fn deliver(queue: &mut QueueInner<T>, item: T) -> Vec<TaskId> {
        queue.unfinished += 1;
        let getter = queue.getters.notify_n(1);
        if let Some(&task) = getter.first() {
            queue.granted_gets.insert(task, item);
        } else {
            queue.items.push_back(item);
        }
        getter
    }
}

impl<T> Future for QueuePutFuture<T> {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = current_or_panic();
        let Some((kernel, _)) = current() else { return Poll::Pending };
        let Some(kernel) = kernel.upgrade() else { return Poll::Ready(Ok(())) };
        let mut inner = kernel.borrow_mut();

        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if self.parked.take().is_some() {
                let mut queue = self.queue.borrow_mut();
                queue.granted_puts.remove(&task);
                queue.putters.remove(task);
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        let mut queue = self.queue.borrow_mut();

        if self.parked.is_some() && queue.granted_puts.remove(&task) {
            let item = self.item.take().expect("QueuePutFuture polled after completion");
            let woken = Self::deliver(&mut queue, item);
            drop(queue);
            self.parked = None;
            for task in woken {
                inner.mark_ready(task);
            }
            return Poll::Ready(Ok(()));
        }

        let has_room = self.parked.is_none() && queue.maxsize.map_or(true, |m| queue.items.len() < m);
        if has_room {
            let item = self.item.take().expect("QueuePutFuture polled after completion");
            let woken = Self::deliver(&mut queue, item);
            drop(queue);
            self.parked = None;
            for task in woken {
                inner.mark_ready(task);
            }
            return Poll::Ready(Ok(()));
        }

        if self.parked.is_none() {
            queue.putters.enqueue(task);
            drop(queue);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::QueueWait;
                let queue_rc = Rc::clone(&self.queue);
                // `Kernel::cancel_task` invokes this closure eagerly, before
                // this future gets a chance to poll again — a matching `get()`
                // may already have earmarked a slot for `task` in
                // `granted_puts` by then, so reclaim it here rather than just
                // splicing `task` out of a `putters` queue it may no longer
                // be in.
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    let mut queue = queue_rc.borrow_mut();
                    queue.granted_puts.remove(&task);
                    queue.putters.remove(task);
                    drop(queue);
                    inner.mark_ready(task);
                }));
            }
            self.parked = Some(task);
        }
        Poll::Pending
    }
}

impl<T> Drop for QueuePutFuture<T> {
    fn drop(&mut self) {
        if let Some(task) = self.parked.take() {
            let mut queue = self.queue.borrow_mut();
            queue.granted_puts.remove(&task);
            queue.putters.remove(task);
        }
    }
}

pub struct QueueGetFuture<T> {
    queue: Rc<RefCell<QueueInner<T>>>,
    parked: Option<skein_core::TaskId>,
}

impl<T> Future for QueueGetFuture<T> {
    type Output = Result<T, CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = current_or_panic();
        let Some((kernel, _)) = current() else { return Poll::Pending };
        let Some(kernel) = kernel.upgrade() else { return Poll::Pending };
        let mut inner = kernel.borrow_mut();

        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if self.parked.take().is_some() {
                let mut queue = self.queue.borrow_mut();
                if let Some(item) = queue.granted_gets.remove(&task) {
                    queue.items.push_front(item);
                } else {
                    queue.getters.remove(task);
                }
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        let mut queue = self.queue.borrow_mut();

        if self.parked.is_some() {
            if let Some(item) = queue.granted_gets.remove(&task) {
                self.parked = None;
                return Poll::Ready(Ok(item));
            }
        } else if let Some(item) = queue.items.pop_front() {
            let putter = queue.putters.notify_n(1);
            if let Some(&woken) = putter.first() {
                queue.granted_puts.insert(woken);
            }
            drop(queue);
            for task in putter {
                inner.mark_ready(task);
            }
            return Poll::Ready(Ok(item));
        }

        if self.parked.is_none() {
            queue.getters.enqueue(task);
            drop(queue);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::QueueWait;
                let queue_rc = Rc::clone(&self.queue);
                // `Kernel::cancel_task` invokes this closure eagerly, before
                // this future gets a chance to poll again — a matching
                // `put()` may already have earmarked an item for `task` in
                // `granted_gets` by then, so reclaim it here (pushing it back
                // onto the front of `items` rather than losing it) instead of
                // just splicing `task` out of a `getters` queue it may no
                // longer be in.
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    let mut queue = queue_rc.borrow_mut();
                    if let Some(item) = queue.granted_gets.remove(&task) {
                        queue.items.push_front(item);
                    } else {
                        queue.getters.remove(task);
                    }
                    drop(queue);
                    inner.mark_ready(task);
                }));
            }
            self.parked = Some(task);
        }
        Poll::Pending
    }
}

impl<T> Drop for QueueGetFuture<T> {
    fn drop(&mut self) {
        if let Some(task) = self.parked.take() {
            let mut queue = self.queue.borrow_mut();
            if let Some(item) = queue.granted_gets.remove(&task) {
                queue.items.push_front(item);
            } else {
                queue.getters.remove(task);
            }
        }
    }
}

pub struct QueueJoinFuture<T> {
    queue: Rc<RefCell<QueueInner<T>>>,
    parked: Option<skein_core::TaskId>,
}

impl<T> Future for QueueJoinFuture<T> {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = current_or_panic();
        let Some((kernel, _)) = current() else { return Poll::Pending };
        let Some(kernel) = kernel.upgrade() else { return Poll::Ready(Ok(())) };
        let mut inner = kernel.borrow_mut();

        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if self.parked.take().is_some() {
                self.queue.borrow_mut().join_waiters.remove(task);
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        if self.queue.borrow().unfinished == 0 {
            self.parked = None;
            return Poll::Ready(Ok(()));
        }

        if self.parked.is_none() {
            self.queue.borrow_mut().join_waiters.enqueue(task);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::QueueWait;
                let queue_rc = Rc::clone(&self.queue);
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    queue_rc.borrow_mut().join_waiters.remove(task);
                    inner.mark_ready(task);
                }));
            }
            self.parked = Some(task);
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_queue_is_empty() {
        let q: Queue<u32> = Queue::new();
        assert!(q.is_empty());
        assert!(!q.is_full());
    }

    #[test]
    fn maxsize_zero_queue_reports_full_when_empty() {
        let q: Queue<u32> = Queue::with_maxsize(Some(0));
        assert!(q.is_full());
    }
}
