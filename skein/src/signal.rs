// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Signal delivery integrated into the selector's event loop, the same way
//! `r3bl_tui`'s terminal backend wires `signal-hook-mio` into its own
//! `mio::Poll` instance to catch `SIGWINCH`/`SIGTERM` alongside terminal
//! input — here generalized to any signal a task asks to wait for.

use crate::selector::IoSelector;
use signal_hook::consts::signal::*;
use signal_hook_mio::v1_0::Signals;
use skein_core::{TaskId, WaitQueue};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak as RcWeak};

struct SignalSetShared {
    signals: Vec<i32>,
    pending: VecDeque<i32>,
    waiters: WaitQueue,
    subscribed: bool,
}

/// A named set of Unix signal numbers a task can wait on together, mirroring
/// curio's `SignalSet`.
///
/// Subscribing (on first `.wait()`) installs this set with the dispatcher
/// for the lifetime of the set, not just for the duration of one `.wait()`
/// call: a signal delivered while no task is actively parked accumulates in
/// this set's own pending queue rather than being dropped, so a
/// `loop { set.wait().await; ... }` consumer can't lose a signal that
/// arrives in the gap between one `.wait()` resolving and the next being
/// polled. `.ignore()` unsubscribes and discards anything still queued.
/// Cloning shares the same underlying queue and subscription (`Rc`), the way
/// curio lets multiple handles observe one subscription.
#[derive(Clone)]
pub struct SignalSet(Rc<RefCell<SignalSetShared>>);

impl SignalSet {
    #[must_use]
    pub fn new(signals: impl IntoIterator<Item = i32>) -> Self {
        Self(Rc::new(RefCell::new(SignalSetShared {
            signals: signals.into_iter().collect(),
            pending: VecDeque::new(),
            waiters: WaitQueue::new(),
            subscribed: false,
        })))
    }

    #[must_use]
    pub fn signals(&self) -> Vec<i32> {
        self.0.borrow().signals.clone()
    }

    /// Awaits delivery of any signal in this set — returning immediately
    /// with one already queued, if this set has been waited on before and a
    /// signal arrived since.
    #[must_use]
    pub fn wait(&self) -> SignalWaitFuture {
        crate::api::sigwait(self.clone())
    }

    /// Unsubscribes this set from future deliveries and discards anything
    /// already queued. A task currently parked in `.wait()` on this set is
    /// left parked — it will not observe a future signal once unsubscribed,
    /// matching curio's `ignore()`, which is meant to be called between
    /// waits rather than concurrently with one.
    pub fn ignore(&self) {
        if let Some((kernel, _)) = crate::scheduler::current() {
            if let Some(kernel) = kernel.upgrade() {
                kernel.borrow_mut().signals.unsubscribe(self);
            }
        }
        let mut shared = self.0.borrow_mut();
        shared.pending.clear();
        shared.subscribed = false;
    }
}

pub const SIGHUP_NO: i32 = SIGHUP;
pub const SIGINT_NO: i32 = SIGINT;
pub const SIGTERM_NO: i32 = SIGTERM;
pub const SIGUSR1_NO: i32 = SIGUSR1;
pub const SIGUSR2_NO: i32 = SIGUSR2;

const SIGNAL_TOKEN: mio::Token = mio::Token(usize::MAX - 1);

/// Dispatches delivered Unix signals to every subscribed [`SignalSet`],
/// queuing a delivery in the set's own pending queue and waking one waiting
/// task (FIFO) per delivery.
pub struct SignalDispatcher {
    signals: Signals,
    /// Which sets are subscribed to which signal number. Held by weak
    /// reference so a dropped `SignalSet` prunes itself the next time a
    /// signal for one of its numbers is delivered, without requiring an
    /// explicit `ignore()`.
    subscriptions: HashMap<i32, Vec<RcWeak<RefCell<SignalSetShared>>>>,
}

impl SignalDispatcher {
    /// # Errors
    /// Propagates any I/O error registering the underlying `signalfd`/`pipe`
    /// with the selector.
    pub fn new(selector: &IoSelector) -> std::io::Result<Self> {
        let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2])?;
        selector.registry().register(&mut signals, SIGNAL_TOKEN, mio::Interest::READABLE)?;
        Ok(Self { signals, subscriptions: HashMap::new() })
    }

    /// Subscribes `set` to every signal number it names, if not already
    /// subscribed. Idempotent — safe to call on every poll.
    fn subscribe(&mut self, set: &SignalSet) {
        let mut shared = set.0.borrow_mut();
        if shared.subscribed {
            return;
        }
        shared.subscribed = true;
        let weak = Rc::downgrade(&set.0);
        for &no in &shared.signals {
            self.subscriptions.entry(no).or_default().push(RcWeak::clone(&weak));
        }
    }

    /// Removes every subscription belonging to `set`.
    fn unsubscribe(&mut self, set: &SignalSet) {
        for subs in self.subscriptions.values_mut() {
            subs.retain(|w| match w.upgrade() {
                Some(shared) => !Rc::ptr_eq(&shared, &set.0),
                None => false,
            });
        }
    }

    /// Called from the run loop's drain pass: reads any pending signals off
    /// the underlying pipe, queues each delivery on every subscribed set,
    /// and returns every task woken as a result (one per set with a waiter,
    /// per delivered signal).
    pub fn drain_pending(&mut self) -> Vec<TaskId> {
        let mut woken = Vec::new();
        for signal in self.signals.pending() {
            let Some(subs) = self.subscriptions.get_mut(&signal) else {
                continue;
            };
            subs.retain(|w| {
                let Some(shared) = w.upgrade() else {
                    return false;
                };
                let mut shared = shared.borrow_mut();
                shared.pending.push_back(signal);
                woken.extend(shared.waiters.notify_n(1));
                true
            });
        }
        woken
    }
}

use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, TaskState};
use std::future::Future;
use std::pin::Pin;
use std::rc::Weak;
use std::task::{Context, Poll};

/// Awaits delivery of one signal from a [`SignalSet`]. Resolves with the
/// delivered signal number.
pub struct SignalWaitFuture {
    kernel: Weak<RefCell<KernelInner>>,
    set: SignalSet,
    parked: Option<TaskId>,
}

impl SignalWaitFuture {
    #[must_use]
    pub fn new(kernel: Weak<RefCell<KernelInner>>, set: SignalSet) -> Self {
        Self { kernel, set, parked: None }
    }
}

impl Future for SignalWaitFuture {
    type Output = Result<i32, CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(kernel) = self.kernel.upgrade() else {
            return Poll::Pending;
        };
        let Some((_, task)) = current() else {
            return Poll::Pending;
        };
        let mut inner = kernel.borrow_mut();

        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            if let Some(task) = self.parked.take() {
                self.set.0.borrow_mut().waiters.remove(task);
            }
            return Poll::Ready(Err(CancelledError { task }));
        }

        inner.signals.subscribe(&self.set);

        if let Some(no) = self.set.0.borrow_mut().pending.pop_front() {
            if let Some(task) = self.parked.take() {
                self.set.0.borrow_mut().waiters.remove(task);
            }
            return Poll::Ready(Ok(no));
        }

        if self.parked.is_none() {
            self.set.0.borrow_mut().waiters.enqueue(task);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::SignalWait;
                let set = self.set.clone();
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    set.0.borrow_mut().waiters.remove(task);
                    inner.mark_ready(task);
                }));
            }
            self.parked = Some(task);
        }
        Poll::Pending
    }
}

impl Drop for SignalWaitFuture {
    fn drop(&mut self) {
        if let Some(task) = self.parked.take() {
            self.set.0.borrow_mut().waiters.remove(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_on_a_set_registers_every_signal_number() {
        let set = SignalSet::new([SIGINT_NO, SIGTERM_NO]);
        assert_eq!(set.signals(), vec![SIGINT_NO, SIGTERM_NO]);
    }

    #[test]
    fn a_signal_queued_with_no_waiter_is_not_lost() {
        let set = SignalSet::new([SIGUSR1_NO]);
        set.0.borrow_mut().subscribed = true;
        set.0.borrow_mut().pending.push_back(SIGUSR1_NO);
        assert_eq!(set.0.borrow_mut().pending.pop_front(), Some(SIGUSR1_NO));
    }
}
