// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! The task table, ready queue, and run loop.
//!
//! This crate represents a coroutine as a native Rust [`Future`] rather than
//! a tagged "trap" enum returned from generator resumption — the run loop
//! polls each ready task's future directly and reacts to `Poll::Pending` by
//! leaving it parked wherever the future's own construction already
//! registered it (selector, timer heap, wait queue, join list). This mirrors
//! the `Runtime::poll`/`schedule` shape of a minimal single-threaded
//! Future-based executor, widened to cover the I/O, timer, worker-pool and
//! synchronization trap surface this kernel needs.
//!
//! Task output is type-erased through [`TaskOutcome`] since a single task
//! table has to hold tasks of unrelated output types side by side — the same
//! technique `r3bl_tui`'s channel-based subsystems use `Box<dyn Any>` for
//! when a single registry must hold heterogeneous payloads.

use crate::config::KernelConfig;
use crate::selector::IoSelector;
use crate::signal::SignalDispatcher;
use crate::worker::WorkerPools;
use skein_core::{CancelledError, KernelError, TaskError, TaskId, TaskState, TimerHandle, TimerHeap, WaitQueue};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::time::{Duration, Instant};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of [`Kernel::run`]/[`Kernel::run_until_complete`] itself, as
/// opposed to a failure of the task they drive (which is delivered through
/// that task's own `Result`, not this type).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// The type-erased result of a task's future resolving.
pub enum TaskOutcome {
    Value(Box<dyn Any>),
    Error(BoxError),
    Cancelled,
}

/// A task's record in the scheduler's table.
///
/// Only the scheduler (via [`KernelInner`] methods) ever transitions
/// `state`; trap futures read it but hand state changes back through the
/// kernel handle they were constructed with.
pub(crate) struct TaskRecord {
    future: Pin<Box<dyn Future<Output = TaskOutcome>>>,
    pub(crate) state: TaskState,
    pub(crate) daemon: bool,
    pub(crate) cancel_requested: Rc<Cell<bool>>,
    pub(crate) cancel_func: Option<Box<dyn FnOnce(&mut KernelInner)>>,
    pub(crate) joiners: WaitQueue,
    pub(crate) outcome: Option<TaskOutcome>,
    pub(crate) timer_handle: Option<TimerHandle>,
    cycles: u64,
}

/// The mutable heart of a [`Kernel`]. Lives behind `Rc<RefCell<_>>` so trap
/// futures constructed anywhere in a task's call tree can reach back into it
/// via a weak reference captured from [`current`].
pub(crate) struct KernelInner {
    pub(crate) tasks: HashMap<TaskId, TaskRecord>,
    ready: VecDeque<TaskId>,
    ready_set: HashSet<TaskId>,
    pub(crate) timers: TimerHeap,
    pub(crate) selector: IoSelector,
    pub(crate) signals: SignalDispatcher,
    pub(crate) workers: WorkerPools,
    id_counter: AtomicU64,
    live_non_daemon: usize,
    config: KernelConfig,
    started: bool,
    shutting_down: bool,
}

impl KernelInner {
    fn next_task_id(&self) -> TaskId {
        TaskId::next(&self.id_counter)
    }

    /// Marks `task` runnable, deduplicating against an already-pending
    /// wakeup (a task can only be in the ready queue once at a time).
    pub(crate) fn mark_ready(&mut self, task: TaskId) {
        if let Some(record) = self.tasks.get_mut(&task) {
            if record.state.is_terminal() {
                return;
            }
            if self.ready_set.insert(task) {
                record.state = TaskState::Ready;
                self.ready.push_back(task);
            }
        }
    }

    /// Re-enqueues the currently-polling task at the back of the ready
    /// queue. `poll_task` detaches a task's record from `tasks` for the
    /// duration of its own `poll` call (so that call can borrow `self`
    /// again without a `RefCell` conflict), so `mark_ready`'s usual
    /// `tasks.get_mut` lookup can't see the caller's own task. This bypasses
    /// that lookup, relying on `poll_task` having already removed `task`
    /// from `ready_set` before polling it, so the insert below can't race
    /// with an already-queued wakeup.
    pub(crate) fn requeue_self(&mut self, task: TaskId) {
        if self.ready_set.insert(task) {
            self.ready.push_back(task);
        }
    }

    pub(crate) fn config(&self) -> &KernelConfig {
        &self.config
    }
}

/// A cheap-to-clone handle to a running kernel's shared state.
#[derive(Clone)]
pub struct Kernel(Rc<RefCell<KernelInner>>);

impl Kernel {
    /// Builds a new kernel with the given configuration. Construction sets
    /// up the I/O selector and signal dispatcher eagerly (they need a real
    /// `mio::Poll` registry token space from the start) but defers worker
    /// pool thread spawning until first use.
    ///
    /// # Errors
    /// Propagates any I/O error from creating the underlying `mio::Poll`
    /// instance or its self-pipe waker.
    pub fn new(config: KernelConfig) -> std::io::Result<Self> {
        let selector = IoSelector::new()?;
        let signals = SignalDispatcher::new(&selector)?;
        let workers = WorkerPools::new(config.max_worker_threads, config.max_worker_processes, &selector)?;
        let inner = KernelInner {
            tasks: HashMap::new(),
            ready: VecDeque::new(),
            ready_set: HashSet::new(),
            timers: TimerHeap::new(),
            selector,
            signals,
            workers,
            id_counter: AtomicU64::new(0),
            live_non_daemon: 0,
            config,
            started: false,
            shutting_down: false,
        };
        Ok(Self(Rc::new(RefCell::new(inner))))
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(KernelConfig::default()).expect("default kernel construction should not fail")
    }

    /// Recovers a `Kernel` handle from a weak reference captured by a trap
    /// future, e.g. the one [`current`] hands back. Returns `None` if every
    /// other handle to the kernel has already been dropped.
    #[must_use]
    pub(crate) fn from_weak(kernel: Weak<RefCell<KernelInner>>) -> Option<Self> {
        kernel.upgrade().map(Self)
    }

    fn weak(&self) -> Weak<RefCell<KernelInner>> {
        Rc::downgrade(&self.0)
    }

    /// Spawns `fut` as a new task and returns its handle.
    ///
    /// The child is polled once inline, synchronously, before this call
    /// returns — matching the observable behavior that a freshly spawned
    /// task has already executed up to its first suspension point by the
    /// time the spawning task resumes (see `DESIGN.md` OQ-3). This does not
    /// re-enter the run loop: it is a single direct poll of the child's
    /// future, using the same machinery the run loop itself uses.
    #[tracing::instrument(skip(self, fut), fields(daemon))]
    pub fn spawn<F, T, E>(&self, fut: F, daemon: bool) -> Task<T>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let cancel_requested = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cancel_requested);
        let wrapped: Pin<Box<dyn Future<Output = TaskOutcome>>> = Box::pin(async move {
            if flag.get() {
                return TaskOutcome::Cancelled;
            }
            match fut.await {
                Ok(v) => TaskOutcome::Value(Box::new(v)),
                Err(e) => TaskOutcome::Error(Box::new(e)),
            }
        });

        let id = {
            let mut inner = self.0.borrow_mut();
            let id = inner.next_task_id();
            if !daemon {
                inner.live_non_daemon += 1;
            }
            let record = TaskRecord {
                future: wrapped,
                state: TaskState::Ready,
                daemon,
                cancel_requested,
                cancel_func: None,
                joiners: WaitQueue::new(),
                outcome: None,
                timer_handle: None,
                cycles: 0,
            };
            inner.tasks.insert(id, record);
            inner.ready_set.insert(id);
            inner.ready.push_back(id);
            id
        };

        self.poll_task(id);

        Task { kernel: self.weak(), id, _marker: std::marker::PhantomData }
    }

    /// Drives `task` through one poll if it is currently ready, handling
    /// termination bookkeeping (joiner wakeups, non-daemon accounting,
    /// panic capture) the same way the run loop's drain pass does.
    ///
    /// Shared by `spawn` (the inline first poll) and [`Kernel::run_until_complete`].
    #[tracing::instrument(skip(self))]
    fn poll_task(&self, id: TaskId) {
        let Some(mut record) = ({
            let mut inner = self.0.borrow_mut();
            if !inner.ready_set.remove(&id) {
                return;
            }
            inner.tasks.remove(&id)
        }) else {
            return;
        };
        record.state = TaskState::Running;
        record.cycles += 1;

        let waker = task_waker(self.weak(), id);
        let mut cx = Context::from_waker(&waker);
        let guard = push_current(self.weak(), id);
        let result = catch_unwind(AssertUnwindSafe(|| record.future.as_mut().poll(&mut cx)));
        drop(guard);

        match result {
            Ok(Poll::Pending) => {
                let mut inner = self.0.borrow_mut();
                inner.tasks.insert(id, record);
            }
            Ok(Poll::Ready(outcome)) => self.finalize_task(id, record, outcome),
            Err(panic) => {
                let msg = panic_message(&panic);
                self.finalize_task(id, record, TaskOutcome::Error(msg.into()));
            }
        }
    }

    #[tracing::instrument(skip(self, record, outcome))]
    fn finalize_task(&self, id: TaskId, mut record: TaskRecord, outcome: TaskOutcome) {
        record.state = TaskState::Terminated;
        if !record.daemon {
            let mut inner = self.0.borrow_mut();
            inner.live_non_daemon = inner.live_non_daemon.saturating_sub(1);
        }
        if let TaskOutcome::Error(err) = &outcome {
            let mut inner = self.0.borrow_mut();
            if inner.config().log_errors {
                tracing::error!(task = %id, error = %err, "task terminated with an uncaught error");
            }
        }
        let joiners = {
            let mut inner = self.0.borrow_mut();
            record.outcome = Some(outcome);
            let woken = record.joiners.notify_all();
            inner.tasks.insert(id, record);
            woken
        };
        let mut inner = self.0.borrow_mut();
        for joiner in joiners {
            inner.mark_ready(joiner);
        }
    }

    /// Requests cancellation of `task`.
    ///
    /// If the task is currently blocked, its registered `cancel_func` runs
    /// immediately, splicing it out of whatever it was parked on and
    /// re-queuing it so the cancellation is observed at its next poll. If
    /// the task is not currently blocked, the request is only recorded
    /// (`cancel_requested`) and takes effect the next time the task's future
    /// awaits one of this crate's trap futures.
    ///
    /// # Errors
    /// Returns [`KernelError::SelfCancel`] if `task` is the task calling
    /// this from within its own execution.
    pub fn cancel_task(&self, task: TaskId) -> Result<(), KernelError> {
        if let Some((_, current_id)) = current() {
            if current_id == task {
                return Err(KernelError::SelfCancel);
            }
        }
        self.cancel_task_unchecked(task);
        Ok(())
    }

    /// The mechanics of [`Kernel::cancel_task`] without the self-cancel
    /// check, so [`Kernel::shutdown`] can cancel the currently running task
    /// too.
    fn cancel_task_unchecked(&self, task: TaskId) {
        let cancel_func = {
            let mut inner = self.0.borrow_mut();
            let Some(record) = inner.tasks.get_mut(&task) else {
                return;
            };
            record.cancel_requested.set(true);
            record.cancel_func.take()
        };
        if let Some(cancel_func) = cancel_func {
            let mut inner = self.0.borrow_mut();
            cancel_func(&mut inner);
            inner.mark_ready(task);
        }
    }

    /// Cancels every remaining task, including daemon tasks, and marks the
    /// kernel as shutting down so a subsequent [`Kernel::run`] drains every
    /// task (not just non-daemon ones) before returning.
    pub fn shutdown(&self) {
        let ids: Vec<TaskId> = {
            let mut inner = self.0.borrow_mut();
            inner.shutting_down = true;
            inner.tasks.keys().copied().collect()
        };
        for id in ids {
            self.cancel_task_unchecked(id);
        }
    }

    /// Runs the event loop until `fut` completes, then returns its result.
    /// Other still-live non-daemon tasks keep the loop alive even after
    /// `fut` resolves only if they were spawned as part of driving `fut`
    /// and the caller chooses to call `run_until_complete` again; a single
    /// call returns as soon as `fut` itself is done.
    ///
    /// # Errors
    /// Returns [`KernelError::AlreadyRunning`] (wrapped in [`RunError`]) if
    /// this kernel has already been run once — a `Kernel` is meant to be run
    /// once; build a fresh one instead of reusing a finished one. Otherwise
    /// propagates I/O errors from the selector's blocking poll.
    #[tracing::instrument(skip(self, fut))]
    pub fn run_until_complete<F, T, E>(&self, fut: F) -> Result<Result<T, E>, RunError>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.mark_started()?;
        let done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&done);
        let wrapped = async move {
            let r = fut.await;
            flag.set(true);
            r
        };
        let handle = self.spawn(wrapped, false);

        while !done.get() {
            self.turn()?;
        }

        let mut inner = self.0.borrow_mut();
        let record = inner.tasks.remove(&handle.id).expect("root task must still be recorded");
        match record.outcome.expect("terminated root task must carry an outcome") {
            TaskOutcome::Value(v) => Ok(Ok(*v.downcast::<T>().expect("root task output type mismatch"))),
            TaskOutcome::Error(e) => {
                let e = e.downcast::<E>().unwrap_or_else(|_| panic!("root task error type mismatch"));
                Ok(Err(*e))
            }
            TaskOutcome::Cancelled => panic!("root task of run_until_complete was cancelled"),
        }
    }

    /// Runs the loop until every non-daemon task has terminated, or — if
    /// [`Kernel::shutdown`] was called — until every remaining task
    /// (daemon included) has terminated.
    ///
    /// # Errors
    /// See [`Kernel::run_until_complete`].
    #[tracing::instrument(skip(self))]
    pub fn run(&self) -> Result<(), RunError> {
        self.mark_started()?;
        loop {
            let (remaining_non_daemon, shutting_down, live_total) = {
                let inner = self.0.borrow();
                let live_total = inner.tasks.values().filter(|r| !r.state.is_terminal()).count();
                (inner.live_non_daemon, inner.shutting_down, live_total)
            };
            let done = if shutting_down { live_total == 0 } else { remaining_non_daemon == 0 };
            if done {
                break;
            }
            self.turn()?;
        }
        Ok(())
    }

    /// Marks this kernel as started, failing if it already was. Returning
    /// `Err` uniformly (rather than panicking in debug builds) keeps this
    /// condition exercisable by an ordinary test.
    fn mark_started(&self) -> Result<(), RunError> {
        let mut inner = self.0.borrow_mut();
        if inner.started {
            return Err(RunError::Kernel(KernelError::AlreadyRunning));
        }
        inner.started = true;
        Ok(())
    }

    /// One iteration of the loop: drain the ready queue, then block in the
    /// selector for however long until the next timer deadline (or
    /// indefinitely if there is none and nothing else is pending).
    fn turn(&self) -> std::io::Result<()> {
        loop {
            let next = self.0.borrow_mut().ready.pop_front();
            let Some(id) = next else { break };
            self.poll_task(id);
        }

        let timeout = {
            let mut inner = self.0.borrow_mut();
            inner.timers.peek_deadline().map(|deadline| deadline.saturating_duration_since(Instant::now()))
        };

        let ready_fds = {
            let mut inner = self.0.borrow_mut();
            inner.selector.poll(timeout)?
        };
        for (task, mask) in ready_fds {
            let mut inner = self.0.borrow_mut();
            inner.mark_ready(task);
            let _ = mask;
        }

        let expired = {
            let mut inner = self.0.borrow_mut();
            inner.timers.pop_expired(Instant::now())
        };
        for entry in expired {
            let mut inner = self.0.borrow_mut();
            inner.mark_ready(entry.task);
        }

        let completions = {
            let mut inner = self.0.borrow_mut();
            inner.workers.drain_completions()
        };
        for task in completions {
            let mut inner = self.0.borrow_mut();
            inner.mark_ready(task);
        }

        let signalled = {
            let mut inner = self.0.borrow_mut();
            inner.signals.drain_pending()
        };
        for task in signalled {
            let mut inner = self.0.borrow_mut();
            inner.mark_ready(task);
        }

        Ok(())
    }

    pub(crate) fn inner(&self) -> &Rc<RefCell<KernelInner>> {
        &self.0
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// A handle to a spawned task, parameterized by its eventual success value.
pub struct Task<T> {
    pub(crate) kernel: Weak<RefCell<KernelInner>>,
    pub(crate) id: TaskId,
    _marker: std::marker::PhantomData<T>,
}

impl<T: 'static> Task<T> {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> Option<TaskState> {
        let kernel = self.kernel.upgrade()?;
        let inner = kernel.borrow();
        inner.tasks.get(&self.id).map(|r| r.state)
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.kernel
            .upgrade()
            .and_then(|k| k.borrow().tasks.get(&self.id).map(|r| r.cycles))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state().map(|s| s.is_terminal()).unwrap_or(true)
    }

    #[must_use]
    pub fn daemon(&self) -> bool {
        self.kernel.upgrade().and_then(|k| k.borrow().tasks.get(&self.id).map(|r| r.daemon)).unwrap_or(false)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kernel
            .upgrade()
            .and_then(|k| k.borrow().tasks.get(&self.id).map(|r| r.cancel_requested.get()))
            .unwrap_or(false)
    }

    /// Requests cancellation of this task.
    ///
    /// # Errors
    /// See [`Kernel::cancel_task`].
    pub fn cancel(&self) -> Result<(), KernelError> {
        let Some(kernel) = self.kernel.upgrade() else { return Ok(()) };
        Kernel(kernel).cancel_task(self.id)
    }

    /// Awaits this task's termination and returns its result.
    ///
    /// # Errors
    /// Returns [`CancelledError`] if the task was cancelled, or
    /// [`TaskError`] wrapping the task's uncaught error otherwise.
    pub fn join(&self) -> JoinFuture<T> {
        JoinFuture { kernel: self.kernel.clone(), id: self.id, parked: None, _marker: std::marker::PhantomData }
    }
}

pub struct JoinFuture<T> {
    kernel: Weak<RefCell<KernelInner>>,
    id: TaskId,
    parked: Option<TaskId>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: 'static> Future for JoinFuture<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(kernel) = self.kernel.upgrade() else {
            return Poll::Ready(Err(JoinError::Cancelled(CancelledError { task: self.id })));
        };
        let mut inner = kernel.borrow_mut();
        let Some(record) = inner.tasks.get_mut(&self.id) else {
            return Poll::Ready(Err(JoinError::Cancelled(CancelledError { task: self.id })));
        };
        if !record.state.is_terminal() {
            if let Some((_, waiter)) = current() {
                if !record.joiners.contains(waiter) {
                    record.joiners.enqueue(waiter);
                }
                self.parked = Some(waiter);
            }
            let _ = cx;
            return Poll::Pending;
        }
        self.parked = None;
        match record.outcome.take() {
            Some(TaskOutcome::Value(v)) => {
                Poll::Ready(Ok(*v.downcast::<T>().expect("Task<T>::join downcast type mismatch")))
            }
            Some(TaskOutcome::Error(e)) => Poll::Ready(Err(JoinError::Failed(TaskError { task: self.id, source: e }))),
            Some(TaskOutcome::Cancelled) | None => Poll::Ready(Err(JoinError::Cancelled(CancelledError { task: self.id }))),
        }
    }
}

impl<T> Drop for JoinFuture<T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.parked.take() {
            if let Some(kernel) = self.kernel.upgrade() {
                if let Some(record) = kernel.borrow_mut().tasks.get_mut(&self.id) {
                    record.joiners.remove(waiter);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
    #[error(transparent)]
    Failed(#[from] TaskError),
}

/// Suspends the current task until `deadline`. Built directly on the timer
/// heap: construction inserts the entry, `Drop` tombstones it if the future
/// is dropped before firing (e.g. a `select`-style race loses).
///
/// `sleep(Duration::ZERO)` is a distinct case handled by `immediate`: rather
/// than computing a deadline that is already in the past (which would
/// resolve on the very first poll without ever giving another ready task a
/// turn), it parks the task at the back of the ready queue exactly once —
/// "yield" rather than "sleep" — matching curio's `sleep(0)`.
pub struct SleepFuture {
    kernel: Weak<RefCell<KernelInner>>,
    deadline: Instant,
    immediate: bool,
    yielded: bool,
    handle: Option<TimerHandle>,
    cancel_requested: Option<Rc<Cell<bool>>>,
}

impl SleepFuture {
    #[must_use]
    pub fn new(kernel: Weak<RefCell<KernelInner>>, duration: Duration) -> Self {
        Self {
            kernel,
            deadline: Instant::now() + duration,
            immediate: duration.is_zero(),
            yielded: false,
            handle: None,
            cancel_requested: None,
        }
    }
}

impl Future for SleepFuture {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(kernel) = self.kernel.upgrade() else {
            return Poll::Ready(Ok(()));
        };
        let Some((_, task)) = current() else {
            return Poll::Ready(Ok(()));
        };
        if self.cancel_requested.is_none() {
            let inner = kernel.borrow();
            self.cancel_requested = inner.tasks.get(&task).map(|r| Rc::clone(&r.cancel_requested));
        }
        if self.cancel_requested.as_ref().is_some_and(|f| f.get()) {
            return Poll::Ready(Err(CancelledError { task }));
        }
        if self.immediate {
            if self.yielded {
                return Poll::Ready(Ok(()));
            }
            self.yielded = true;
            kernel.borrow_mut().requeue_self(task);
            return Poll::Pending;
        }
        if Instant::now() >= self.deadline {
            return Poll::Ready(Ok(()));
        }
        if self.handle.is_none() {
            let mut inner = kernel.borrow_mut();
            let handle = inner.timers.insert(self.deadline, task, skein_core::TimerKind::Sleep);
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::TimeSleep;
                let cancel_kernel = Weak::clone(&self.kernel);
                let cancel_handle = handle.clone();
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    cancel_handle.cancel();
                    let _ = cancel_kernel;
                    inner.mark_ready(task);
                }));
            }
            self.handle = Some(handle);
        }
        Poll::Pending
    }
}

impl Drop for SleepFuture {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.cancel();
        }
    }
}

pub(crate) fn current() -> Option<(Weak<RefCell<KernelInner>>, TaskId)> {
    CURRENT.with(|c| c.borrow().last().cloned())
}

/// Returns the id of the task currently being polled, or `None` if called
/// outside of a running task's call tree.
#[must_use]
pub fn current_task() -> Option<TaskId> {
    current().map(|(_, id)| id)
}

thread_local! {
    static CURRENT: RefCell<Vec<(Weak<RefCell<KernelInner>>, TaskId)>> = const { RefCell::new(Vec::new()) };
}

struct CurrentGuard;

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
    }
}

fn push_current(kernel: Weak<RefCell<KernelInner>>, task: TaskId) -> CurrentGuard {
    CURRENT.with(|c| c.borrow_mut().push((kernel, task)));
    CurrentGuard
}

struct WakerPayload {
    kernel: Weak<RefCell<KernelInner>>,
    task: TaskId,
}

fn schedule_task(kernel: &Rc<RefCell<KernelInner>>, task: TaskId) {
    let mut inner = kernel.borrow_mut();
    inner.mark_ready(task);
}

fn wake_payload(payload: &WakerPayload) {
    if let Some(kernel) = payload.kernel.upgrade() {
        schedule_task(&kernel, payload.task);
    }
}

unsafe fn waker_clone(ptr: *const ()) -> RawWaker {
    let rc = unsafe { Rc::from_raw(ptr.cast::<WakerPayload>()) };
    let cloned = Rc::clone(&rc);
    std::mem::forget(rc);
    RawWaker::new(Rc::into_raw(cloned).cast::<()>(), &VTABLE)
}

unsafe fn waker_wake(ptr: *const ()) {
    let rc = unsafe { Rc::from_raw(ptr.cast::<WakerPayload>()) };
    wake_payload(&rc);
}

unsafe fn waker_wake_by_ref(ptr: *const ()) {
    let rc = unsafe { Rc::from_raw(ptr.cast::<WakerPayload>()) };
    wake_payload(&rc);
    std::mem::forget(rc);
}

unsafe fn waker_drop(ptr: *const ()) {
    drop(unsafe { Rc::from_raw(ptr.cast::<WakerPayload>()) });
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

/// Builds a [`Waker`] that reschedules `task` on `kernel` when woken.
///
/// Built on a hand-rolled [`RawWaker`] vtable over an `Rc` rather than the
/// `std::task::Wake` convenience trait, since `Wake` requires `Send + Sync`
/// and this kernel is deliberately single-threaded — the waker is never
/// moved across an OS thread boundary, so the `Rc` refcounting it relies on
/// stays sound.
#[must_use]
pub(crate) fn task_waker(kernel: Weak<RefCell<KernelInner>>, task: TaskId) -> Waker {
    let payload = Rc::new(WakerPayload { kernel, task });
    let raw = Rc::into_raw(payload).cast::<()>();
    unsafe { Waker::from_raw(RawWaker::new(raw, &VTABLE)) }
}
