// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Bridges blocking work out to real OS threads (and external processes)
//! without blocking the kernel thread, posting completions back through a
//! channel and an `mio::Waker` the same way
//! `resilient_reactor_thread::rrt_worker` hands results back to its reactor
//! via a channel plus a waker slot, rather than sharing memory directly.
//!
//! `run_in_process` executes an external [`std::process::Command`] rather
//! than an arbitrary closure: Rust has no stable, dependency-free way to
//! serialize a closure across a `fork`+`exec` boundary the way Python
//! pickles one for `ProcessPoolExecutor`, so the Rust-idiomatic analogue is
//! to hand the worker pool something that is already process-shaped.

use crate::selector::IoSelector;
use skein_core::TaskId;
use std::any::Any;
use std::collections::VecDeque;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

pub type BoxAny = Box<dyn Any + Send>;

/// A caller-supplied submission point for [`crate::run_in_executor`]: a
/// thread pool, `rayon`, or any other off-kernel-thread work source that
/// knows how to run a boxed closure and hand the result back through the
/// [`ExecutorSink`] it is given.
///
/// `submit` is called synchronously from the kernel thread — it only needs
/// to hand `job` off somewhere and return; the actual work, and the call to
/// `sink.complete`, can happen on any thread.
pub trait Executor {
    fn submit(&self, job: Box<dyn FnOnce() -> BoxAny + Send>, sink: ExecutorSink);
}

/// Thread-safe handle an [`Executor`] uses to post its result back to the
/// kernel once done, reusing the same completion channel and `mio::Waker`
/// the built-in thread/process pools post through.
#[derive(Clone)]
pub struct ExecutorSink {
    task: TaskId,
    tx: Sender<(TaskId, BoxAny)>,
    waker: Arc<mio::Waker>,
}

impl ExecutorSink {
    pub fn complete(self, result: BoxAny) {
        let _ = self.tx.send((self.task, result));
        let _ = self.waker.wake();
    }
}

enum Job {
    Thread(Box<dyn FnOnce() -> BoxAny + Send>),
    Process(Command),
}

struct PendingJob {
    task: TaskId,
    job: Job,
}

/// Owns both worker pools plus the shared completion channel the kernel
/// drains once per run-loop turn.
pub struct WorkerPools {
    max_threads: usize,
    max_processes: usize,
    active_threads: Arc<AtomicUsize>,
    active_processes: Arc<AtomicUsize>,
    pending: VecDeque<PendingJob>,
    completion_tx: Sender<(TaskId, BoxAny)>,
    completion_rx: Receiver<(TaskId, BoxAny)>,
    results: std::collections::HashMap<TaskId, BoxAny>,
    waker: Arc<mio::Waker>,
    /// pid of every currently-running child process, so cancellation can
    /// find it to send `SIGTERM` (see `DESIGN.md` OQ-1).
    children: Arc<Mutex<std::collections::HashMap<TaskId, u32>>>,
}

impl WorkerPools {
    pub fn new(max_threads: usize, max_processes: usize, selector: &IoSelector) -> std::io::Result<Self> {
        let (completion_tx, completion_rx) = mpsc::channel();
        Ok(Self {
            max_threads,
            max_processes,
            active_threads: Arc::new(AtomicUsize::new(0)),
            active_processes: Arc::new(AtomicUsize::new(0)),
            pending: VecDeque::new(),
            completion_tx,
            completion_rx,
            results: std::collections::HashMap::new(),
            waker: Arc::clone(&selector.waker),
            children: Arc::new(Mutex::new(std::collections::HashMap::new())),
        })
    }

    fn try_start_next(&mut self) {
        while let Some(pending) = self.pending.front() {
            let started = match &pending.job {
                Job::Thread(_) => self.active_threads.load(Ordering::SeqCst) < self.max_threads,
                Job::Process(_) => self.active_processes.load(Ordering::SeqCst) < self.max_processes,
            };
            if !started {
                break;
            }
            let PendingJob { task, job } = self.pending.pop_front().expect("just peeked");
            match job {
                Job::Thread(f) => self.spawn_thread(task, f),
                Job::Process(cmd) => self.spawn_process(task, cmd),
            }
        }
    }

    fn spawn_thread(&mut self, task: TaskId, f: Box<dyn FnOnce() -> BoxAny + Send>) {
        self.active_threads.fetch_add(1, Ordering::SeqCst);
        let tx = self.completion_tx.clone();
        let waker = Arc::clone(&self.waker);
        let active = Arc::clone(&self.active_threads);
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
                .unwrap_or_else(|_| Box::new("worker thread panicked") as BoxAny);
            active.fetch_sub(1, Ordering::SeqCst);
            let _ = tx.send((task, result));
            let _ = waker.wake();
        });
    }

    fn spawn_process(&mut self, task: TaskId, mut cmd: Command) {
        self.active_processes.fetch_add(1, Ordering::SeqCst);
        let tx = self.completion_tx.clone();
        let waker = Arc::clone(&self.waker);
        let active = Arc::clone(&self.active_processes);
        let children = Arc::clone(&self.children);
        match cmd.spawn() {
            Ok(mut child) => {
                children.lock().expect("worker child-pid map poisoned").insert(task, child.id());
                std::thread::spawn(move || {
                    let output = child.wait();
                    children.lock().expect("worker child-pid map poisoned").remove(&task);
                    active.fetch_sub(1, Ordering::SeqCst);
                    let result: BoxAny = Box::new(output.map_err(|e| e.to_string()));
                    let _ = tx.send((task, result));
                    let _ = waker.wake();
                });
            }
            Err(e) => {
                active.fetch_sub(1, Ordering::SeqCst);
                let result: BoxAny = Box::new(Result::<std::process::ExitStatus, String>::Err(e.to_string()));
                let _ = tx.send((task, result));
                let _ = waker.wake();
            }
        }
    }

    /// Queues `f` to run on a pool thread, starting it immediately if a
    /// slot is free.
    #[tracing::instrument(skip(self, f))]
    pub fn submit_thread(&mut self, task: TaskId, f: Box<dyn FnOnce() -> BoxAny + Send>) {
        self.pending.push_back(PendingJob { task, job: Job::Thread(f) });
        self.try_start_next();
    }

    /// Queues `cmd` to run as a child process, starting it immediately if a
    /// slot is free.
    #[tracing::instrument(skip(self, cmd))]
    pub fn submit_process(&mut self, task: TaskId, cmd: Command) {
        self.pending.push_back(PendingJob { task, job: Job::Process(cmd) });
        self.try_start_next();
    }

    /// Sends `SIGTERM` to the child process backing `task`, if it is
    /// currently running one. No-op for thread-backed work: the kernel
    /// simply discards interest in the result and lets the OS thread run to
    /// completion detached (curio calls this a cancelled-but-not-killed
    /// "zombie" thread too, since a native thread cannot be forcibly killed
    /// without corrupting process state).
    pub fn cancel(&mut self, task: TaskId) {
        if let Some(&pid) = self.children.lock().expect("worker child-pid map poisoned").get(&task) {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        self.pending.retain(|p| p.task != task);
    }

    /// Drains every completion posted since the last turn, starts any
    /// pending jobs a just-freed slot now allows, and returns the tasks to
    /// reschedule.
    pub fn drain_completions(&mut self) -> Vec<TaskId> {
        let mut woken = Vec::new();
        while let Ok((task, result)) = self.completion_rx.try_recv() {
            self.results.insert(task, result);
            woken.push(task);
        }
        self.try_start_next();
        woken
    }

    pub fn take_result(&mut self, task: TaskId) -> Option<BoxAny> {
        self.results.remove(&task)
    }

    /// Builds a completion sink for `task`, sharing this pool's channel and
    /// waker so a caller-supplied [`Executor`] can post results the same
    /// way the built-in thread/process pools do.
    pub(crate) fn sink_for(&self, task: TaskId) -> ExecutorSink {
        ExecutorSink { task, tx: self.completion_tx.clone(), waker: Arc::clone(&self.waker) }
    }
}

use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, TaskState};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

enum WorkKind {
    Thread(Option<Box<dyn FnOnce() -> BoxAny + Send>>),
    Process(Option<Command>),
    External(Rc<dyn Executor>, Option<Box<dyn FnOnce() -> BoxAny + Send>>),
}

/// Awaits the completion of work submitted to a worker pool. Constructed by
/// [`crate::run_in_thread`]/[`crate::run_in_process`]; not constructed
/// directly.
pub struct WorkerCompletionFuture<T> {
    kernel: Weak<RefCell<KernelInner>>,
    work: WorkKind,
    submitted: Option<TaskId>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: 'static> WorkerCompletionFuture<T> {
    pub(crate) fn thread(kernel: Weak<RefCell<KernelInner>>, f: Box<dyn FnOnce() -> BoxAny + Send>) -> Self {
        Self { kernel, work: WorkKind::Thread(Some(f)), submitted: None, _marker: std::marker::PhantomData }
    }

    pub(crate) fn process(kernel: Weak<RefCell<KernelInner>>, cmd: Command) -> Self {
        Self { kernel, work: WorkKind::Process(Some(cmd)), submitted: None, _marker: std::marker::PhantomData }
    }

    pub(crate) fn executor(kernel: Weak<RefCell<KernelInner>>, exec: Rc<dyn Executor>, f: Box<dyn FnOnce() -> BoxAny + Send>) -> Self {
        Self { kernel, work: WorkKind::External(exec, Some(f)), submitted: None, _marker: std::marker::PhantomData }
    }
}

impl<T: 'static> Future for WorkerCompletionFuture<T> {
    type Output = Result<T, CancelledError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(kernel) = this.kernel.upgrade() else {
            return Poll::Pending;
        };
        let Some((_, task)) = current() else {
            return Poll::Pending;
        };

        if this.submitted.is_none() {
            let mut inner = kernel.borrow_mut();
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.state = TaskState::FutureWait;
                record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                    inner.workers.cancel(task);
                    inner.mark_ready(task);
                }));
            }
            match &mut this.work {
                WorkKind::Thread(f) => {
                    let f = f.take().expect("WorkerCompletionFuture polled after submission");
                    inner.workers.submit_thread(task, f);
                }
                WorkKind::Process(cmd) => {
                    let cmd = cmd.take().expect("WorkerCompletionFuture polled after submission");
                    inner.workers.submit_process(task, cmd);
                }
                WorkKind::External(exec, f) => {
                    let f = f.take().expect("WorkerCompletionFuture polled after submission");
                    let sink = inner.workers.sink_for(task);
                    exec.submit(f, sink);
                }
            }
            this.submitted = Some(task);
            return Poll::Pending;
        }

        let mut inner = kernel.borrow_mut();
        let cancelled = inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get());
        if cancelled {
            return Poll::Ready(Err(CancelledError { task }));
        }
        match inner.workers.take_result(task) {
            Some(result) => {
                this.submitted = None;
                Poll::Ready(Ok(*result.downcast::<T>().expect("worker result type mismatch")))
            }
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for WorkerCompletionFuture<T> {
    fn drop(&mut self) {
        if let Some(task) = self.submitted.take() {
            if let Some(kernel) = self.kernel.upgrade() {
                let mut inner = kernel.borrow_mut();
                inner.workers.cancel(task);
                inner.workers.take_result(task);
            }
        }
    }
}
