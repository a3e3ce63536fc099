// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Module-level convenience functions that operate against whichever kernel
//! is currently running the calling task, mirroring curio's free functions
//! (`curio.sleep`, `curio.spawn`, `curio.run_in_thread`, ...) so application
//! code doesn't need to thread a `Kernel` handle through every call site.
//!
//! Every function here panics if called outside a running task — there is
//! no implicit kernel to resolve otherwise. Code that already holds a
//! `Kernel` handle (e.g. the task that called [`Kernel::run`]) can reach the
//! same functionality through the methods on [`Kernel`] directly.

use crate::scheduler::{current, SleepFuture};
use crate::selector::{Direction, ReadinessFuture};
use crate::signal::{SignalSet, SignalWaitFuture};
use crate::worker::{Executor, WorkerCompletionFuture};
use crate::Kernel;
use std::any::Any;
use std::os::unix::io::RawFd;
use std::process::Command;
use std::rc::Rc;
use std::time::Duration;

fn current_kernel() -> Kernel {
    let (kernel, _) = current().expect("skein::api functions must be called from within a running task");
    Kernel::from_weak(kernel).expect("current task's kernel has already been dropped")
}

/// Spawns `fut` as a new task on the calling task's kernel.
pub fn spawn<F, T, E>(fut: F) -> crate::scheduler::Task<T>
where
    F: std::future::Future<Output = Result<T, E>> + 'static,
    T: 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    current_kernel().spawn(fut, false)
}

/// Spawns `fut` as a daemon task: it does not keep [`Kernel::run`] alive by
/// itself, and is abandoned (not awaited) when every non-daemon task ends.
pub fn spawn_daemon<F, T, E>(fut: F) -> crate::scheduler::Task<T>
where
    F: std::future::Future<Output = Result<T, E>> + 'static,
    T: 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    current_kernel().spawn(fut, true)
}

/// Suspends the calling task for `duration`.
#[must_use]
pub fn sleep(duration: Duration) -> SleepFuture {
    let (kernel, _) = current().expect("skein::sleep called outside a running task");
    SleepFuture::new(kernel, duration)
}

/// Awaits readability of `fd` without blocking the kernel thread.
#[must_use]
pub fn read_wait(fd: RawFd) -> ReadinessFuture {
    let (kernel, _) = current().expect("skein::read_wait called outside a running task");
    ReadinessFuture::new(kernel, fd, Direction::Read)
}

/// Awaits writability of `fd` without blocking the kernel thread.
#[must_use]
pub fn write_wait(fd: RawFd) -> ReadinessFuture {
    let (kernel, _) = current().expect("skein::write_wait called outside a running task");
    ReadinessFuture::new(kernel, fd, Direction::Write)
}

/// Awaits delivery of any signal in `set`, returning the signal number that
/// fired.
#[must_use]
pub fn sigwait(set: SignalSet) -> SignalWaitFuture {
    let (kernel, _) = current().expect("skein::sigwait called outside a running task");
    SignalWaitFuture::new(kernel, set)
}

/// Runs `f` on a worker thread, awaiting its result without blocking the
/// kernel thread. Panics inside `f` are caught and surfaced as the task's
/// join error rather than unwinding onto the worker thread.
#[must_use]
pub fn run_in_thread<F, T>(f: F) -> WorkerCompletionFuture<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (kernel, _) = current().expect("skein::run_in_thread called outside a running task");
    let boxed: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send> = Box::new(move || Box::new(f()));
    WorkerCompletionFuture::thread(kernel, boxed)
}

/// Runs `cmd` as a child process, awaiting its `std::process::Output`
/// without blocking the kernel thread. The Rust-idiomatic analogue of
/// curio's `run_in_process`, which pickles an arbitrary callable across a
/// `fork`; Rust has no stable equivalent, so the worker pool instead takes
/// something that is already process-shaped.
#[must_use]
pub fn run_in_process(cmd: Command) -> WorkerCompletionFuture<Result<std::process::ExitStatus, String>> {
    let (kernel, _) = current().expect("skein::run_in_process called outside a running task");
    WorkerCompletionFuture::process(kernel, cmd)
}

/// Runs `f` through a caller-supplied [`Executor`] rather than this kernel's
/// own thread pool, awaiting its result the same way `run_in_thread` does.
#[must_use]
pub fn run_in_executor<E, F, T>(exec: Rc<E>, f: F) -> WorkerCompletionFuture<T>
where
    E: Executor + 'static,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (kernel, _) = current().expect("skein::run_in_executor called outside a running task");
    let boxed: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send> = Box::new(move || Box::new(f()));
    WorkerCompletionFuture::executor(kernel, exec, boxed)
}
