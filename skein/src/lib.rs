// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! A single-threaded, event-driven cooperative task kernel: tasks are
//! ordinary Rust futures, multiplexed over nonblocking I/O, timers, signals,
//! and worker-pool completions by one run loop, with curio-style
//! cancellation and synchronization primitives layered on top.
//!
//! `skein` is deliberately `!Send`/`!Sync`: a [`Kernel`] and everything it
//! schedules lives on one OS thread, communicating with the handful of real
//! background threads it does spawn (for `run_in_thread`/`run_in_process`)
//! only through a channel and an `mio::Waker`, never by sharing `Rc`-backed
//! state across a thread boundary.
//!
//! ```no_run
//! use skein::Kernel;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let kernel = Kernel::with_defaults();
//!     kernel.run_until_complete(async {
//!         skein::sleep(std::time::Duration::from_millis(10)).await.ok();
//!         Ok::<_, std::convert::Infallible>(())
//!     })?.expect("root task does not fail");
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

mod abide;
mod api;
mod config;
mod scheduler;
mod selector;
mod signal;
mod timeout;
mod worker;

pub mod sync;

pub use abide::{abide, abide_with};
pub use api::{read_wait, run_in_executor, run_in_process, run_in_thread, sigwait, sleep, spawn, spawn_daemon, write_wait};
pub use config::KernelConfig;
pub use scheduler::{current_task, BoxError, JoinError, Kernel, RunError, SleepFuture, Task, TaskOutcome};
pub use selector::{Direction, ReadinessFuture};
pub use signal::{SignalSet, SignalWaitFuture, SIGHUP_NO, SIGINT_NO, SIGTERM_NO, SIGUSR1_NO, SIGUSR2_NO};
pub use timeout::{ignore_after, timeout_after, IgnoreFuture, TimeoutFuture};
pub use worker::{BoxAny, Executor, ExecutorSink, WorkerCompletionFuture};

pub use skein_core::{CancelledError, KernelError, LockError, QueueError, SemaphoreError, TaskError, TaskId, TaskState, TaskTimeout};
