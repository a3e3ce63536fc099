// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Synchronization primitives layered on `skein_core::WaitQueue`: [`Event`],
//! [`Lock`], [`Semaphore`]/[`BoundedSemaphore`], [`Condition`], and
//! [`Queue`].
//!
//! Every primitive here is `!Send`/`!Sync` by construction (they hold `Rc`,
//! not `Arc`) — sharing one across kernels, or off the kernel thread, is a
//! compile error rather than a silent race, since this whole runtime is
//! single-threaded by design.

mod condition;
mod event;
mod lock;
mod queue;
mod semaphore;

pub use condition::Condition;
pub use event::Event;
pub use lock::Lock;
pub use queue::Queue;
pub use semaphore::{BoundedSemaphore, Semaphore};

pub(crate) fn current_or_panic() -> skein_core::TaskId {
    crate::scheduler::current_task().expect("skein::sync primitives must be awaited from within a running task")
}
