// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Foundational data types shared by the `skein` task kernel: task identity
//! and observable state, the timer heap, FIFO wait queues, and the error
//! taxonomy.
//!
//! This crate has no event loop of its own — it just holds the small,
//! dependency-light types that both the scheduler and the synchronization
//! primitives in `skein` need, the same way `r3bl_core` sits underneath
//! `r3bl_tui`.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod error;
pub mod task;
pub mod timer;
pub mod waitqueue;

pub use error::{CancelledError, KernelError, LockError, QueueError, SemaphoreError, TaskError, TaskTimeout};
pub use task::{TaskId, TaskState};
pub use timer::{TimerEntry, TimerHandle, TimerHeap, TimerKind};
pub use waitqueue::WaitQueue;
