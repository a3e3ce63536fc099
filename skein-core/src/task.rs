// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Task identity and observable scheduling state. See [`TaskId`] and [`TaskState`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing, per-kernel-unique task identifier.
///
/// Ids are never reused within a kernel's lifetime, so the scheduler's task
/// table can always resolve a live id back to its record. The counter lives
/// on [`TaskId::next`] rather than on [`crate`]-level global state so
/// multiple kernels in the same process (e.g. in tests) get independent id
/// spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocates the next id from `counter`. Kernels own one [`AtomicU64`]
    /// counter each; this is the only place ids are minted.
    #[must_use]
    pub fn next(counter: &AtomicU64) -> Self {
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// The scheduling state of a task.
///
/// A task is in exactly one of these at any instant. The blocking variants
/// each name the wait structure the task is currently linked into; only the
/// scheduler transitions a task between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Linked into the ready queue; will be polled on the next drain pass.
    Ready,
    /// Currently being polled by the run loop.
    Running,
    /// Parked on a file descriptor's read interest in the I/O selector.
    ReadWait,
    /// Parked on a file descriptor's write interest in the I/O selector.
    WriteWait,
    /// Parked awaiting a worker thread/process/executor completion.
    FutureWait,
    /// Parked in the timer heap for a plain `sleep`.
    TimeSleep,
    /// Parked in a synchronization primitive's wait queue.
    QueueWait,
    /// Parked in another task's `joiners` wait queue.
    JoinWait,
    /// Parked awaiting a signal delivery.
    SignalWait,
    /// Terminal: the task's future has resolved (normally, by error, or by
    /// cancellation) and its outcome is observable to joiners.
    Terminated,
}

impl TaskState {
    /// `true` for every state except [`TaskState::Terminated`] and
    /// [`TaskState::Ready`]/[`TaskState::Running`] — i.e. the task is linked
    /// into exactly one wait structure right now.
    #[must_use]
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            Self::ReadWait
                | Self::WriteWait
                | Self::FutureWait
                | Self::TimeSleep
                | Self::QueueWait
                | Self::JoinWait
                | Self::SignalWait
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// The debug-facing name used by `Task::state()`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::ReadWait => "READ_WAIT",
            Self::WriteWait => "WRITE_WAIT",
            Self::FutureWait => "FUTURE_WAIT",
            Self::TimeSleep => "TIME_SLEEP",
            Self::QueueWait => "QUEUE_WAIT",
            Self::JoinWait => "JOIN_WAIT",
            Self::SignalWait => "SIGNAL_WAIT",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let counter = AtomicU64::new(0);
        let a = TaskId::next(&counter);
        let b = TaskId::next(&counter);
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn blocked_states_cover_every_wait_structure() {
        for state in [
            TaskState::ReadWait,
            TaskState::WriteWait,
            TaskState::FutureWait,
            TaskState::TimeSleep,
            TaskState::QueueWait,
            TaskState::JoinWait,
            TaskState::SignalWait,
        ] {
            assert!(state.is_blocked());
        }
        assert!(!TaskState::Ready.is_blocked());
        assert!(!TaskState::Running.is_blocked());
        assert!(!TaskState::Terminated.is_blocked());
    }
}
