// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Kernel construction-time configuration, mirroring the keyword arguments
//! `curio.Kernel` accepts, but as an explicit builder rather than a bag of
//! optional parameters.

/// Tunables fixed at [`crate::Kernel::new`] time.
///
/// A `Kernel` rejects attempts to mutate its configuration after it has
/// started running (see [`skein_core::KernelError::AlreadyRunning`]) —
/// worker pool sizes and the selector's wakeup mechanism are set up once,
/// at construction.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Upper bound on live threads in the default thread pool used by
    /// `run_in_thread`. curio defaults this to 64; so do we.
    pub max_worker_threads: usize,
    /// Upper bound on live worker processes used by `run_in_process`.
    /// Defaults to the number of available CPUs.
    pub max_worker_processes: usize,
    /// Whether a task terminating with an uncaught, non-cancellation error
    /// is logged via `tracing::error!` before being delivered to its
    /// joiners. Disabling this is useful in tests that deliberately trigger
    /// task failures and assert on `Task::join()` instead.
    pub log_errors: bool,
    /// Gates a debug-monitor hook point on the run loop. The monitor
    /// implementation itself (an interactive task/queue inspector, the way
    /// curio's `Kernel(with_monitor=True)` spins up a console you can attach
    /// to) is out of scope here; this flag exists so callers can express the
    /// intent without the kernel silently ignoring it.
    pub with_monitor: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_worker_threads: 64,
            max_worker_processes: std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1),
            log_errors: true,
            with_monitor: false,
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_worker_threads(mut self, n: usize) -> Self {
        self.max_worker_threads = n;
        self
    }

    #[must_use]
    pub fn max_worker_processes(mut self, n: usize) -> Self {
        self.max_worker_processes = n;
        self
    }

    #[must_use]
    pub fn log_errors(mut self, yes: bool) -> Self {
        self.log_errors = yes;
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, yes: bool) -> Self {
        self.with_monitor = yes;
        self
    }
}
