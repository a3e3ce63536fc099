// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! The I/O readiness multiplexer: a thin, lazily-(de)registering layer over
//! `mio::Poll`.
//!
//! A descriptor is registered with the OS selector only while at least one
//! task is actually waiting on it, and deregistered the instant nothing
//! needs it — mirroring the reactor-thread shape in
//! `r3bl_tui::core::resilient_reactor_thread`, where a source is only ever
//! wired into the event loop for as long as a subscriber cares about it.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use skein_core::TaskId;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// The mask of readiness a caller asked to be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Readiness reported back from a [`IoSelector::poll`] pass for one task.
#[derive(Debug, Clone, Copy)]
pub struct ReadyMask {
    pub readable: bool,
    pub writable: bool,
}

struct FdState {
    token: Token,
    read_waiter: Option<TaskId>,
    write_waiter: Option<TaskId>,
}

impl FdState {
    fn interest(&self) -> Option<Interest> {
        match (self.read_waiter.is_some(), self.write_waiter.is_some()) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

const WAKER_TOKEN: Token = Token(usize::MAX);

pub struct IoSelector {
    poll: Poll,
    registry: Registry,
    events: Events,
    sources: HashMap<RawFd, FdState>,
    tokens: HashMap<Token, RawFd>,
    next_token: usize,
    /// Lets worker-pool OS threads (and signal handlers) interrupt a blocking
    /// `poll` call from off the kernel thread.
    pub(crate) waker: Arc<mio::Waker>,
}

impl IoSelector {
    pub fn new() -> std::io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Arc::new(mio::Waker::new(&registry, WAKER_TOKEN)?);
        Ok(Self {
            poll,
            registry,
            events: Events::with_capacity(256),
            sources: HashMap::new(),
            tokens: HashMap::new(),
            next_token: 0,
            waker,
        })
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    fn allocate_token(&mut self) -> Token {
        loop {
            let candidate = Token(self.next_token);
            self.next_token = self.next_token.wrapping_add(1);
            if candidate != WAKER_TOKEN && !self.tokens.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Parks `task` waiting for `direction` readiness on `fd`, registering
    /// or re-registering the descriptor as needed.
    ///
    /// # Errors
    /// Propagates any `mio` registration error.
    pub fn wait(&mut self, fd: RawFd, direction: Direction, task: TaskId) -> std::io::Result<()> {
        if !self.sources.contains_key(&fd) {
            let token = self.allocate_token();
            self.sources.insert(fd, FdState { token, read_waiter: None, write_waiter: None });
            self.tokens.insert(token, fd);
        }
        let state = self.sources.get_mut(&fd).expect("just inserted");
        let was_registered = state.interest().is_some();
        match direction {
            Direction::Read => state.read_waiter = Some(task),
            Direction::Write => state.write_waiter = Some(task),
        }
        let interest = state.interest().expect("at least one waiter was just set");
        let token = state.token;
        if was_registered {
            self.registry.reregister(&mut SourceFd(&fd), token, interest)?;
        } else {
            self.registry.register(&mut SourceFd(&fd), token, interest)?;
        }
        Ok(())
    }

    /// Withdraws interest in `direction` for `fd`. Fully deregisters the
    /// descriptor from the OS selector once no direction is left pending on
    /// it, rather than leaving a stale registration around.
    pub fn cancel_wait(&mut self, fd: RawFd, direction: Direction) {
        let Some(state) = self.sources.get_mut(&fd) else { return };
        match direction {
            Direction::Read => state.read_waiter = None,
            Direction::Write => state.write_waiter = None,
        }
        match state.interest() {
            Some(interest) => {
                let token = state.token;
                let _ = self.registry.reregister(&mut SourceFd(&fd), token, interest);
            }
            None => {
                let token = state.token;
                let _ = self.registry.deregister(&mut SourceFd(&fd));
                self.sources.remove(&fd);
                self.tokens.remove(&token);
            }
        }
    }

    /// Blocks (up to `timeout`, or indefinitely if `None`) until at least
    /// one registered descriptor is ready, a timer/worker/signal wakeup
    /// interrupts it, or the timeout elapses. Returns the tasks to
    /// reschedule, consuming (and clearing) each fired waiter so a task must
    /// re-register if it wants to wait again.
    ///
    /// # Errors
    /// Propagates I/O errors from the underlying `mio::Poll::poll`, except
    /// `ErrorKind::Interrupted`, which is treated as a spurious empty pass
    /// (the conventional `EINTR` retry-free handling for a non-blocking
    /// caller that re-checks its own deadline anyway).
    pub fn poll(&mut self, timeout: Option<Duration>) -> std::io::Result<Vec<(TaskId, ReadyMask)>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut ready = Vec::new();
        for event in &self.events {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let Some(&fd) = self.tokens.get(&event.token()) else { continue };
            let Some(state) = self.sources.get_mut(&fd) else { continue };
            let mask = ReadyMask { readable: event.is_readable(), writable: event.is_writable() };
            if mask.readable {
                if let Some(task) = state.read_waiter.take() {
                    ready.push((task, mask));
                }
            }
            if mask.writable {
                if let Some(task) = state.write_waiter.take() {
                    ready.push((task, mask));
                }
            }
            match state.interest() {
                Some(interest) => {
                    let token = state.token;
                    let _ = self.registry.reregister(&mut SourceFd(&fd), token, interest);
                }
                None => {
                    let token = state.token;
                    let _ = self.registry.deregister(&mut SourceFd(&fd));
                    self.sources.remove(&fd);
                    self.tokens.remove(&token);
                }
            }
        }
        Ok(ready)
    }
}

use crate::scheduler::{current, KernelInner};
use skein_core::{CancelledError, TaskState};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Weak;
use std::task::{Context, Poll};

/// Awaits readiness of `fd` in one [`Direction`]. Constructed by
/// `skein::io_readiness` / the socket wrappers built on top of it; a task
/// parks here at most once per direction per descriptor at a time.
pub struct ReadinessFuture {
    kernel: Weak<RefCell<KernelInner>>,
    fd: RawFd,
    direction: Direction,
    parked: Option<TaskId>,
}

impl ReadinessFuture {
    #[must_use]
    pub fn new(kernel: Weak<RefCell<KernelInner>>, fd: RawFd, direction: Direction) -> Self {
        Self { kernel, fd, direction, parked: None }
    }
}

impl Future for ReadinessFuture {
    type Output = Result<(), CancelledError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(kernel) = self.kernel.upgrade() else {
            return Poll::Ready(Ok(()));
        };
        let Some((_, task)) = current() else {
            return Poll::Pending;
        };

        if self.parked.is_some() {
            let cancelled = kernel.borrow().tasks.get(&task).is_some_and(|r| r.cancel_requested.get());
            self.parked = None;
            return if cancelled { Poll::Ready(Err(CancelledError { task })) } else { Poll::Ready(Ok(())) };
        }

        let mut inner = kernel.borrow_mut();
        if inner.tasks.get(&task).is_some_and(|r| r.cancel_requested.get()) {
            return Poll::Ready(Err(CancelledError { task }));
        }
        let fd = self.fd;
        let direction = self.direction;
        if let Err(e) = inner.selector.wait(fd, direction, task) {
            tracing::warn!(error = %e, "failed to register descriptor with selector");
            return Poll::Ready(Ok(()));
        }
        if let Some(record) = inner.tasks.get_mut(&task) {
            record.state = if direction == Direction::Read { TaskState::ReadWait } else { TaskState::WriteWait };
            record.cancel_func = Some(Box::new(move |inner: &mut KernelInner| {
                inner.selector.cancel_wait(fd, direction);
                inner.mark_ready(task);
            }));
        }
        self.parked = Some(task);
        Poll::Pending
    }
}

impl Drop for ReadinessFuture {
    fn drop(&mut self) {
        if self.parked.take().is_some() {
            if let Some(kernel) = self.kernel.upgrade() {
                kernel.borrow_mut().selector.cancel_wait(self.fd, self.direction);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn lazily_registers_and_deregisters_a_pipe() {
        let (r, _w) = nix_pipe().unwrap();
        let mut selector = IoSelector::new().unwrap();
        let fd = r.as_raw_fd();
        let counter = std::sync::atomic::AtomicU64::new(0);
        let task = TaskId::next(&counter);

        selector.wait(fd, Direction::Read, task).unwrap();
        assert!(selector.sources.contains_key(&fd));
        selector.cancel_wait(fd, Direction::Read);
        assert!(!selector.sources.contains_key(&fd));
        let _ = r;
    }

    fn nix_pipe() -> std::io::Result<(std::fs::File, std::fs::File)> {
        use std::os::unix::io::FromRawFd;
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(unsafe { (std::fs::File::from_raw_fd(fds[0]), std::fs::File::from_raw_fd(fds[1])) })
    }
}
