// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Deadline-bound racing of an arbitrary future against a [`SleepFuture`],
//! matching curio's `timeout_after`/`ignore_after`.
//!
//! Neither combinator touches a task's `cancel_requested` flag directly:
//! `timeout_after` simply polls the wrapped future and a sleep side by side
//! and returns whichever resolves first. If the deadline wins, the wrapped
//! future is dropped right there as the `.await` expression unwinds, and the
//! `Drop` impl every trap future in this crate carries (see
//! `skein::sync::lock::LockAcquireFuture` and friends) is what actually
//! splices it out of whatever wait queue or selector registration it was
//! parked on.

use crate::scheduler::{current, current_task, SleepFuture};
use skein_core::TaskTimeout;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Races `fut` against `duration`. Resolves with `fut`'s own output if it
/// finishes first, or [`TaskTimeout`] if the deadline elapses first.
///
/// # Panics
/// Panics if called from outside a running task (there is no kernel to
/// anchor the deadline to).
#[must_use]
pub fn timeout_after<F>(duration: Duration, fut: F) -> TimeoutFuture<F>
where
    F: Future + Unpin,
{
    let (kernel, _) = current().expect("timeout_after called outside a running task");
    TimeoutFuture { inner: fut, sleep: SleepFuture::new(kernel, duration) }
}

/// Races `fut` against `duration`, returning `None` instead of propagating
/// an error when the deadline wins — curio's "swallow the timeout" sibling
/// of [`timeout_after`].
#[must_use]
pub fn ignore_after<F>(duration: Duration, fut: F) -> IgnoreFuture<F>
where
    F: Future + Unpin,
{
    IgnoreFuture { inner: timeout_after(duration, fut) }
}

pub struct TimeoutFuture<F> {
    inner: F,
    sleep: SleepFuture,
}

impl<F: Future + Unpin> Future for TimeoutFuture<F> {
    type Output = Result<F::Output, TaskTimeout>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Poll::Ready(out) = Pin::new(&mut self.inner).poll(cx) {
            return Poll::Ready(Ok(out));
        }
        match Pin::new(&mut self.sleep).poll(cx) {
            Poll::Ready(Ok(())) => {
                let task = current_task().expect("TimeoutFuture polled outside a running task");
                Poll::Ready(Err(TaskTimeout { task }))
            }
            // A genuine `cancel_task` cancellation, not a deadline. Leave it
            // to `inner`'s own next poll to observe `cancel_requested` and
            // propagate its own cancellation through the usual `Result` path.
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}

pub struct IgnoreFuture<F> {
    inner: TimeoutFuture<F>,
}

impl<F: Future + Unpin> Future for IgnoreFuture<F> {
    type Output = Option<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(v)) => Poll::Ready(Some(v)),
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_after_requires_a_running_task() {
        let result = std::panic::catch_unwind(|| timeout_after(Duration::from_secs(1), std::future::ready(1)));
        assert!(result.is_err());
    }
}
