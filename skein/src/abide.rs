// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! Bridges a blocking, synchronous closure into an async task's control
//! flow without blocking the kernel thread — built directly on the same
//! thread-pool submission path [`crate::worker`] uses for `run_in_thread`,
//! since "run this blocking thing on a background thread and await its
//! result" is exactly what `abide` needs too.

use crate::worker::WorkerCompletionFuture;
use crate::Kernel;

/// Runs a blocking closure `f` on a worker thread and awaits its result,
/// matching curio's `abide()` helper for adapting ordinary blocking calls
/// (or synchronous context managers used via a wrapper closure) into
/// cooperative code.
///
/// # Errors
/// Returns a cancellation error if the awaiting task is cancelled before
/// `f` completes. `f` itself is not interrupted — it keeps running to
/// completion on its worker thread in the background (see
/// `WorkerPools::cancel`'s documentation for why a native thread can't be
/// forcibly killed).
pub fn abide<F, T>(kernel: &Kernel, f: F) -> WorkerCompletionFuture<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let boxed: Box<dyn FnOnce() -> Box<dyn std::any::Any + Send> + Send> = Box::new(move || Box::new(f()));
    WorkerCompletionFuture::thread(kernel_weak(kernel), boxed)
}

fn kernel_weak(kernel: &Kernel) -> std::rc::Weak<std::cell::RefCell<crate::scheduler::KernelInner>> {
    std::rc::Rc::downgrade(kernel.inner())
}

/// A synchronous resource that needs explicit setup/teardown around a
/// blocking body, the async equivalent of a `with` block whose `__enter__`/
/// `__exit__` do blocking I/O. `abide_with` runs `enter`, `body`, and `exit`
/// all on the same worker thread so the resource never crosses threads
/// mid-lifetime.
pub fn abide_with<R, B, E, T>(kernel: &Kernel, enter: R, body: B, exit: E) -> WorkerCompletionFuture<T>
where
    R: FnOnce() -> T + Send + 'static,
    B: FnOnce(&mut T) + Send + 'static,
    E: FnOnce(&mut T) + Send + 'static,
    T: Send + 'static,
{
    abide(kernel, move || {
        let mut resource = enter();
        body(&mut resource);
        exit(&mut resource);
        resource
    })
}

