// Copyright (c) 2026 Skein Project Contributors. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios driving a real [`Kernel`] through its full run loop:
//! sleep ordering (including the zero-duration yield case), timeout/ignore
//! racing, lock/condition/semaphore/queue fairness under contention,
//! cancellation while blocked, worker-thread bridging, event broadcast, and
//! bounded-queue backpressure.

use pretty_assertions::assert_eq;
use serial_test::serial;
use skein::sync::{Condition, Event, Lock, Queue, Semaphore};
use skein::{
    ignore_after, run_in_executor, sigwait, sleep, spawn, timeout_after, BoxAny, Executor, ExecutorSink, Kernel,
    SignalSet, SIGUSR1_NO,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[test]
#[serial]
fn sleeping_tasks_wake_in_deadline_order() {
    let kernel = Kernel::with_defaults();
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        let a = {
            let order = Rc::clone(&order);
            spawn(
                async move {
                    sleep(Duration::from_millis(30)).await.ok();
                    order.borrow_mut().push("slow");
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        let b = {
            let order = Rc::clone(&order);
            spawn(
                async move {
                    sleep(Duration::from_millis(5)).await.ok();
                    order.borrow_mut().push("fast");
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        a.join().await.ok();
        b.join().await.ok();
        Ok::<_, std::convert::Infallible>(order.borrow().clone())
    });

    assert_eq!(result.unwrap().unwrap(), vec!["fast", "slow"]);
}

#[test]
#[serial]
fn sleep_zero_yields_once_to_other_ready_tasks() {
    let kernel = Kernel::with_defaults();
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        let yielding = {
            let order = Rc::clone(&order);
            spawn(
                async move {
                    sleep(Duration::ZERO).await.ok();
                    order.borrow_mut().push("yielded");
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        let immediate = {
            let order = Rc::clone(&order);
            spawn(
                async move {
                    order.borrow_mut().push("immediate");
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        yielding.join().await.ok();
        immediate.join().await.ok();
        Ok::<_, std::convert::Infallible>(order.borrow().clone())
    });

    assert_eq!(result.unwrap().unwrap(), vec!["immediate", "yielded"]);
}

#[test]
#[serial]
fn timeout_after_raises_on_a_slow_operation() {
    let kernel = Kernel::with_defaults();
    let result = kernel.run_until_complete(async {
        let outcome = timeout_after(Duration::from_millis(5), Box::pin(sleep(Duration::from_secs(10)))).await;
        Ok::<_, std::convert::Infallible>(outcome.is_err())
    });
    assert!(result.unwrap().unwrap());
}

#[test]
#[serial]
fn timeout_after_returns_the_inner_value_when_it_wins() {
    let kernel = Kernel::with_defaults();
    let result = kernel.run_until_complete(async {
        let outcome = timeout_after(Duration::from_secs(10), Box::pin(sleep(Duration::from_millis(1)))).await;
        Ok::<_, std::convert::Infallible>(outcome.is_ok())
    });
    assert!(result.unwrap().unwrap());
}

#[test]
#[serial]
fn ignore_after_returns_none_sentinel_on_elapse() {
    let kernel = Kernel::with_defaults();
    let result = kernel.run_until_complete(async {
        let outcome = ignore_after(Duration::from_millis(5), Box::pin(sleep(Duration::from_secs(10)))).await;
        Ok::<_, std::convert::Infallible>(outcome.is_none())
    });
    assert!(result.unwrap().unwrap());
}

#[test]
#[serial]
fn lock_wakes_waiters_in_fifo_order() {
    let kernel = Kernel::with_defaults();
    let lock = Lock::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        lock.acquire().await.ok();

        let second = {
            let lock = lock.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    lock.acquire().await.ok();
                    order.borrow_mut().push(2);
                    lock.release().ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        let third = {
            let lock = lock.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    lock.acquire().await.ok();
                    order.borrow_mut().push(3);
                    lock.release().ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        order.borrow_mut().push(1);
        lock.release().ok();
        second.join().await.ok();
        third.join().await.ok();
        Ok::<_, std::convert::Infallible>(order.borrow().clone())
    });

    assert_eq!(result.unwrap().unwrap(), vec![1, 2, 3]);
}

#[test]
#[serial]
fn cancelling_a_task_blocked_on_a_lock_frees_the_waiter_slot() {
    let kernel = Kernel::with_defaults();
    let lock = Lock::new();

    let result = kernel.run_until_complete(async move {
        lock.acquire().await.ok();

        let blocked = {
            let lock = lock.clone();
            spawn(
                async move {
                    lock.acquire().await?;
                    Ok::<_, skein::CancelledError>(())
                },
                false,
            )
        };
        let waits_behind_it = {
            let lock = lock.clone();
            spawn(
                async move {
                    lock.acquire().await?;
                    lock.release().ok();
                    Ok::<_, skein::CancelledError>(())
                },
                false,
            )
        };

        blocked.cancel().ok();
        let joined = blocked.join().await;
        lock.release().ok();
        // If the cancelled task's waiter entry had been left behind, this
        // would hang forever instead of resolving.
        waits_behind_it.join().await.ok();
        Ok::<_, std::convert::Infallible>(joined.is_err())
    });

    assert!(result.unwrap().unwrap());
}

#[test]
#[serial]
fn cancelling_a_waiter_already_handed_the_lock_frees_it_for_the_next_contender() {
    let kernel = Kernel::with_defaults();
    let lock = Lock::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        lock.acquire().await.ok();

        let waiter = {
            let lock = lock.clone();
            spawn(
                async move {
                    lock.acquire().await.ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        // Let `waiter` park in the lock's own waiter queue.
        sleep(Duration::from_millis(5)).await.ok();

        // `release()` hands ownership directly to `waiter` without ever
        // polling it, then it's cancelled in that same window before it
        // gets a turn. Without releasing the lock back out on its behalf,
        // ownership would stay pinned to a task that's never coming back.
        lock.release().ok();
        waiter.cancel().ok();

        let contender = {
            let lock = lock.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    lock.acquire().await.ok();
                    order.borrow_mut().push("contender");
                    lock.release().ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        let outcome = timeout_after(Duration::from_millis(50), Box::pin(contender.join())).await;
        Ok::<_, std::convert::Infallible>(outcome.is_ok() && order.borrow().clone() == vec!["contender"])
    });

    assert!(result.unwrap().unwrap());
}

#[test]
#[serial]
fn condition_notify_reacquires_the_lock_before_a_fresh_contender_can() {
    let kernel = Kernel::with_defaults();
    let cond = Condition::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        cond.acquire().await.ok();

        let waiter = {
            let cond = cond.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    cond.acquire().await.ok();
                    cond.wait().await.ok();
                    order.borrow_mut().push("waiter");
                    cond.release().ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        // Let `waiter` run up through `cond.wait()` (which releases the lock
        // and parks) before anyone else touches the lock.
        cond.release().ok();
        sleep(Duration::from_millis(5)).await.ok();

        // Spawned (and ready) before `notify`, so it's already queued to run
        // its first `lock.acquire()` poll the moment this task next yields —
        // exactly the window where an un-parked contender could steal the
        // lock out from under the waiter `notify` means to wake.
        let contender = {
            let lock = cond.lock.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    lock.acquire().await.ok();
                    order.borrow_mut().push("contender");
                    lock.release().ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        cond.notify(1);
        waiter.join().await.ok();
        contender.join().await.ok();
        Ok::<_, std::convert::Infallible>(order.borrow().clone())
    });

    assert_eq!(result.unwrap().unwrap(), vec!["waiter", "contender"]);
}

#[test]
#[serial]
fn semaphore_wakes_waiters_in_fifo_order_without_stranding_them() {
    let kernel = Kernel::with_defaults();
    let sem = Semaphore::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        let first = {
            let sem = sem.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    sem.acquire().await.ok();
                    order.borrow_mut().push(1);
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        let second = {
            let sem = sem.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    sem.acquire().await.ok();
                    order.borrow_mut().push(2);
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        // Give both acquirers a chance to park before anything is released.
        sleep(Duration::from_millis(5)).await.ok();
        sem.release().ok();
        sem.release().ok();
        first.join().await.ok();
        second.join().await.ok();
        Ok::<_, std::convert::Infallible>(order.borrow().clone())
    });

    assert_eq!(result.unwrap().unwrap(), vec![1, 2]);
}

#[test]
#[serial]
fn cancelling_a_waiter_already_granted_a_permit_frees_it_for_the_next_contender() {
    let kernel = Kernel::with_defaults();
    let sem = Semaphore::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        let waiter = {
            let sem = sem.clone();
            spawn(
                async move {
                    sem.acquire().await.ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        // Let `waiter` park on the empty semaphore.
        sleep(Duration::from_millis(5)).await.ok();

        // `release()` earmarks the new permit for `waiter` in `granted`
        // without ever polling it, then it's cancelled in that same window
        // before it gets a turn. Without reclaiming the permit back into
        // `value`, it would be stranded forever.
        sem.release().ok();
        waiter.cancel().ok();

        let contender = {
            let sem = sem.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    sem.acquire().await.ok();
                    order.borrow_mut().push("contender");
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        let outcome = timeout_after(Duration::from_millis(50), Box::pin(contender.join())).await;
        Ok::<_, std::convert::Infallible>(outcome.is_ok() && order.borrow().clone() == vec!["contender"])
    });

    assert!(result.unwrap().unwrap());
}

#[test]
#[serial]
fn queue_delivers_items_to_each_blocked_getter_without_stranding_them() {
    let kernel = Kernel::with_defaults();
    let queue: Queue<u32> = Queue::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let result = kernel.run_until_complete(async move {
        let first = {
            let queue = queue.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    let item = queue.get().await.ok();
                    order.borrow_mut().push(item);
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        let second = {
            let queue = queue.clone();
            let order = Rc::clone(&order);
            spawn(
                async move {
                    let item = queue.get().await.ok();
                    order.borrow_mut().push(item);
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        // Give both getters a chance to park on the empty queue first.
        sleep(Duration::from_millis(5)).await.ok();
        queue.put(10).await.ok();
        queue.put(20).await.ok();
        first.join().await.ok();
        second.join().await.ok();
        Ok::<_, std::convert::Infallible>(order.borrow().clone())
    });

    assert_eq!(result.unwrap().unwrap(), vec![Some(10), Some(20)]);
}

#[test]
#[serial]
fn cancelling_a_getter_already_handed_an_item_returns_it_to_the_queue() {
    let kernel = Kernel::with_defaults();
    let queue: Queue<u32> = Queue::new();

    let result = kernel.run_until_complete(async move {
        let getter = {
            let queue = queue.clone();
            spawn(
                async move {
                    let item = queue.get().await.ok();
                    Ok::<_, std::convert::Infallible>(item)
                },
                false,
            )
        };
        // Let `getter` park on the empty queue.
        sleep(Duration::from_millis(5)).await.ok();

        // `put()` hands the item directly to `getter` via `granted_gets`
        // without ever polling it, then it's cancelled in that same window
        // before it gets a turn. Without pushing the item back onto `items`,
        // it would be lost forever.
        queue.put(42).await.ok();
        getter.cancel().ok();

        let recovered = timeout_after(Duration::from_millis(50), Box::pin(queue.get())).await;
        Ok::<_, std::convert::Infallible>(recovered.ok().and_then(Result::ok))
    });

    assert_eq!(result.unwrap().unwrap(), Some(42));
}

#[test]
#[serial]
fn queue_admits_each_blocked_putter_in_turn_without_stranding_them() {
    let kernel = Kernel::with_defaults();
    let queue: Queue<u32> = Queue::with_maxsize(Some(1));

    let result = kernel.run_until_complete(async move {
        queue.put(1).await.ok();

        let second = {
            let queue = queue.clone();
            spawn(
                async move {
                    queue.put(2).await.ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };
        let third = {
            let queue = queue.clone();
            spawn(
                async move {
                    queue.put(3).await.ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        // Give both producers a chance to park behind the full queue first.
        sleep(Duration::from_millis(5)).await.ok();
        let mut drained = Vec::new();
        drained.push(queue.get().await.ok());
        second.join().await.ok();
        drained.push(queue.get().await.ok());
        third.join().await.ok();
        drained.push(queue.get().await.ok());
        Ok::<_, std::convert::Infallible>(drained)
    });

    assert_eq!(result.unwrap().unwrap(), vec![Some(1), Some(2), Some(3)]);
}

#[test]
#[serial]
fn run_in_thread_bridges_a_blocking_computation() {
    let kernel = Kernel::with_defaults();
    let result = kernel.run_until_complete(async {
        let value = skein::run_in_thread(|| 2 + 2).await.ok();
        Ok::<_, std::convert::Infallible>(value)
    });
    assert_eq!(result.unwrap().unwrap(), Some(4));
}

#[test]
#[serial]
fn event_set_wakes_every_waiter() {
    let kernel = Kernel::with_defaults();
    let event = Event::new();
    let woken = Rc::new(RefCell::new(0usize));

    let result = kernel.run_until_complete(async move {
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let event = event.clone();
                let woken = Rc::clone(&woken);
                spawn(
                    async move {
                        event.wait().await.ok();
                        *woken.borrow_mut() += 1;
                        Ok::<_, std::convert::Infallible>(())
                    },
                    false,
                )
            })
            .collect();

        sleep(Duration::from_millis(1)).await.ok();
        event.set();
        for w in waiters {
            w.join().await.ok();
        }
        Ok::<_, std::convert::Infallible>(*woken.borrow())
    });

    assert_eq!(result.unwrap().unwrap(), 3);
}

#[test]
#[serial]
fn bounded_queue_blocks_producers_until_a_slot_opens() {
    let kernel = Kernel::with_defaults();
    let queue: Queue<u32> = Queue::with_maxsize(Some(1));

    let result = kernel.run_until_complete(async move {
        queue.put(1).await.ok();

        let producer = {
            let queue = queue.clone();
            spawn(
                async move {
                    queue.put(2).await.ok();
                    Ok::<_, std::convert::Infallible>(())
                },
                false,
            )
        };

        // The producer above is blocked since the queue is already full.
        let first = queue.get().await.ok();
        producer.join().await.ok();
        let second = queue.get().await.ok();
        Ok::<_, std::convert::Infallible>((first, second))
    });

    assert_eq!(result.unwrap().unwrap(), (Some(1), Some(2)));
}

#[test]
#[serial]
fn sigwait_observes_a_signal_raised_mid_run() {
    let kernel = Kernel::with_defaults();

    let result = kernel.run_until_complete(async {
        spawn(
            async {
                sleep(Duration::from_millis(5)).await.ok();
                unsafe { libc::raise(libc::SIGUSR1) };
                Ok::<_, std::convert::Infallible>(())
            },
            true,
        );
        let signal = sigwait(SignalSet::new([SIGUSR1_NO])).await.ok();
        Ok::<_, std::convert::Infallible>(signal)
    });

    assert_eq!(result.unwrap().unwrap(), Some(SIGUSR1_NO));
}

/// An `Executor` that just runs the job inline and completes immediately,
/// enough to exercise the `run_in_executor` bridging without pulling in a
/// real external thread pool crate.
struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, job: Box<dyn FnOnce() -> BoxAny + Send>, sink: ExecutorSink) {
        sink.complete(job());
    }
}

#[test]
#[serial]
fn run_in_executor_bridges_a_caller_supplied_pool() {
    let kernel = Kernel::with_defaults();
    let exec = Rc::new(InlineExecutor);

    let result = kernel.run_until_complete(async move {
        let value = run_in_executor(exec, || 6 * 7).await.ok();
        Ok::<_, std::convert::Infallible>(value)
    });

    assert_eq!(result.unwrap().unwrap(), Some(42));
}

#[test]
#[serial]
fn shutdown_cancels_daemon_tasks_too() {
    let kernel = Kernel::with_defaults();
    let cancelled = Rc::new(RefCell::new(false));

    {
        let cancelled = Rc::clone(&cancelled);
        kernel.spawn(
            async move {
                let r = sleep(Duration::from_secs(30)).await;
                *cancelled.borrow_mut() = r.is_err();
                Ok::<_, std::convert::Infallible>(())
            },
            true,
        );
    }

    kernel.shutdown();
    kernel.run().unwrap();

    assert!(*cancelled.borrow());
}

#[test]
#[serial]
fn running_a_kernel_twice_reports_already_running() {
    let kernel = Kernel::with_defaults();
    kernel
        .run_until_complete(async { Ok::<_, std::convert::Infallible>(()) })
        .unwrap()
        .unwrap();

    let second = kernel.run_until_complete(async { Ok::<_, std::convert::Infallible>(()) });
    assert!(second.is_err());
}
