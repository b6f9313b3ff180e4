// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cooperative, per-thread FIFO task scheduler (`Pool`, §2/§5/§9).
//!
//! Each physical thread runs a single-threaded task queue: tasks never
//! preempt each other on the same thread, and the only suspension points
//! are explicit [`Pool::yield_now`] calls inserted by blocking-shaped
//! wrappers. Cross-thread hand-off (the `AMM` rescheduling a delivery onto
//! its destination thread) goes through [`Pool::schedule_on`], which
//! pushes the boxed continuation onto the target thread's queue; the
//! target thread picks it up the next time it drains its queue.

pub mod affinity;

use crossbeam::queue::SegQueue;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT_THREAD: Cell<Option<usize>> = const { Cell::new(None) };
}

/// One physical thread's cooperative task queue.
struct ThreadQueue {
    tasks: SegQueue<Task>,
}

impl ThreadQueue {
    fn new() -> Self {
        Self {
            tasks: SegQueue::new(),
        }
    }
}

/// The process-wide collection of per-thread queues, one per physical
/// thread index `0..thread_count`.
pub struct Pool {
    queues: Vec<Arc<ThreadQueue>>,
    stop: Arc<AtomicBool>,
}

impl Pool {
    pub fn new(thread_count: usize) -> Self {
        let queues = (0..thread_count).map(|_| Arc::new(ThreadQueue::new())).collect();
        Self {
            queues,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the calling thread as `thread_id` for the duration of the
    /// current OS thread. Must be called once at the top of each worker
    /// thread's entry point before any `current_thread`/`schedule_on` use.
    pub fn bind_current_thread(thread_id: usize) {
        CURRENT_THREAD.with(|c| c.set(Some(thread_id)));
    }

    /// The physical thread id bound by [`Pool::bind_current_thread`], or
    /// `None` if this OS thread was never registered with the pool.
    pub fn current_thread() -> Option<usize> {
        CURRENT_THREAD.with(|c| c.get())
    }

    /// Push a continuation onto `thread_id`'s queue. Safe to call from any
    /// thread (the pool itself, not each queue, is the contention point;
    /// `SegQueue` is lock-free MPMC).
    pub fn schedule_on(&self, thread_id: usize, task: impl FnOnce() + Send + 'static) {
        self.queues[thread_id].tasks.push(Box::new(task));
    }

    /// Schedule onto the calling thread's own queue (equivalent to
    /// `schedule_on(Pool::current_thread().unwrap(), task)`).
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        let t = Self::current_thread().expect("schedule called from an unbound thread");
        self.schedule_on(t, task);
    }

    /// Drain and run every task currently queued for `thread_id`. Called
    /// by that thread's own poll loop; running a task may itself enqueue
    /// more tasks on this or another thread, which are picked up on a
    /// subsequent `run_ready` call rather than recursively here (keeps the
    /// stack bounded under bursty rescheduling).
    pub fn run_ready(&self, thread_id: usize) {
        let queue = &self.queues[thread_id];
        let mut drained = 0usize;
        let budget = queue.tasks.len().max(1);
        while let Some(task) = queue.tasks.pop() {
            task();
            drained += 1;
            if drained >= budget {
                break;
            }
        }
    }

    /// Yield cooperatively: run one pending task on the calling thread if
    /// any is ready, otherwise hint the scheduler. Used by synchronous
    /// wrappers over async IPC as their only suspension point (§5).
    pub fn yield_now(&self) {
        if let Some(t) = Self::current_thread() {
            if let Some(task) = self.queues[t].tasks.pop() {
                task();
                return;
            }
        }
        std::thread::yield_now();
    }

    /// Request every thread's poll loop to exit on its next tick (§9's
    /// cooperative-shutdown property): in-flight continuations still run
    /// to completion, but no new poll iteration begins.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn thread_count(&self) -> usize {
        self.queues.len()
    }
}
