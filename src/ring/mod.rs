// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lock-free multi-producer/multi-consumer ring buffer of opaque,
//! pointer-sized slots (§4.1).
//!
//! Every instance's input and output queue is one of these. The ring owns
//! neither the pointee nor its lifetime — callers cast pointers to `usize`
//! on push and back on pop.
//!
//! The algorithm is the classic natsys-lab MPMC ring: a global `head`/`tail`
//! pair advanced with `fetch_add`, one reservation slot per declared
//! producer/consumer, and `last_head`/`last_tail` caches refreshed by
//! scanning all reservations only when the fast check fails. Bounded wait on
//! full/empty spins with a CPU pause hint; it never allocates.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sentinel written into a thread's reservation slot when it holds no
/// in-flight reservation (mirrors the original's `memset(0xFF, ...)` which
/// fills every `ThrPos` field with `ULONG_MAX`).
const NONE: usize = usize::MAX;

#[derive(Default)]
struct ThrPos {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    in_situ: CachePadded<AtomicUsize>,
}

/// A fixed-capacity, power-of-two lock-free MPMC ring of opaque `usize`
/// slots. Pointers within a single producer become visible to any single
/// consumer in FIFO order; there is no global FIFO across producers (§4.1).
pub struct Ring {
    capacity: usize,
    mask: usize,
    n_producers: usize,
    n_consumers: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    last_head: CachePadded<AtomicUsize>,
    last_tail: CachePadded<AtomicUsize>,
    thr_pos: Box<[ThrPos]>,
    slots: Box<[AtomicUsize]>,
}

// SAFETY: all mutable state is behind atomics; `slots` entries are only
// written by the producer that reserved them and only read by the consumer
// that reserved them, established by the head/tail reservation protocol.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// `capacity` must be a power of two. `producers`/`consumers` bound the
    /// number of distinct producer/consumer indices that will call
    /// `push`/`pop` — each caller must pass a stable index below that
    /// bound (typically the physical thread id).
    pub fn new(capacity: usize, producers: usize, consumers: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be power of two");
        assert!(producers > 0 && consumers > 0);

        let n = producers.max(consumers);
        let mut thr_pos = Vec::with_capacity(n);
        for _ in 0..n {
            thr_pos.push(ThrPos {
                head: CachePadded::new(AtomicUsize::new(NONE)),
                tail: CachePadded::new(AtomicUsize::new(NONE)),
                in_situ: CachePadded::new(AtomicUsize::new(0)),
            });
        }

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || AtomicUsize::new(0));

        Self {
            capacity,
            mask: capacity - 1,
            n_producers: producers,
            n_consumers: consumers,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            last_head: CachePadded::new(AtomicUsize::new(0)),
            last_tail: CachePadded::new(AtomicUsize::new(0)),
            thr_pos: thr_pos.into_boxed_slice(),
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve a slot and block (spinning) until there is room. `slot` is an
    /// opaque pointer-sized word; `producer_index` must be `< producers`
    /// passed to [`Ring::new`] and stable for the calling thread.
    pub fn push(&self, slot: usize, producer_index: usize) {
        debug_assert!(producer_index < self.n_producers);
        let pos = &self.thr_pos[producer_index];

        let my_head = self.head.fetch_add(1, Ordering::AcqRel);
        pos.head.store(my_head, Ordering::Release);

        while my_head >= self.last_tail.load(Ordering::Acquire) + self.capacity {
            let mut min = self.tail.load(Ordering::Acquire);
            for i in 0..self.n_consumers {
                let t = self.thr_pos[i].tail.load(Ordering::Acquire);
                if t < min {
                    min = t;
                }
            }
            self.last_tail.store(min, Ordering::Release);

            if my_head < self.last_tail.load(Ordering::Acquire) + self.capacity {
                break;
            }
            std::hint::spin_loop();
        }

        self.slots[my_head & self.mask].store(slot, Ordering::Release);
        pos.head.store(NONE, Ordering::Release);
    }

    /// Reserve a consumer position if this thread doesn't already hold one.
    /// Returns `true` if a reservation is now held (fresh or pre-existing).
    fn ensure_reservation(&self, consumer_index: usize) {
        let pos = &self.thr_pos[consumer_index];
        if pos.in_situ.load(Ordering::Acquire) == 0 {
            let my_tail = self.tail.fetch_add(1, Ordering::AcqRel);
            pos.tail.store(my_tail, Ordering::Release);
            pos.in_situ.store(1, Ordering::Release);
        }
    }

    /// Block (spinning) until a slot is available, then pop it.
    pub fn pop(&self, consumer_index: usize) -> usize {
        debug_assert!(consumer_index < self.n_consumers);
        self.ensure_reservation(consumer_index);
        let my_tail = self.thr_pos[consumer_index].tail.load(Ordering::Acquire);

        while my_tail >= self.last_head.load(Ordering::Acquire) {
            self.refresh_last_head();
            if my_tail < self.last_head.load(Ordering::Acquire) {
                break;
            }
            std::hint::spin_loop();
        }

        self.take_reserved(consumer_index, my_tail)
    }

    /// Non-blocking pop: returns `None` immediately if no producer has
    /// published past this consumer's reservation.
    pub fn try_pop(&self, consumer_index: usize) -> Option<usize> {
        debug_assert!(consumer_index < self.n_consumers);
        self.ensure_reservation(consumer_index);
        let my_tail = self.thr_pos[consumer_index].tail.load(Ordering::Acquire);

        if my_tail >= self.last_head.load(Ordering::Acquire) {
            self.refresh_last_head();
            if my_tail >= self.last_head.load(Ordering::Acquire) {
                return None;
            }
        }

        Some(self.take_reserved(consumer_index, my_tail))
    }

    fn refresh_last_head(&self) {
        let mut min = self.head.load(Ordering::Acquire);
        for i in 0..self.n_producers {
            let h = self.thr_pos[i].head.load(Ordering::Acquire);
            if h < min {
                min = h;
            }
        }
        self.last_head.store(min, Ordering::Release);
    }

    fn take_reserved(&self, consumer_index: usize, my_tail: usize) -> usize {
        let slot = self.slots[my_tail & self.mask].load(Ordering::Acquire);
        let pos = &self.thr_pos[consumer_index];
        pos.tail.store(NONE, Ordering::Release);
        pos.in_situ.store(0, Ordering::Release);
        slot
    }
}
