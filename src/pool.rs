// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Global message pool (§3): a [`Ring`] pre-filled with `N` pre-allocated
//! maximum-size [`Msg`] slots. Allocation is `pop`, release is `push`,
//! both parameterised by the caller's *global* physical thread index.

use crate::error::{Error, Result};
use crate::msg::{DeliveryMode, Msg, MsgHeader, MsgType, HEADER_LEN};
use crate::ring::Ring;
use parking_lot::Mutex;
use std::sync::Arc;

/// A pool slot is an index into `GlobalPool`'s backing storage, smuggled
/// through the ring as an opaque `usize` (the ring owns neither the
/// pointee nor its lifetime, per §4.1).
pub struct GlobalPool {
    ring: Ring,
    slots: Box<[Mutex<Msg>]>,
    max_msg_size: usize,
}

fn empty_header() -> MsgHeader {
    MsgHeader {
        msg_type: MsgType::Regular,
        src: crate::aid::Aid::from_raw(0),
        dest: crate::aid::Aid::from_raw(0),
        id: 0,
        size: 0,
        session_count: 0,
        delivery: DeliveryMode::Cleartext,
        evidence_hash: [0u8; 32],
        omit_from_log: false,
    }
}

impl GlobalPool {
    /// `slots` must be a power of two (it dimensions the backing ring);
    /// `max_msg_size` bounds the payload that `allocate` may hand out
    /// (header included, per §3's `size <= MAX_MSG_SIZE` invariant).
    pub fn new(slots: usize, max_msg_size: usize, producers: usize, consumers: usize) -> Self {
        assert!(slots.is_power_of_two(), "pool slot count must be power of two");
        let mut storage = Vec::with_capacity(slots);
        for _ in 0..slots {
            storage.push(Mutex::new(Msg::new(
                empty_header(),
                Vec::with_capacity(max_msg_size.saturating_sub(HEADER_LEN)),
            )));
        }
        let ring = Ring::new(slots, producers, consumers);
        for i in 0..slots {
            ring.push(i, 0);
        }
        Self {
            ring,
            slots: storage.into_boxed_slice(),
            max_msg_size,
        }
    }

    /// Pop a free slot, reset it to an empty header with `payload_size`
    /// capacity, and hand back its index. Callers exchange the index for
    /// the underlying `Msg` via [`GlobalPool::with_slot_mut`] until the
    /// message is ready to route.
    pub fn allocate(&self, global_thread: usize, payload_size: usize) -> Result<usize> {
        if HEADER_LEN + payload_size > self.max_msg_size {
            return Err(Error::MsgTooLarge {
                requested: HEADER_LEN + payload_size,
                max: self.max_msg_size,
            });
        }
        let idx = self
            .ring
            .try_pop(global_thread)
            .ok_or(Error::PoolExhausted)?;
        let mut slot = self.slots[idx].lock();
        slot.header = empty_header();
        slot.set_payload(vec![0u8; payload_size]);
        Ok(idx)
    }

    /// Blocking variant of [`GlobalPool::allocate`] for callers willing to
    /// wait for a free slot rather than fail fast.
    pub fn allocate_blocking(&self, global_thread: usize, payload_size: usize) -> Result<usize> {
        if HEADER_LEN + payload_size > self.max_msg_size {
            return Err(Error::MsgTooLarge {
                requested: HEADER_LEN + payload_size,
                max: self.max_msg_size,
            });
        }
        let idx = self.ring.pop(global_thread);
        let mut slot = self.slots[idx].lock();
        slot.header = empty_header();
        slot.set_payload(vec![0u8; payload_size]);
        Ok(idx)
    }

    /// Return a slot to the pool. Must be called exactly once per
    /// `allocate`/`allocate_blocking` (or once per copy, for cross-thread
    /// hand-off, where the responsibility transfers with the copy) — see
    /// §5's resource-lifetime rule.
    pub fn release(&self, global_thread: usize, idx: usize) {
        self.ring.push(idx, global_thread);
    }

    pub fn with_slot<R>(&self, idx: usize, f: impl FnOnce(&Msg) -> R) -> R {
        f(&self.slots[idx].lock())
    }

    pub fn with_slot_mut<R>(&self, idx: usize, f: impl FnOnce(&mut Msg) -> R) -> R {
        f(&mut self.slots[idx].lock())
    }
}

/// Shared handle to a process-wide pool.
pub type SharedPool = Arc<GlobalPool>;
