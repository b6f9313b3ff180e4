// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Asynchronous message dispatcher (`Amm`, §4.3): one per physical thread.
//! Polls its input ring with adaptive back-off, routes by `id` (one-shot
//! continuation) or by `type` (typed handler), and reschedules
//! cross-thread deliveries through the cooperative [`Pool`].
//!
//! Handler tables (`flow_handlers`/`type_handlers`) are conceptually
//! single-thread-owned (§5) — only this `Amm`'s own poll loop, and tasks
//! it schedules onto itself, ever mutate them. They are backed by
//! `DashMap` rather than a plain `HashMap` purely so `Arc<Amm>` can be
//! shared with the cross-thread forwarding closure without a second,
//! thread-unsafe interior-mutability story; there is no concurrent
//! writer in practice.

use crate::aid::Aid;
use crate::config::Config;
use crate::engine::routing::RoutingTable;
use crate::error::Result;
use crate::msg::{Msg, MsgHeader, MsgType};
use crate::pool::SharedPool;
use crate::ring::Ring;
use crate::thread_pool::Pool;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type FlowCallback = Box<dyn FnMut(&mut Msg) + Send + Sync>;
pub type TypeHandler = Box<dyn FnMut(&mut Msg) + Send + Sync>;

/// Forwards a pool slot to another physical thread's `Amm` for delivery.
/// Wired up by the owning `Runtime`/`MMngr` once every thread's `Amm` is
/// constructed (an `Amm` doesn't know about its siblings directly).
pub type ForwardFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

pub struct Amm {
    thread_id: usize,
    input_ring: Arc<Ring>,
    routing: Arc<RoutingTable>,
    pool: SharedPool,
    flow_handlers: DashMap<u64, FlowCallback>,
    type_handlers: DashMap<MsgType, TypeHandler>,
    deferred: Mutex<VecDeque<usize>>,
    next_msg_id: AtomicU32,
    next_virtual_msg_id: AtomicU32,
    idle_count: AtomicU32,
    backoff_usec: AtomicU64,
    config: Arc<Config>,
    thread_pool: Arc<Pool>,
    forward: ForwardFn,
}

impl Amm {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thread_id: usize,
        input_ring: Arc<Ring>,
        routing: Arc<RoutingTable>,
        pool: SharedPool,
        config: Arc<Config>,
        thread_pool: Arc<Pool>,
        forward: ForwardFn,
    ) -> Self {
        Self {
            thread_id,
            input_ring,
            routing,
            pool,
            flow_handlers: DashMap::new(),
            type_handlers: DashMap::new(),
            deferred: Mutex::new(VecDeque::new()),
            next_msg_id: AtomicU32::new(1),
            next_virtual_msg_id: AtomicU32::new(u32::MAX),
            idle_count: AtomicU32::new(0),
            backoff_usec: AtomicU64::new(config.backoff_base_usec),
            config,
            thread_pool,
            forward,
        }
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub fn input_ring(&self) -> &Arc<Ring> {
        &self.input_ring
    }

    /// Pop a fresh pool slot addressed `src -> dest`, per §4.3's `allocate`.
    pub fn allocate(&self, src: Aid, dest: Aid, payload_size: usize) -> Result<usize> {
        let idx = self.pool.allocate(self.thread_id, payload_size)?;
        self.pool.with_slot_mut(idx, |m| {
            m.header.src = src;
            m.header.dest = dest;
            m.header.id = 0;
            m.header.session_count = 0;
            m.header.omit_from_log = false;
        });
        Ok(idx)
    }

    /// Reply-allocation variant: copies `src`, `dest`, `type`, `id`,
    /// `delivery`, `omit_from_log` from `reply_target` and increments its
    /// `session_count` (§4.3).
    pub fn allocate_reply(&self, reply_target: &MsgHeader, payload_size: usize) -> Result<usize> {
        let idx = self.pool.allocate(self.thread_id, payload_size)?;
        self.pool.with_slot_mut(idx, |m| {
            m.header.src = reply_target.src;
            m.header.dest = reply_target.dest;
            m.header.msg_type = reply_target.msg_type;
            m.header.id = reply_target.id;
            m.header.delivery = reply_target.delivery;
            m.header.omit_from_log = reply_target.omit_from_log;
            m.header.session_count = reply_target.session_count + 1;
        });
        Ok(idx)
    }

    /// Fire-and-forget send: stamps `src.thread`, ends any outstanding
    /// flow for `id`, and routes into the destination ring (§4.3).
    pub fn send(&self, idx: usize) -> Result<()> {
        let (dest, id) = self.pool.with_slot_mut(idx, |m| {
            m.header.src = m.header.src.with_thread(self.thread_id as u8);
            (m.header.dest, m.header.id)
        });
        if id != 0 {
            self.end_async(id);
        }
        self.route(dest, idx)
    }

    /// Send and register a one-shot continuation under a freshly assigned
    /// `id`, per §4.3: `id = (src << 32) | counter`, using the regular
    /// counter normally or the decrementing virtual counter when
    /// `omit_from_log` marks this flow as excluded from record/replay.
    pub fn send_async(&self, idx: usize, cb: FlowCallback) -> Result<u64> {
        let (dest, src, omit) = self.pool.with_slot_mut(idx, |m| {
            m.header.src = m.header.src.with_thread(self.thread_id as u8);
            (m.header.dest, m.header.src, m.header.omit_from_log)
        });
        let counter = if omit {
            self.next_virtual_msg_id.fetch_sub(1, Ordering::SeqCst)
        } else {
            self.next_msg_id.fetch_add(1, Ordering::SeqCst)
        };
        let id = ((src.raw() as u32 as u64) << 32) | counter as u64;
        self.pool.with_slot_mut(idx, |m| m.header.id = id);
        self.flow_handlers.insert(id, cb);
        self.route(dest, idx)?;
        Ok(id)
    }

    fn route(&self, dest: Aid, idx: usize) -> Result<()> {
        let (ring, direct) = self.routing.resolve(dest);
        if !direct {
            crate::warn!("no route for {dest:?}, using gateway ring");
        }
        ring.push(idx, self.thread_id);
        Ok(())
    }

    /// Install this thread's handler for `msg_type` (one handler per type
    /// per thread, §4.3); immediately retries any deliveries that were
    /// deferred for lack of a handler.
    pub fn register_type(&self, msg_type: MsgType, cb: TypeHandler) {
        self.type_handlers.insert(msg_type, cb);
        self.retry_deferred();
    }

    pub fn end_async(&self, id: u64) {
        self.flow_handlers.remove(&id);
    }

    /// One poll tick: run any cross-thread tasks scheduled onto this
    /// thread, retry deferred deliveries, then try the input ring. Returns
    /// whether any work was done (a receive, not counting rescheduled
    /// tasks) so callers can feed §4.3's idle/back-off accounting.
    pub fn poll_tick(&self) -> bool {
        crate::trace_fn!("Amm::poll_tick");
        self.thread_pool.run_ready(self.thread_id);
        self.retry_deferred();

        match self.input_ring.try_pop(0) {
            Some(idx) => {
                self.idle_count.store(0, Ordering::SeqCst);
                self.backoff_usec
                    .store(self.config.backoff_base_usec, Ordering::SeqCst);
                self.deliver(idx);
                true
            }
            None => {
                let idle = self.idle_count.fetch_add(1, Ordering::SeqCst) + 1;
                if idle >= self.config.idle_threshold {
                    let backoff = self.backoff_usec.load(Ordering::SeqCst);
                    std::thread::sleep(Duration::from_micros(backoff));
                    let next = (backoff * 2).min(self.config.backoff_peak_usec);
                    self.backoff_usec.store(next, Ordering::SeqCst);
                }
                false
            }
        }
    }

    /// Like [`Amm::poll_tick`], but hands a local receive back to the
    /// caller as a raw pool index instead of dispatching it through this
    /// `Amm`'s own flow/type tables. Used by the secure layer (§4.4),
    /// which owns its own handler tables and must decrypt/reorder a
    /// message before any callback fires. Cross-thread deliveries are
    /// still forwarded transparently; idle/back-off accounting is shared
    /// with `poll_tick` so a thread may freely mix the two styles (e.g.
    /// cleartext traffic via `poll_tick`, secured traffic via `poll_raw`).
    pub fn poll_raw(&self) -> Option<usize> {
        self.thread_pool.run_ready(self.thread_id);

        match self.input_ring.try_pop(0) {
            Some(idx) => {
                self.idle_count.store(0, Ordering::SeqCst);
                self.backoff_usec
                    .store(self.config.backoff_base_usec, Ordering::SeqCst);
                let dest_thread = self.pool.with_slot(idx, |m| m.header.dest.thread() as usize);
                if dest_thread != self.thread_id {
                    (self.forward)(dest_thread, idx);
                    None
                } else {
                    Some(idx)
                }
            }
            None => {
                let idle = self.idle_count.fetch_add(1, Ordering::SeqCst) + 1;
                if idle >= self.config.idle_threshold {
                    let backoff = self.backoff_usec.load(Ordering::SeqCst);
                    std::thread::sleep(Duration::from_micros(backoff));
                    let next = (backoff * 2).min(self.config.backoff_peak_usec);
                    self.backoff_usec.store(next, Ordering::SeqCst);
                }
                None
            }
        }
    }

    /// The shared pool backing this `Amm`'s slots, for callers (the
    /// secure layer) that need to read/release a slot returned by
    /// `poll_raw` directly.
    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// Entry point for a cross-thread hand-off: the owning runtime's
    /// `forward` closure schedules this onto the destination thread (via
    /// [`Pool::schedule_on`]) rather than calling it inline, so the
    /// delivery still only ever touches this `Amm`'s handler tables from
    /// its own thread (§5).
    pub fn deliver_external(&self, idx: usize) {
        self.deliver(idx);
    }

    fn retry_deferred(&self) {
        let pending: Vec<usize> = self.deferred.lock().drain(..).collect();
        for idx in pending {
            self.deliver(idx);
        }
    }

    fn deliver(&self, idx: usize) {
        let (dest_thread, msg_id, msg_type) = self
            .pool
            .with_slot(idx, |m| (m.header.dest.thread() as usize, m.header.id, m.header.msg_type));

        if dest_thread != self.thread_id {
            (self.forward)(dest_thread, idx);
            return;
        }

        if msg_id != 0 {
            if let Some((_, mut cb)) = self.flow_handlers.remove(&msg_id) {
                self.pool.with_slot_mut(idx, |m| cb(m));
                self.pool.release(self.thread_id, idx);
                return;
            }
        }

        let handled = match self.type_handlers.get_mut(&msg_type) {
            Some(mut cb) => {
                self.pool.with_slot_mut(idx, |m| (*cb)(m));
                true
            }
            None => false,
        };

        if handled {
            self.pool.release(self.thread_id, idx);
        } else {
            self.deferred.lock().push_back(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::InstanceType;
    use crate::pool::GlobalPool;

    fn setup(thread_count: usize) -> (Arc<RoutingTable>, SharedPool, Arc<Config>, Arc<Pool>) {
        let gateway = Arc::new(Ring::new(16, thread_count, 1));
        let routing = Arc::new(RoutingTable::new(gateway));
        let pool = Arc::new(GlobalPool::new(64, 4096, thread_count, thread_count));
        let config = Arc::new(Config::default());
        let thread_pool = Arc::new(Pool::new(thread_count));
        (routing, pool, config, thread_pool)
    }

    fn noop_forward() -> ForwardFn {
        Arc::new(|_t, _idx| {})
    }

    #[test]
    fn local_typed_delivery_fires_handler() {
        let (routing, pool, config, thread_pool) = setup(1);
        let ring = Arc::new(Ring::new(16, 1, 1));
        let self_aid = Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0);
        routing.register(self_aid, ring.clone());
        let amm = Amm::new(0, ring, routing, pool, config, thread_pool, noop_forward());

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fired.clone();
        amm.register_type(
            MsgType::Regular,
            Box::new(move |_m| {
                f.store(true, Ordering::SeqCst);
            }),
        );

        let idx = amm.allocate(self_aid, self_aid, 4).unwrap();
        amm.send(idx).unwrap();
        assert!(amm.poll_tick());
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn missing_handler_defers_until_registered() {
        let (routing, pool, config, thread_pool) = setup(1);
        let ring = Arc::new(Ring::new(16, 1, 1));
        let self_aid = Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0);
        routing.register(self_aid, ring.clone());
        let amm = Amm::new(0, ring, routing, pool, config, thread_pool, noop_forward());

        let idx = amm.allocate(self_aid, self_aid, 4).unwrap();
        amm.send(idx).unwrap();
        assert!(amm.poll_tick()); // receives, no handler yet -> deferred

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fired.clone();
        amm.register_type(
            MsgType::Regular,
            Box::new(move |_m| {
                f.store(true, Ordering::SeqCst);
            }),
        );
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn flow_handler_takes_priority_over_typed_handler() {
        let (routing, pool, config, thread_pool) = setup(1);
        let ring = Arc::new(Ring::new(16, 1, 1));
        let self_aid = Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0);
        routing.register(self_aid, ring.clone());
        let amm = Amm::new(0, ring, routing, pool, config, thread_pool, noop_forward());

        let typed_fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let tf = typed_fired.clone();
        amm.register_type(
            MsgType::Regular,
            Box::new(move |_m| {
                tf.store(true, Ordering::SeqCst);
            }),
        );

        let flow_fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ff = flow_fired.clone();
        let idx = amm.allocate(self_aid, self_aid, 4).unwrap();
        amm.send_async(
            idx,
            Box::new(move |_m| {
                ff.store(true, Ordering::SeqCst);
            }),
        )
        .unwrap();
        amm.poll_tick();
        assert!(flow_fired.load(Ordering::SeqCst));
        assert!(!typed_fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cross_thread_destination_forwards_instead_of_delivering_locally() {
        let (routing, pool, config, thread_pool) = setup(2);
        let ring = Arc::new(Ring::new(16, 2, 1));
        let self_aid = Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0);
        routing.register(self_aid, ring.clone());

        let forwarded = Arc::new(Mutex::new(None));
        let f = forwarded.clone();
        let forward: ForwardFn = Arc::new(move |t, idx| {
            *f.lock() = Some((t, idx));
        });

        let amm = Amm::new(0, ring, routing, pool, config, thread_pool, forward);
        let idx = amm
            .allocate(self_aid, self_aid.with_thread(1), 4)
            .unwrap();
        amm.send(idx).unwrap();
        amm.poll_tick();
        assert!(forwarded.lock().is_some());
    }
}
