// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime handle (`Runtime`, §9 Design Notes): replaces the original's
//! process-wide static globals with an explicit, constructible object
//! that owns the shared pool, the routing table, and one `Amm`/`Smm`
//! pair per physical thread, wires cross-thread forwarding between
//! them, optionally pins each worker's CPU affinity, and spawns each
//! thread's poll loop on a dedicated OS thread bound to the cooperative
//! [`Pool`].
//!
//! Built via [`RuntimeBuilder`] rather than a constructor with a dozen
//! positional arguments, matching the attestation/aead/clock pluggable
//! seams already exposed by [`crate::security`].

use crate::aid::Aid;
use crate::config::Config;
use crate::engine::amm::{Amm, ForwardFn};
use crate::engine::routing::RoutingTable;
use crate::error::Result;
use crate::pool::{GlobalPool, SharedPool};
use crate::ring::Ring;
use crate::security::{Aead, Attestation, Clock, NullAttestation, RingAeadProvider, Smm, SystemClock};
use crate::thread_pool::{affinity, Pool};
use crate::tplog::TpLogWriter;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A running instance: shared infrastructure plus one `Amm`/`Smm` pair
/// per physical thread.
pub struct Runtime {
    config: Arc<Config>,
    thread_pool: Arc<Pool>,
    routing: Arc<RoutingTable>,
    pool: SharedPool,
    amms: Vec<Arc<Amm>>,
    smms: Vec<Arc<Smm>>,
    self_aid: Aid,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn thread_count(&self) -> usize {
        self.amms.len()
    }

    pub fn self_aid(&self) -> Aid {
        self.self_aid
    }

    pub fn amm(&self, thread_id: usize) -> &Arc<Amm> {
        &self.amms[thread_id]
    }

    pub fn smm(&self, thread_id: usize) -> &Arc<Smm> {
        &self.smms[thread_id]
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    pub fn thread_pool(&self) -> &Arc<Pool> {
        &self.thread_pool
    }

    /// Spawn one OS thread per physical thread, each binding itself to
    /// the cooperative pool and driving its `Smm::poll_tick` loop until
    /// [`Pool::stop`] is observed (§9's cooperative-shutdown property).
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        for thread_id in 0..self.amms.len() {
            let rt = self.clone();
            let handle = affinity::spawn_pinned(false, move || {
                Pool::bind_current_thread(thread_id);
                let smm = rt.smm(thread_id).clone();
                while !rt.thread_pool.is_stopping() {
                    if !smm.poll_tick() {
                        std::hint::spin_loop();
                    }
                }
            });
            workers.push(handle);
        }
    }

    /// Request every worker to stop on its next tick and block until all
    /// of them have exited.
    pub fn stop(&self) {
        self.thread_pool.stop();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

pub struct RuntimeBuilder {
    self_aid: Aid,
    thread_count: usize,
    config: Config,
    attestation: Arc<dyn Attestation>,
    aead: Arc<dyn Aead>,
    clock: Arc<dyn Clock>,
    record_log_dir: Option<PathBuf>,
}

impl RuntimeBuilder {
    pub fn new(self_aid: Aid, thread_count: usize) -> Self {
        Self {
            self_aid,
            thread_count,
            config: Config::default(),
            attestation: Arc::new(NullAttestation::new()),
            aead: Arc::new(RingAeadProvider::new()),
            clock: Arc::new(SystemClock::new()),
            record_log_dir: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn attestation(mut self, attestation: Arc<dyn Attestation>) -> Self {
        self.attestation = attestation;
        self
    }

    pub fn aead(mut self, aead: Arc<dyn Aead>) -> Self {
        self.aead = aead;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables §4.8 record mode: every thread gets an inbound/outbound
    /// `TPLog` under `dir`, named `<thread>.in.log`/`<thread>.out.log`.
    pub fn record_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_log_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Arc<Runtime>> {
        let config = Arc::new(self.config);
        let thread_pool = Arc::new(Pool::new(self.thread_count));
        let gateway = Arc::new(Ring::new(config.ring_capacity, self.thread_count, self.thread_count));
        let routing = Arc::new(RoutingTable::new(gateway));
        let pool: SharedPool = Arc::new(GlobalPool::new(
            config.pool_slots,
            config.max_msg_size,
            self.thread_count,
            self.thread_count,
        ));

        // Each physical thread owns a private, single-consumer input ring
        // (matching `Ring::try_pop`'s fixed `consumer_index = 0` use in
        // `Amm::poll_tick`/`poll_raw` — sharing one ring's reservation
        // slot across more than one real consumer thread would race).
        // The routing table can only address an *instance*, not one of
        // its threads (`RoutingTable::register` always clears the thread
        // byte), so only thread 0's ring is registered as this instance's
        // ingress; any message addressed to a sibling thread arrives on
        // thread 0 and is handed off via the `forward` closure below
        // rather than through a ring at all.
        let mut amms = Vec::with_capacity(self.thread_count);

        // Each `Amm`'s forward closure needs to hand a cross-thread
        // delivery to its destination thread's `Smm` (so session
        // ordering/decryption is tracked per destination thread rather
        // than bypassed), but the sibling `Vec<Arc<Smm>>` doesn't exist
        // until every `Smm` has been built, and every `Smm` in turn needs
        // its own `Amm` built first. `ArcSwapOption` lets every forward
        // closure capture a handle to the (initially empty) table and be
        // filled in once, after both loops below, before any message can
        // possibly flow.
        let smm_table: Arc<ArcSwapOption<Vec<Arc<Smm>>>> = Arc::new(ArcSwapOption::from(None));

        for thread_id in 0..self.thread_count {
            let own_ring = Arc::new(Ring::new(config.ring_capacity, self.thread_count, 1));
            if thread_id == 0 {
                routing.register(self.self_aid, own_ring.clone());
            }

            let table = smm_table.clone();
            let tp = thread_pool.clone();
            let forward: ForwardFn = Arc::new(move |dest_thread, idx| match table.load_full() {
                Some(siblings) => {
                    let dest = siblings[dest_thread].clone();
                    tp.schedule_on(dest_thread, move || dest.deliver_external(idx));
                }
                None => crate::warn!("forward requested before runtime wiring completed (thread {dest_thread})"),
            });
            let amm = Arc::new(Amm::new(
                thread_id,
                own_ring,
                routing.clone(),
                pool.clone(),
                config.clone(),
                thread_pool.clone(),
                forward,
            ));
            amms.push(amm);
        }

        let mut smms = Vec::with_capacity(self.thread_count);
        for (thread_id, amm) in amms.iter().enumerate() {
            let thread_aid = self.self_aid.with_thread(thread_id as u8);
            let (tplog_out, tplog_in) = match &self.record_log_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    let out = TpLogWriter::create(dir.join(format!("{thread_id}.out.log")))?;
                    let inb = TpLogWriter::create(dir.join(format!("{thread_id}.in.log")))?;
                    (Some(Mutex::new(out)), Some(Mutex::new(inb)))
                }
                None => (None, None),
            };
            let smm = Arc::new(Smm::new(
                thread_id,
                thread_aid,
                config.clone(),
                amm.clone(),
                self.aead.clone(),
                self.attestation.clone(),
                self.clock.clone(),
                tplog_out,
                tplog_in,
            ));
            smms.push(smm);
        }
        smm_table.store(Some(Arc::new(smms.clone())));

        Ok(Arc::new(Runtime {
            config,
            thread_pool,
            routing,
            pool,
            amms,
            smms,
            self_aid: self.self_aid,
            workers: Mutex::new(Vec::new()),
        }))
    }
}

