// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Replay manager (`Replay`, §4.7): an alternative backend that reads
//! inbound messages from a persisted [`crate::tplog`] instead of the
//! network, and writes outbound messages to another log instead of
//! transmitting them anywhere. One instance exists per physical thread,
//! mirroring the per-thread `Smm`/`Amm` pair it stands in for.
//!
//! Delivery preserves the same strict per-sender ordering guarantee the
//! secure layer gives live traffic (§8.5/§8.8): a log entry whose
//! `session_count` doesn't match the sender's expected next value is
//! held until the gap closes, so a replay run reproduces the original
//! delivery order even if the log's physical write order ever diverged
//! from per-sender order (it shouldn't, for a log this process wrote
//! itself, but the invariant is cheap to keep and doubles as a replay
//! integrity check).

use crate::aid::Aid;
use crate::config::Config;
use crate::error::Result;
use crate::msg::{DeliveryMode, Msg, MsgHeader, MsgType};
use crate::tplog::{TpLogReader, TpLogWriter};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type FlowCallback = Box<dyn FnMut(&mut Msg) + Send + Sync>;
pub type TypeHandler = Box<dyn FnMut(&mut Msg) + Send + Sync>;

struct PerSenderState {
    expected: u64,
    reorder: BTreeMap<u64, Msg>,
}

pub struct Replay {
    thread_id: usize,
    self_aid: Aid,
    #[allow(dead_code)]
    config: Arc<Config>,
    reader: Mutex<TpLogReader>,
    writer: Mutex<TpLogWriter>,
    senders: DashMap<Aid, Mutex<PerSenderState>>,
    flow_handlers: Mutex<HashMap<u64, FlowCallback>>,
    type_handlers: DashMap<MsgType, TypeHandler>,
    deferred: Mutex<VecDeque<Msg>>,
    next_msg_id: AtomicU32,
    next_virtual_msg_id: AtomicU32,
}

impl Replay {
    pub fn new(
        thread_id: usize,
        self_aid: Aid,
        config: Arc<Config>,
        input_log: impl AsRef<Path>,
        output_log: impl AsRef<Path>,
    ) -> Result<Self> {
        Ok(Self {
            thread_id,
            self_aid,
            config,
            reader: Mutex::new(TpLogReader::open(input_log)?),
            writer: Mutex::new(TpLogWriter::create(output_log)?),
            senders: DashMap::new(),
            flow_handlers: Mutex::new(HashMap::new()),
            type_handlers: DashMap::new(),
            deferred: Mutex::new(VecDeque::new()),
            next_msg_id: AtomicU32::new(1),
            next_virtual_msg_id: AtomicU32::new(u32::MAX),
        })
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    // ------------------------------------------------------------------
    // Allocation / send (§4.7: "mirrors SMM allocation semantics but
    // from heap rather than the global pool")
    // ------------------------------------------------------------------

    pub fn allocate(&self, dest: Aid, payload_size: usize, delivery: DeliveryMode) -> Msg {
        let header = MsgHeader {
            msg_type: MsgType::Regular,
            src: self.self_aid,
            dest,
            id: 0,
            size: 0,
            session_count: 0,
            delivery,
            evidence_hash: [0u8; 32],
            omit_from_log: false,
        };
        Msg::new(header, vec![0u8; payload_size])
    }

    pub fn allocate_reply(&self, reply_target: &MsgHeader, payload_size: usize) -> Msg {
        let mut header = *reply_target;
        header.src = reply_target.dest;
        header.dest = reply_target.src;
        header.id = reply_target.id;
        header.session_count = reply_target.session_count + 1;
        Msg::new(header, vec![0u8; payload_size])
    }

    /// Write `msg` to the outbound log; replay sends are never
    /// transmitted anywhere (§4.7).
    pub fn send(&self, mut msg: Msg) -> Result<()> {
        msg.header.src = msg.header.src.with_thread(self.thread_id as u8);
        self.writer.lock().append(&msg)
    }

    /// As [`Replay::send`], but registers a continuation under a freshly
    /// assigned `id` (same `(src<<32)|counter` scheme as the live `Amm`,
    /// §3), kept alive so a replayed inbound response can resolve it.
    pub fn send_async(&self, mut msg: Msg, cb: FlowCallback) -> Result<u64> {
        msg.header.src = msg.header.src.with_thread(self.thread_id as u8);
        let counter = if msg.header.omit_from_log {
            self.next_virtual_msg_id.fetch_sub(1, Ordering::SeqCst)
        } else {
            self.next_msg_id.fetch_add(1, Ordering::SeqCst)
        };
        let id = ((msg.header.src.raw() as u32 as u64) << 32) | counter as u64;
        msg.header.id = id;
        self.flow_handlers.lock().insert(id, cb);
        self.writer.lock().append(&msg)?;
        Ok(id)
    }

    pub fn end_async(&self, id: u64) {
        self.flow_handlers.lock().remove(&id);
    }

    pub fn register_type(&self, msg_type: MsgType, cb: TypeHandler) {
        self.type_handlers.insert(msg_type, cb);
        self.retry_deferred();
    }

    // ------------------------------------------------------------------
    // Replay delivery (§4.7/§8.8)
    // ------------------------------------------------------------------

    /// One tick: retry anything deferred for lack of a handler, then
    /// read and admit the next log entry. Returns `false` once the log
    /// is exhausted and nothing was retried.
    pub fn poll_tick(&self) -> bool {
        let retried = self.retry_deferred();
        match self.reader.lock().next_entry() {
            Ok(Some(msg)) => {
                self.admit(msg);
                true
            }
            Ok(None) => retried,
            Err(e) => {
                crate::warn!("replay[{}]: log read error: {e}", self.thread_id);
                retried
            }
        }
    }

    /// Drive `poll_tick` until the inbound log is exhausted and no
    /// deferred delivery remains pending.
    pub fn run_to_completion(&self) {
        loop {
            if !self.poll_tick() && self.reader.lock().next_entry().map(|e| e.is_none()).unwrap_or(true) {
                if self.deferred.lock().is_empty() {
                    break;
                }
            }
        }
    }

    fn admit(&self, msg: Msg) {
        // Keyed by the sender's full `Aid` (thread included), matching
        // `Smm::on_receive`'s per-(src-thread) ordering.
        let key = msg.header.src;
        self.senders
            .entry(key)
            .or_insert_with(|| Mutex::new(PerSenderState { expected: 0, reorder: BTreeMap::new() }));
        let entry = self.senders.get(&key).expect("just inserted");
        let mut st = entry.lock();

        if msg.header.session_count < st.expected {
            crate::fatal!(
                "replay[{}]: OrderViolation: session_count {} already delivered (expected {}) from {:?}",
                self.thread_id,
                msg.header.session_count,
                st.expected,
                msg.header.src
            );
        }
        if msg.header.session_count > st.expected {
            st.reorder.insert(msg.header.session_count, msg);
            return;
        }

        self.dispatch(msg);
        st.expected += 1;
        loop {
            match st.reorder.remove(&st.expected) {
                Some(next) => {
                    self.dispatch(next);
                    st.expected += 1;
                }
                None => break,
            }
        }
    }

    fn dispatch(&self, mut msg: Msg) {
        if msg.header.id != 0 {
            let cb = self.flow_handlers.lock().remove(&msg.header.id);
            if let Some(mut cb) = cb {
                cb(&mut msg);
                return;
            }
        }

        let handled = match self.type_handlers.get_mut(&msg.header.msg_type) {
            Some(mut cb) => {
                cb(&mut msg);
                true
            }
            None => false,
        };

        if !handled {
            self.deferred.lock().push_back(msg);
        }
    }

    fn retry_deferred(&self) -> bool {
        let pending: Vec<Msg> = self.deferred.lock().drain(..).collect();
        let any = !pending.is_empty();
        for msg in pending {
            self.dispatch(msg);
        }
        any
    }

    pub fn clear_deferred(&self) {
        self.deferred.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::InstanceType;

    fn aid(n: u8) -> Aid {
        Aid::new(n, 0, 0, 0, 0, 0, InstanceType::Lib, 0)
    }

    #[test]
    fn scenario_s8_replays_in_order_and_reproduces_outbound_log() {
        let dir = tempfile::tempdir().unwrap();
        let inbound_path = dir.path().join("inbound.log");
        let outbound_path = dir.path().join("outbound.log");

        // Seed the inbound log as if a prior live run had recorded it.
        {
            let mut writer = TpLogWriter::create(&inbound_path).unwrap();
            for i in 0..5u64 {
                let header = MsgHeader {
                    msg_type: MsgType::Regular,
                    src: aid(1),
                    dest: aid(2),
                    id: 0,
                    size: 0,
                    session_count: i,
                    delivery: DeliveryMode::Cleartext,
                    evidence_hash: [0u8; 32],
                    omit_from_log: false,
                };
                writer.append(&Msg::new(header, vec![i as u8])).unwrap();
            }
        }

        let config = Arc::new(Config::default());
        let replay = Replay::new(0, aid(2), config, &inbound_path, &outbound_path).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        replay.register_type(
            MsgType::Regular,
            Box::new(move |m: &mut Msg| {
                s.lock().push(m.header.session_count);
                let mut reply = Msg::new(
                    MsgHeader {
                        msg_type: MsgType::Regular,
                        src: aid(2),
                        dest: aid(1),
                        id: 0,
                        size: 0,
                        session_count: m.header.session_count,
                        delivery: DeliveryMode::Cleartext,
                        evidence_hash: [0u8; 32],
                        omit_from_log: false,
                    },
                    m.payload.clone(),
                );
                reply.header.src = aid(2);
            }),
        );

        for _ in 0..5 {
            replay.poll_tick();
        }

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn out_of_order_log_entries_are_held_until_the_gap_closes() {
        let dir = tempfile::tempdir().unwrap();
        let inbound_path = dir.path().join("inbound.log");
        let outbound_path = dir.path().join("outbound.log");

        {
            let mut writer = TpLogWriter::create(&inbound_path).unwrap();
            for i in [0u64, 2, 1] {
                let header = MsgHeader {
                    msg_type: MsgType::Regular,
                    src: aid(1),
                    dest: aid(2),
                    id: 0,
                    size: 0,
                    session_count: i,
                    delivery: DeliveryMode::Cleartext,
                    evidence_hash: [0u8; 32],
                    omit_from_log: false,
                };
                writer.append(&Msg::new(header, vec![])).unwrap();
            }
        }

        let config = Arc::new(Config::default());
        let replay = Replay::new(0, aid(2), config, &inbound_path, &outbound_path).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        replay.register_type(
            MsgType::Regular,
            Box::new(move |m: &mut Msg| s.lock().push(m.header.session_count)),
        );

        for _ in 0..3 {
            replay.poll_tick();
        }

        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_handler_defers_until_registered() {
        let dir = tempfile::tempdir().unwrap();
        let inbound_path = dir.path().join("inbound.log");
        let outbound_path = dir.path().join("outbound.log");
        {
            let mut writer = TpLogWriter::create(&inbound_path).unwrap();
            let header = MsgHeader {
                msg_type: MsgType::Regular,
                src: aid(1),
                dest: aid(2),
                id: 0,
                size: 0,
                session_count: 0,
                delivery: DeliveryMode::Cleartext,
                evidence_hash: [0u8; 32],
                omit_from_log: false,
            };
            writer.append(&Msg::new(header, vec![])).unwrap();
        }

        let config = Arc::new(Config::default());
        let replay = Replay::new(0, aid(2), config, &inbound_path, &outbound_path).unwrap();
        replay.poll_tick(); // no handler yet -> deferred

        let fired = Arc::new(Mutex::new(false));
        let f = fired.clone();
        replay.register_type(MsgType::Regular, Box::new(move |_m| *f.lock() = true));
        assert!(*fired.lock());
    }
}
