// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Two instances sharing one physical thread's pool and ring plumbing
//! (the same arrangement `Smm`'s own unit tests use), talking cleartext
//! with null attestation, driven only through the public API. Covers
//! the flow-continuation and handshake-queueing properties that the
//! lower-level unit tests don't already exercise.

use diggi_core::aid::{Aid, InstanceType};
use diggi_core::config::Config;
use diggi_core::engine::{Amm, ForwardFn, RoutingTable};
use diggi_core::msg::{DeliveryMode, MsgType};
use diggi_core::pool::GlobalPool;
use diggi_core::ring::Ring;
use diggi_core::security::smm::Handle;
use diggi_core::security::{NullAttestation, RingAeadProvider, Smm, SystemClock};
use parking_lot::Mutex;
use std::sync::Arc;

fn aid(n: u8) -> Aid {
    Aid::new(n, 0, 0, 0, 0, 0, InstanceType::Lib, 0)
}

fn forward_noop() -> ForwardFn {
    Arc::new(|_t, _idx| {})
}

/// Two peers, same process, same physical thread: one shared pool and
/// one ring per direction, matching how co-located instances actually
/// exchange raw pool indices (§4.3's ring carries an index into a pool
/// both ends can dereference).
fn build_pair() -> (Arc<Smm>, Arc<Smm>) {
    let config = Arc::new(Config::default());
    let pool = Arc::new(GlobalPool::new(4096, 4096, 2, 2));
    let routing = Arc::new(RoutingTable::new(Arc::new(Ring::new(16, 2, 1))));
    let ring_a = Arc::new(Ring::new(16, 2, 1));
    let ring_b = Arc::new(Ring::new(16, 2, 1));
    routing.register(aid(1), ring_a.clone());
    routing.register(aid(2), ring_b.clone());

    let thread_pool = Arc::new(diggi_core::thread_pool::Pool::new(2));

    let amm_a = Arc::new(Amm::new(0, ring_a, routing.clone(), pool.clone(), config.clone(), thread_pool.clone(), forward_noop()));
    let amm_b = Arc::new(Amm::new(0, ring_b, routing, pool, config.clone(), thread_pool, forward_noop()));

    let smm_a = Arc::new(Smm::new(
        0,
        aid(1),
        config.clone(),
        amm_a,
        Arc::new(RingAeadProvider::new()),
        Arc::new(NullAttestation::new()),
        Arc::new(SystemClock::new()),
        None,
        None,
    ));
    let smm_b = Arc::new(Smm::new(
        0,
        aid(2),
        config,
        amm_b,
        Arc::new(RingAeadProvider::new()),
        Arc::new(NullAttestation::new()),
        Arc::new(SystemClock::new()),
        None,
        None,
    ));
    (smm_a, smm_b)
}

fn pump(a: &Smm, b: &Smm, ticks: usize) {
    for _ in 0..ticks {
        a.poll_tick();
        b.poll_tick();
    }
}

#[test]
fn scenario_s4_flow_continuation_fires_exactly_once() {
    let (a, b) = build_pair();

    let fired = Arc::new(Mutex::new((0u32, Vec::new())));
    let f = fired.clone();

    // `b` replies to anything addressed to it with a Regular handler
    // that allocates a reply and sends it back.
    let b_reply = b.clone();
    b.register_type(
        MsgType::Regular,
        Box::new(move |m| {
            let reply = b_reply.allocate_reply(&m.header, m.payload.len()).unwrap();
            if let Handle::Pool(idx) = &reply {
                b_reply.amm().pool().with_slot_mut(*idx, |r| r.payload = m.payload.clone());
            }
            b_reply.send(reply).unwrap();
        }),
    );

    let handle = a.allocate(aid(2), 5, DeliveryMode::Cleartext).unwrap();
    if let Handle::Pool(idx) = &handle {
        a.amm().pool().with_slot_mut(*idx, |m| m.payload = b"hello".to_vec());
    }
    a.send_async(
        handle,
        Box::new(move |m| {
            let mut guard = f.lock();
            guard.0 += 1;
            guard.1 = m.payload.clone();
        }),
    )
    .unwrap();

    pump(&a, &b, 16);

    let guard = fired.lock();
    assert_eq!(guard.0, 1, "continuation must fire exactly once");
    assert_eq!(guard.1, b"hello");
}

#[test]
fn scenario_s7_messages_sent_before_the_handshake_completes_still_arrive_in_send_order() {
    let (a, b) = build_pair();

    let arrived = Arc::new(Mutex::new(Vec::new()));
    let ar = arrived.clone();
    b.register_type(
        MsgType::Regular,
        Box::new(move |m| ar.lock().push(m.payload.clone())),
    );

    // Null attestation actually completes the handshake synchronously on
    // the first send, so queueing never literally happens today; this
    // still pins the contract that whatever does queue drains in order.
    for i in 0u8..5 {
        let handle = a.allocate(aid(2), 1, DeliveryMode::Cleartext).unwrap();
        if let Handle::Pool(idx) = &handle {
            a.amm().pool().with_slot_mut(*idx, |m| m.payload = vec![i]);
        }
        match a.send(handle) {
            Ok(()) => {}
            Err(diggi_core::error::Error::HandshakePending) => {}
            Err(e) => panic!("unexpected send error: {e}"),
        }
    }

    pump(&a, &b, 16);

    assert_eq!(*arrived.lock(), vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
}

#[test]
fn scenario_s2_ordered_burst_survives_randomized_poll_interleaving() {
    // The sender/receiver poll loops are driven in a random order every
    // round instead of strict alternation, standing in for the jitter a
    // real pair of OS threads would see; per-sender ordering must still
    // hold regardless of how the two sides happen to interleave.
    const N: u64 = 500;
    let (a, b) = build_pair();

    let arrived = Arc::new(Mutex::new(Vec::new()));
    let ar = arrived.clone();
    b.register_type(
        MsgType::Regular,
        Box::new(move |m| ar.lock().push(m.header.session_count)),
    );

    for i in 0..N {
        let handle = a.allocate(aid(2), 8, DeliveryMode::Cleartext).unwrap();
        if let Handle::Pool(idx) = &handle {
            a.amm().pool().with_slot_mut(*idx, |m| m.payload = i.to_le_bytes().to_vec());
        }
        match a.send(handle) {
            Ok(()) => {}
            Err(diggi_core::error::Error::HandshakePending) => {}
            Err(e) => panic!("unexpected send error: {e}"),
        }
        // Jitter which side's (otherwise no-op) poll runs first, then
        // fully drain the receiver's ring before the next send — the ring
        // is bounded and there's no second thread to drain it concurrently,
        // so the drain itself can't be skipped, only its ordering jittered.
        if fastrand::bool() {
            a.poll_tick();
        }
        while b.poll_tick() {}
        if fastrand::bool() {
            a.poll_tick();
        }
    }
    pump(&a, &b, 16);

    let seen = arrived.lock();
    assert_eq!(seen.len(), N as usize, "every message must eventually be admitted");
    assert_eq!(*seen, (0..N).collect::<Vec<_>>(), "per-sender order must hold despite jittered polling");
}
