// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Exercises the assembled `Runtime`/`MMngr`/`SignalHandler` façade
//! end-to-end rather than the per-module internals one level down:
//! a single-thread runtime started on real worker OS threads, driven
//! purely through the public API, brought down with a self-addressed
//! `SignalExit`.

use diggi_core::aid::{Aid, InstanceType};
use diggi_core::msg::{DeliveryMode, MsgType};
use diggi_core::runtime::RuntimeBuilder;
use diggi_core::thread_pool::Pool;
use diggi_core::{MMngr, SignalHandler};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn self_aid() -> Aid {
    Aid::new(7, 0, 0, 0, 0, 0, InstanceType::Lib, 0)
}

fn wait_until(max: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < max {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    done()
}

#[test]
fn a_started_runtime_delivers_a_self_addressed_message_on_a_real_worker_thread() {
    let runtime = RuntimeBuilder::new(self_aid(), 1).build().unwrap();
    let signal = SignalHandler::new(runtime.clone());
    signal.install();

    let received = Arc::new(Mutex::new(Vec::new()));
    let r = received.clone();
    runtime
        .smm(0)
        .register_type(MsgType::Regular, Box::new(move |m| r.lock().push(m.payload.clone())));

    runtime.start();

    // Allocate/send from a thread of our own, outside the worker pool,
    // by binding it to the runtime's single physical thread the same
    // way a caller embedding this crate would from its own entry point.
    Pool::bind_current_thread(0);
    let mngr = MMngr::new(runtime.clone());
    let handle = mngr.allocate(self_aid(), 4, DeliveryMode::Cleartext).unwrap();
    if let diggi_core::security::smm::Handle::Pool(idx) = &handle {
        runtime.amm(0).pool().with_slot_mut(*idx, |m| m.payload = b"ping".to_vec());
    }
    mngr.send(handle).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || received.lock().len() == 1),
        "message was never delivered by the worker thread"
    );
    assert_eq!(received.lock()[0], b"ping");

    signal.stop().unwrap();
    runtime.stop();
    assert!(runtime.thread_pool().is_stopping());
}

#[test]
fn stop_drains_the_worker_without_losing_the_in_flight_message() {
    // A regular message sent in the same batch as the shutdown signal
    // must still be delivered before the worker exits: `stop()` only
    // flips a flag observed at the top of the next tick, it doesn't
    // cut off a tick already in progress.
    let runtime = RuntimeBuilder::new(self_aid(), 1).build().unwrap();
    let signal = SignalHandler::new(runtime.clone());
    signal.install();

    let received = Arc::new(Mutex::new(false));
    let r = received.clone();
    runtime
        .smm(0)
        .register_type(MsgType::Regular, Box::new(move |_m| *r.lock() = true));

    Pool::bind_current_thread(0);
    let mngr = MMngr::new(runtime.clone());
    let handle = mngr.allocate(self_aid(), 0, DeliveryMode::Cleartext).unwrap();
    mngr.send(handle).unwrap();
    signal.stop().unwrap();

    runtime.start();
    runtime.stop();

    assert!(*received.lock(), "message already queued before stop() must still be delivered");
}

#[test]
fn scenario_s3_and_s9_each_destination_thread_sees_only_its_own_ordered_stream() {
    // §8 S3/S9: a sender fans messages out across several worker threads
    // of the same peer instance by stamping `dest.thread`; each thread's
    // own typed handler must see exactly its own share, in its own
    // `session_count` order, and no other thread's messages.
    const THREADS: u8 = 4;
    const PER_THREAD: u64 = 200;

    let runtime = RuntimeBuilder::new(self_aid(), THREADS as usize).build().unwrap();

    // One collector per destination thread: (session_count, payload) pairs
    // observed by that thread's own `Regular` handler.
    let seen: Vec<Arc<Mutex<Vec<(u64, u64)>>>> =
        (0..THREADS).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    for (t, slot) in seen.iter().enumerate() {
        let s = slot.clone();
        runtime.smm(t).register_type(
            MsgType::Regular,
            Box::new(move |m| {
                let payload = u64::from_le_bytes(m.payload[..8].try_into().unwrap());
                s.lock().push((m.header.session_count, payload));
            }),
        );
    }

    runtime.start();

    Pool::bind_current_thread(0);
    let mngr = MMngr::new(runtime.clone());
    // Round-robin across destination threads so each thread's stream is
    // interleaved with the others' on the wire, not sent back-to-back.
    for i in 0..PER_THREAD {
        for t in 0..THREADS {
            let dest = self_aid().with_thread(t);
            let handle = mngr.allocate(dest, 8, DeliveryMode::Cleartext).unwrap();
            if let diggi_core::security::smm::Handle::Pool(idx) = &handle {
                runtime.amm(0).pool().with_slot_mut(*idx, |m| m.payload = i.to_le_bytes().to_vec());
            }
            mngr.send(handle).unwrap();
        }
    }

    let all_delivered = wait_until(Duration::from_secs(10), || {
        seen.iter().all(|s| s.lock().len() as u64 == PER_THREAD)
    });
    assert!(all_delivered, "every destination thread must receive its full share");

    for (t, slot) in seen.iter().enumerate() {
        let got = slot.lock();
        let sessions: Vec<u64> = got.iter().map(|(s, _)| *s).collect();
        let payloads: Vec<u64> = got.iter().map(|(_, p)| *p).collect();
        assert_eq!(
            sessions,
            (0..PER_THREAD).collect::<Vec<_>>(),
            "thread {t} must see its own session_count run 0..{PER_THREAD} with no gaps or cross-thread interleaving"
        );
        assert_eq!(
            payloads,
            (0..PER_THREAD).collect::<Vec<_>>(),
            "thread {t} must see exactly the payloads addressed to it, in send order"
        );
    }

    runtime.stop();
}
