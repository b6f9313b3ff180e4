// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Signal-driven shutdown (`SignalHandler`, §4.13/§6): a voluntary,
//! in-band request to tear the runtime down, delivered as an ordinary
//! self-addressed message rather than an OS signal or a side channel —
//! matching the original's "no need for addressing or encryption, only
//! signal the runtime to exit" design.
//!
//! `stop()` is safe to call from any bound worker thread (including from
//! inside a message handler running on one); the actual teardown
//! happens asynchronously once the `SignalExit` message round-trips
//! through that thread's own poll loop, so `stop()` itself never blocks
//! waiting for shutdown to complete — call [`Runtime::stop`] afterward
//! (or just let the process exit once every worker has observed it) to
//! join the worker threads.

use crate::aid::Aid;
use crate::error::{Error, Result};
use crate::msg::{DeliveryMode, MsgType};
use crate::runtime::Runtime;
use crate::security::smm::Handle;
use crate::thread_pool::Pool;
use std::sync::Arc;

pub struct SignalHandler {
    runtime: Arc<Runtime>,
}

impl SignalHandler {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Register the `SignalExit` handler that actually stops the
    /// cooperative thread pool, on every thread's `Smm`. Called once by
    /// the owner of a [`Runtime`] before [`Runtime::start`].
    pub fn install(&self) {
        for t in 0..self.runtime.thread_count() {
            let thread_pool = self.runtime.thread_pool().clone();
            self.runtime.smm(t).register_type(
                MsgType::SignalExit,
                Box::new(move |_msg| thread_pool.stop()),
            );
        }
    }

    /// Request a voluntary shutdown from the calling (bound) thread: send
    /// a `SignalExit` message addressed to this thread's own `Smm`,
    /// cleartext and unencrypted, so it needs no handshake and cannot be
    /// deferred behind `pending_out` (§4.13).
    pub fn stop(&self) -> Result<()> {
        let t = Pool::current_thread()
            .ok_or_else(|| Error::Config("SignalHandler::stop called from an unbound thread".into()))?;
        let smm = self.runtime.smm(t);
        let dest: Aid = self.runtime.self_aid().with_thread(t as u8);
        let handle = smm.allocate(dest, 0, DeliveryMode::Cleartext)?;
        let handle = match handle {
            Handle::Pool(idx) => {
                smm.amm().pool().with_slot_mut(idx, |m| m.header.msg_type = MsgType::SignalExit);
                Handle::Pool(idx)
            }
            Handle::Private(mut msg) => {
                msg.header.msg_type = MsgType::SignalExit;
                Handle::Private(msg)
            }
        };
        smm.send(handle)
    }
}
