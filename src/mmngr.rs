// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Thread-safe façade (`MMngr`, §4.6): wraps a [`Runtime`]'s per-thread
//! `Smm` array and routes every call to the caller's own physical
//! thread, identified via [`Pool::current_thread`] (bound once at
//! worker start-up by [`Runtime::start`]). Unlike `Amm`/`Smm`, `MMngr`
//! itself carries no thread-affinity requirement — any thread holding
//! an `Arc<MMngr>` can call it, as long as it was bound to one of the
//! runtime's physical threads first.

use crate::aid::Aid;
use crate::error::{Error, Result};
use crate::msg::{DeliveryMode, MsgHeader, MsgType};
use crate::runtime::Runtime;
use crate::security::smm::{FlowCallback, Handle, TypeHandler};
use crate::thread_pool::Pool;
use std::collections::HashMap;
use std::sync::Arc;

pub struct MMngr {
    runtime: Arc<Runtime>,
}

impl MMngr {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    fn current_thread(&self) -> Result<usize> {
        Pool::current_thread().ok_or_else(|| {
            Error::Config("MMngr call from a thread never bound via Pool::bind_current_thread".into())
        })
    }

    pub fn allocate(&self, dest: Aid, payload_size: usize, delivery: DeliveryMode) -> Result<Handle> {
        let t = self.current_thread()?;
        self.runtime.smm(t).allocate(dest, payload_size, delivery)
    }

    pub fn allocate_reply(&self, reply_target: &MsgHeader, payload_size: usize) -> Result<Handle> {
        let t = self.current_thread()?;
        self.runtime.smm(t).allocate_reply(reply_target, payload_size)
    }

    pub fn send(&self, handle: Handle) -> Result<()> {
        let t = self.current_thread()?;
        self.runtime.smm(t).send(handle)
    }

    pub fn send_async(&self, handle: Handle, cb: FlowCallback) -> Result<u64> {
        let t = self.current_thread()?;
        self.runtime.smm(t).send_async(handle, cb)
    }

    pub fn register_type(&self, msg_type: MsgType, cb: TypeHandler) -> Result<()> {
        let t = self.current_thread()?;
        self.runtime.smm(t).register_type(msg_type, cb);
        Ok(())
    }

    pub fn end_async(&self, id: u64) -> Result<()> {
        let t = self.current_thread()?;
        self.runtime.smm(t).end_async(id);
        Ok(())
    }

    pub fn register_name(&self, name: impl Into<String>, aid: Aid) -> Result<()> {
        let t = self.current_thread()?;
        self.runtime.smm(t).register_name(name, aid);
        Ok(())
    }

    /// Union of every thread's name-service map. Names are process-wide
    /// in intent, but each `Smm` keeps its own copy (§4.4) rather than
    /// sharing one across threads, so a lookup issued before every
    /// thread has observed a given registration may still miss it.
    pub fn names(&self) -> HashMap<String, Aid> {
        let mut out = HashMap::new();
        for t in 0..self.runtime.thread_count() {
            out.extend(self.runtime.smm(t).names());
        }
        out
    }
}
