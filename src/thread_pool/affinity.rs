// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CPU affinity pinning (§5).
//!
//! Non-enclave threads are pinned to increasing logical CPUs starting at
//! core 1; enclave threads are pinned from the top CPU downward. CPU 0 is
//! reserved for the host scheduler. Assignment wraps modulo the CPU count.
//!
//! Two module-level counters track the next core to hand out for each
//! kind, mirroring the round-robin allocator the affinity logic is
//! ported from; `reset()` exists for test isolation.

use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_CORE: AtomicUsize = AtomicUsize::new(0);
static NEXT_ENCLAVE_CORE: AtomicUsize = AtomicUsize::new(1);

/// Reset both round-robin counters. Only useful in tests, where process
/// lifetime doesn't match "once per real process start".
pub fn reset() {
    NEXT_CORE.store(0, Ordering::SeqCst);
    NEXT_ENCLAVE_CORE.store(1, Ordering::SeqCst);
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// The next core id to assign a non-enclave thread, without performing
/// the pin (callers combine this with [`pin_current_thread`]).
pub fn next_core_for_non_enclave() -> usize {
    let cpus = num_cpus();
    let usable = cpus.saturating_sub(1).max(1);
    let local = NEXT_CORE.fetch_add(1, Ordering::SeqCst) % usable;
    1 + local % usable.max(1)
}

/// The next core id to assign an enclave thread (top core downward).
pub fn next_core_for_enclave() -> usize {
    let cpus = num_cpus();
    let next = NEXT_ENCLAVE_CORE.fetch_add(1, Ordering::SeqCst);
    let wrapped = if next >= cpus { 1 } else { next };
    (cpus - wrapped) % cpus.max(1)
}

/// Pin the calling thread to `core_id` via `sched_setaffinity`. A no-op
/// returning `Ok(())` on platforms without `libc` affinity support
/// (callers never treat pinning failure as fatal — it's a placement
/// hint, not a correctness requirement).
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core_id: usize) -> std::io::Result<()> {
    // SAFETY: `cpu_set_t` is a plain C struct; `CPU_ZERO`/`CPU_SET` are the
    // `libc` crate's safe-to-call wrappers around the C macros of the same
    // name, operating on a local, appropriately-sized `cpu_set_t`.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core_id: usize) -> std::io::Result<()> {
    Ok(())
}

/// Spawn `f` on a new OS thread pinned according to `enclave`, mirroring
/// the original's `new_thread_with_affinity`/`new_thread_with_affinity_enc`
/// pair.
pub fn spawn_pinned<F>(enclave: bool, f: F) -> std::thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    let core = if enclave {
        next_core_for_enclave()
    } else {
        next_core_for_non_enclave()
    };
    std::thread::spawn(move || {
        if let Err(e) = pin_current_thread(core) {
            crate::warn!("failed to pin thread to core {core}: {e}");
        }
        f()
    })
}
