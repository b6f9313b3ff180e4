// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Time source for dynamic-measurement hashing (§6).
//!
//! The secure layer folds `now()`'s output into the running measurement
//! hash alongside each delivered message, so two replicas that process
//! the same message stream at different wall-clock times diverge unless
//! a deterministic clock (e.g. a logical clock during replay) is used
//! instead of [`SystemClock`].

use ring::digest::{digest, SHA256};

/// Produces the 32-byte hash input consumed by the measurement update.
pub trait Clock: Send + Sync {
    fn now(&self) -> [u8; 32];
}

/// Wall-clock-backed default: SHA-256 of the current time since
/// `UNIX_EPOCH`, expressed as nanoseconds.
#[derive(Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> [u8; 32] {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let digest = digest(&SHA256, &nanos.to_be_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_ref());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_produces_distinct_samples() {
        let clock = SystemClock::new();
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = clock.now();
        assert_ne!(a, b);
    }
}
