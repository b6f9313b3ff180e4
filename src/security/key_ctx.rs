// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-peer cryptographic and ordering state (§4.4).
//!
//! One `KeyCtx` exists per remote `Aid` a thread's secure layer has ever
//! exchanged a message with. It carries the symmetric key (once
//! derived), the monotonic nonce and session counters, and the queues
//! that hold messages while the handshake is in flight or while inbound
//! delivery is waiting on a gap.

use crate::aid::Aid;
use crate::msg::Msg;
use std::collections::{BTreeMap, VecDeque};

/// Implementation-defined default key installed when `ATTESTATION_MODE
/// = NONE`. Traffic encrypted under this key carries no real
/// confidentiality guarantee; it exists only so `ENCRYPTED` delivery is
/// mechanically exercisable without a trusted root. `ENCLAVE<->ENCLAVE`
/// sends still refuse `ENCRYPTED` delivery unless this key (or a real
/// one) has actually been installed — see [`KeyCtx::install_null_key`].
pub const NULL_ATTESTATION_KEY: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninit,
    Handshaking,
    Ready,
}

/// Per-peer state owned by one thread's secure layer.
pub struct KeyCtx {
    pub self_aid: Aid,
    pub other_aid: Aid,
    pub state: SessionState,
    key: Option<Vec<u8>>,
    /// Whether `key` was derived through real attestation, as opposed to
    /// the null-attestation default. Checked before honoring an
    /// `ENCRYPTED` send between two `ENCLAVE` endpoints.
    key_is_attested: bool,
    nonce: u32,
    pub out_session: u64,
    pub in_session: u64,
    pub pending_out: VecDeque<Msg>,
    pub inbound_reorder: BTreeMap<u64, Msg>,
}

impl KeyCtx {
    pub fn new(self_aid: Aid, other_aid: Aid) -> Self {
        Self {
            self_aid,
            other_aid,
            state: SessionState::Uninit,
            key: None,
            key_is_attested: false,
            nonce: 0,
            out_session: 0,
            in_session: 0,
            pending_out: VecDeque::new(),
            inbound_reorder: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Whether the bound key came from a real attestation exchange
    /// rather than the null-attestation default.
    pub fn key_is_attested(&self) -> bool {
        self.key_is_attested
    }

    pub fn install_key(&mut self, key: Vec<u8>, attested: bool) {
        self.key = Some(key);
        self.key_is_attested = attested;
    }

    /// Install the implementation-defined default key used when
    /// `ATTESTATION_MODE = NONE` (§4.5).
    pub fn install_null_key(&mut self) {
        self.install_key(NULL_ATTESTATION_KEY.to_vec(), false);
    }

    /// Reset `nonce` and `in_session` to zero, as happens when a group
    /// key bundle is installed (§4.5).
    pub fn reset_for_new_key(&mut self) {
        self.nonce = 0;
        self.in_session = 0;
    }

    /// Advance and return the next outbound nonce. Errors (via the
    /// caller's fatal-path, not a `Result` here) are the caller's
    /// responsibility — this returns `None` on wrap so the caller can
    /// raise `Error::NonceWrap` or treat wrap as fatal per §4.4.
    pub fn next_nonce(&mut self) -> Option<u32> {
        let next = self.nonce.checked_add(1)?;
        self.nonce = next;
        Some(next)
    }

    pub fn current_nonce(&self) -> u32 {
        self.nonce
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
    fn starts_uninit_with_no_key() {
        let ctx = KeyCtx::new(aid(1), aid(2));
        assert_eq!(ctx.state, SessionState::Uninit);
        assert!(!ctx.has_key());
        assert!(!ctx.key_is_attested());
    }

    #[test]
    fn install_null_key_is_not_attested() {
        let mut ctx = KeyCtx::new(aid(1), aid(2));
        ctx.install_null_key();
        assert!(ctx.has_key());
        assert!(!ctx.key_is_attested());
    }

    #[test]
    fn nonce_is_monotonic() {
        let mut ctx = KeyCtx::new(aid(1), aid(2));
        assert_eq!(ctx.next_nonce(), Some(1));
        assert_eq!(ctx.next_nonce(), Some(2));
        assert_eq!(ctx.current_nonce(), 2);
    }

    #[test]
    fn nonce_wrap_reports_none() {
        let mut ctx = KeyCtx::new(aid(1), aid(2));
        ctx.nonce = u32::MAX;
        assert_eq!(ctx.next_nonce(), None);
    }

    #[test]
    fn reset_for_new_key_zeroes_nonce_and_in_session() {
        let mut ctx = KeyCtx::new(aid(1), aid(2));
        ctx.next_nonce();
        ctx.in_session = 5;
        ctx.reset_for_new_key();
        assert_eq!(ctx.current_nonce(), 0);
        assert_eq!(ctx.in_session, 0);
    }
}
