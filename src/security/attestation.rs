// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pluggable attestation flow (§4.5, §6).
//!
//! An `Attestation` implementation drives the initiator/responder sides
//! of the handshake that takes a [`crate::security::key_ctx::KeyCtx`]
//! from `UNINIT` to `READY`. The core ships one implementation,
//! [`NullAttestation`], which performs no cryptographic binding at all —
//! both sides transition straight to `READY` on an empty acknowledgment.
//! A real deployment plugs in a verifier backed by whatever remote-
//! attestation hardware it trusts; that code lives outside this crate.

use crate::aid::Aid;

/// Outcome of a single handshake step: either a reply payload to send
/// back to the peer, or nothing further to do (the handshake is done on
/// this side).
pub enum FlowStep {
    /// Send this payload to the peer and stay in `HANDSHAKING`.
    Reply(Vec<u8>),
    /// No reply needed; the caller should transition to `READY`.
    Done,
}

/// Plugged-in attestation/session-key-derivation flow.
///
/// Implementations must be `Send + Sync`: the secure layer invokes them
/// from whichever physical thread owns the peer's `KeyCtx`, and an
/// attested implementation will typically hold shared state (a
/// connection to a trusted root, a key store) across threads.
pub trait Attestation: Send + Sync {
    /// Whether this implementation can actually verify a peer (`false`
    /// for the null implementation). The secure layer uses this to
    /// decide whether `ENCRYPTED` traffic may proceed once `READY`.
    fn attestable(&self) -> bool;

    /// First step taken by a `TRUSTED_ROOT` instance acting as the
    /// server side of the handshake for `peer`.
    fn server_flow_entry(&self, peer: Aid) -> FlowStep;

    /// First step taken by the initiator of a session (the side that
    /// called `send` against an unknown peer).
    fn client_initiator_entry(&self, peer: Aid) -> FlowStep;

    /// First step taken by the responder (the side that received a
    /// `SESSION_REQUEST` for an unknown peer).
    fn client_responder_entry(&self, peer: Aid, request: &[u8]) -> FlowStep;

    /// Verify an attestation quote. The null implementation always
    /// accepts.
    fn verify(&self, quote: &[u8]) -> bool;

    /// Signature revocation list for an attestation group, fetched from
    /// the trusted root. Empty for the null implementation.
    fn signature_revocation_list(&self, group: u8) -> Vec<u8>;
}

/// Default `ATTESTATION_MODE = NONE` implementation (§4.5): both sides
/// reach `READY` on an empty acknowledgment, with no cryptographic
/// binding. Key material for `ENCRYPTED` traffic is the implementation-
/// defined default in [`super::key_ctx`]; the secure layer is
/// responsible for refusing `ENCRYPTED` sends when that default was
/// never actually installed.
#[derive(Default)]
pub struct NullAttestation;

impl NullAttestation {
    pub fn new() -> Self {
        Self
    }
}

impl Attestation for NullAttestation {
    fn attestable(&self) -> bool {
        false
    }

    fn server_flow_entry(&self, _peer: Aid) -> FlowStep {
        FlowStep::Done
    }

    fn client_initiator_entry(&self, _peer: Aid) -> FlowStep {
        FlowStep::Done
    }

    fn client_responder_entry(&self, _peer: Aid, _request: &[u8]) -> FlowStep {
        FlowStep::Done
    }

    fn verify(&self, _quote: &[u8]) -> bool {
        true
    }

    fn signature_revocation_list(&self, _group: u8) -> Vec<u8> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::InstanceType;

    fn peer() -> Aid {
        Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0)
    }

    #[test]
    fn null_attestation_is_not_attestable() {
        assert!(!NullAttestation::new().attestable());
    }

    #[test]
    fn null_attestation_completes_every_entry_immediately() {
        let a = NullAttestation::new();
        assert!(matches!(a.server_flow_entry(peer()), FlowStep::Done));
        assert!(matches!(a.client_initiator_entry(peer()), FlowStep::Done));
        assert!(matches!(
            a.client_responder_entry(peer(), b"req"),
            FlowStep::Done
        ));
    }

    #[test]
    fn null_attestation_accepts_any_quote_and_has_no_revocations() {
        let a = NullAttestation::new();
        assert!(a.verify(b"anything"));
        assert!(a.signature_revocation_list(0).is_empty());
    }
}
