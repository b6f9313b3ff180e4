// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Crate-wide error type.
//!
//! Recoverable conditions are returned as `Error` values to the caller (or,
//! for an async flow, delivered as a status on the continuation). The truly
//! fatal conditions described in the component design (nonce reuse, AEAD
//! auth failure, session order violation) are not represented here at all —
//! those abort the process via [`crate::fatal!`] rather than unwind through
//! a `Result`.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Allocation / sizing
    // ------------------------------------------------------------------
    /// Requested message size exceeds `Config::max_msg_size`.
    MsgTooLarge { requested: usize, max: usize },
    /// The global message pool has no free slots.
    PoolExhausted,

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------
    /// No routing-table entry for the destination `Aid`; caller fell back
    /// to the gateway ring.
    UnknownPeer(crate::aid::Aid),

    // ------------------------------------------------------------------
    // Session / secure layer
    // ------------------------------------------------------------------
    /// Send attempted while the peer's `KeyCtx` is still `HANDSHAKING`.
    /// The message was queued, not dropped.
    HandshakePending,
    /// AEAD tag verification failed on receive.
    AuthFail,
    /// Outbound nonce would wrap around; caller must rotate keys.
    NonceWrap,
    /// Attempt to re-admit a `session_count` already delivered.
    OrderViolation { session_count: u64, expected: u64 },
    /// `ENCRYPTED` delivery requested but no key material is bound yet.
    NoKeyMaterial,

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------
    /// No typed handler registered yet; delivery has been deferred.
    HandlerMissing,
    /// The dispatcher received a stop request.
    StopRequested,

    // ------------------------------------------------------------------
    // Ambient
    // ------------------------------------------------------------------
    Io(std::io::Error),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MsgTooLarge { requested, max } => {
                write!(f, "message size {requested} exceeds max_msg_size {max}")
            }
            Self::PoolExhausted => write!(f, "global message pool exhausted"),
            Self::UnknownPeer(aid) => write!(f, "no route for {aid:?}, using gateway ring"),
            Self::HandshakePending => write!(f, "session handshake not yet complete"),
            Self::AuthFail => write!(f, "AEAD authentication failed"),
            Self::NonceWrap => write!(f, "outbound nonce would wrap"),
            Self::OrderViolation {
                session_count,
                expected,
            } => write!(
                f,
                "session_count {session_count} already delivered (expected {expected})"
            ),
            Self::NoKeyMaterial => write!(f, "no key material bound for encrypted delivery"),
            Self::HandlerMissing => write!(f, "no handler registered, delivery deferred"),
            Self::StopRequested => write!(f, "stop requested"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
