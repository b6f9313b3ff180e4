// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instance identifier (`Aid`).
//!
//! Packed as a single `u64` of eight byte-wide fields, mirroring the
//! original's `aid_t` bitfield union but expressed as const-fn accessors
//! over a plain integer (no unions in safe Rust).
//!
//! Byte layout, most significant to least significant:
//! `[reserved][type_tag][host][attestation_group][thread][lib][enclave][process]`

use std::fmt;

/// Instance kind. Determines whether `ENCRYPTED` delivery is mandatory
/// for a pair of endpoints (§3: `ENCLAVE` <-> `ENCLAVE` must be encrypted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstanceType {
    Enclave = 0,
    Lib = 1,
    Proc = 2,
}

impl InstanceType {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Enclave,
            1 => Self::Lib,
            _ => Self::Proc,
        }
    }
}

/// 64-bit instance identifier with embedded routing fields.
///
/// `thread == 0` denotes "any thread on this instance" and is the key used
/// in the routing table; any other value names a specific destination
/// thread index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Aid(u64);

impl Aid {
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        process: u8,
        enclave: u8,
        lib: u8,
        thread: u8,
        attestation_group: u8,
        host: u8,
        type_tag: InstanceType,
        reserved: u8,
    ) -> Self {
        let raw = (process as u64)
            | ((enclave as u64) << 8)
            | ((lib as u64) << 16)
            | ((thread as u64) << 24)
            | ((attestation_group as u64) << 32)
            | ((host as u64) << 40)
            | ((type_tag as u8 as u64) << 48)
            | ((reserved as u64) << 56);
        Self(raw)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn process(self) -> u8 {
        self.0 as u8
    }

    #[inline]
    pub const fn enclave(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub const fn lib(self) -> u8 {
        (self.0 >> 16) as u8
    }

    #[inline]
    pub const fn thread(self) -> u8 {
        (self.0 >> 24) as u8
    }

    #[inline]
    pub const fn attestation_group(self) -> u8 {
        (self.0 >> 32) as u8
    }

    #[inline]
    pub const fn host(self) -> u8 {
        (self.0 >> 40) as u8
    }

    #[inline]
    pub const fn type_tag(self) -> InstanceType {
        InstanceType::from_u8((self.0 >> 48) as u8)
    }

    #[inline]
    pub const fn reserved(self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// Returns a copy of `self` with `thread` set, used to stamp the
    /// sender-chosen thread on send (§4.3/§4.4) and as the routing-table
    /// lookup key with `thread = 0` for "any thread on that instance".
    #[inline]
    #[must_use]
    pub const fn with_thread(self, thread: u8) -> Self {
        let cleared = self.0 & !(0xFFu64 << 24);
        Self(cleared | ((thread as u64) << 24))
    }

    /// The routing-table key for this instance: same identity, thread
    /// field cleared to zero.
    #[inline]
    #[must_use]
    pub const fn instance_key(self) -> Self {
        self.with_thread(0)
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Aid(proc={} enc={} lib={} thread={} group={} host={} type={:?})",
            self.process(),
            self.enclave(),
            self.lib(),
            self.thread(),
            self.attestation_group(),
            self.host(),
            self.type_tag()
        )
    }
}
