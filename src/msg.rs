// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Message envelope (`Msg`): a fixed 128-byte header plus variable payload
//! (§3).
//!
//! The header's on-the-wire layout is little-endian and packed, matching
//! §6's wire format exactly, so a `TPLog` entry or a cross-host envelope is
//! a direct byte-for-byte serialization of `MsgHeader`.

use crate::aid::Aid;

pub const HEADER_LEN: usize = 128;

/// Message kind. `SessionRequest`/`SignalExit` are interpreted by the core;
/// any other numeric value is an external-collaborator kind the core
/// passes through to typed handlers unexamined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    SessionRequest,
    Regular,
    SignalExit,
    /// An external-collaborator kind not interpreted by the core; the
    /// wrapped value is the original wire tag.
    External(u16),
}

impl MsgType {
    const fn wire_tag(self) -> u16 {
        match self {
            Self::SessionRequest => 0,
            Self::Regular => 1,
            Self::SignalExit => 2,
            Self::External(tag) => tag,
        }
    }

    const fn from_wire(tag: u16) -> Self {
        match tag {
            0 => Self::SessionRequest,
            1 => Self::Regular,
            2 => Self::SignalExit,
            other => Self::External(other),
        }
    }
}

/// Delivery mode. `ENCLAVE <-> ENCLAVE` traffic must be `Encrypted`
/// (enforced at send and receive time in the secure layer, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    Cleartext = 0,
    Encrypted = 1,
}

/// The 128-byte header preceding every message's payload.
///
/// Field order here is deliberately the wire order (§6); do not reorder
/// without updating [`MsgHeader::to_bytes`]/[`MsgHeader::from_bytes`].
#[derive(Debug, Clone, Copy)]
pub struct MsgHeader {
    pub msg_type: MsgType,
    pub src: Aid,
    pub dest: Aid,
    pub id: u64,
    pub size: u32,
    pub session_count: u64,
    pub delivery: DeliveryMode,
    pub evidence_hash: [u8; 32],
    pub omit_from_log: bool,
}

impl MsgHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.msg_type.wire_tag().to_le_bytes());
        buf[2..10].copy_from_slice(&self.src.raw().to_le_bytes());
        buf[10..18].copy_from_slice(&self.dest.raw().to_le_bytes());
        buf[18..26].copy_from_slice(&self.id.to_le_bytes());
        buf[26..30].copy_from_slice(&self.size.to_le_bytes());
        buf[30..38].copy_from_slice(&self.session_count.to_le_bytes());
        buf[38] = self.delivery as u8;
        buf[39..71].copy_from_slice(&self.evidence_hash);
        buf[71] = self.omit_from_log as u8;
        // buf[72..128] reserved, zero-filled.
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        let msg_type = MsgType::from_wire(u16::from_le_bytes(buf[0..2].try_into().unwrap()));
        let src = Aid::from_raw(u64::from_le_bytes(buf[2..10].try_into().unwrap()));
        let dest = Aid::from_raw(u64::from_le_bytes(buf[10..18].try_into().unwrap()));
        let id = u64::from_le_bytes(buf[18..26].try_into().unwrap());
        let size = u32::from_le_bytes(buf[26..30].try_into().unwrap());
        let session_count = u64::from_le_bytes(buf[30..38].try_into().unwrap());
        let delivery = if buf[38] == 1 {
            DeliveryMode::Encrypted
        } else {
            DeliveryMode::Cleartext
        };
        let mut evidence_hash = [0u8; 32];
        evidence_hash.copy_from_slice(&buf[39..71]);
        let omit_from_log = buf[71] != 0;

        Self {
            msg_type,
            src,
            dest,
            id,
            size,
            session_count,
            delivery,
            evidence_hash,
            omit_from_log,
        }
    }
}

/// A complete message: header plus payload bytes. `header.size` is kept in
/// sync with `HEADER_LEN + payload.len()` by every constructor/mutator
/// below — callers should not hand-edit `payload` without going through
/// [`Msg::set_payload`].
#[derive(Debug, Clone)]
pub struct Msg {
    pub header: MsgHeader,
    pub payload: Vec<u8>,
}

impl Msg {
    pub fn new(header: MsgHeader, payload: Vec<u8>) -> Self {
        let mut msg = Self { header, payload };
        msg.sync_size();
        msg
    }

    #[inline]
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    fn sync_size(&mut self) {
        self.header.size = self.total_len() as u32;
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
        self.sync_size();
    }

    /// Serialize header + payload as one contiguous buffer, matching the
    /// `TPLog`/wire layout exactly (header first, then payload bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}
