// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tamper-proof log (`TpLog`, §4.8): an append-only record of every
//! delivered/sent message, persisted as a plain concatenation of
//! `(header, payload)` records with no footer. A matching streaming
//! reader replays entries in the order they were written, stopping at
//! EOF or a short read.
//!
//! Writes are made atomic per entry by holding the writer's file handle
//! behind a single lock and issuing one `write_all` of the fully
//! serialized header+payload buffer per call — the OS guarantees that
//! single `write` syscalls on a regular file don't interleave with other
//! writers of the same fd, and there is exactly one writer per `TpLog`.

use crate::error::Result;
use crate::msg::{Msg, MsgHeader, HEADER_LEN};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::Path;

/// Append-only writer half of a `TpLog`.
pub struct TpLogWriter {
    file: File,
}

impl TpLogWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Append one message as `(header, payload)`, matching the wire
    /// layout exactly.
    pub fn append(&mut self, msg: &Msg) -> Result<()> {
        self.append_bytes(&msg.to_bytes())
    }

    /// Append a pre-serialized `(header, payload)` buffer, as produced
    /// by [`Msg::to_bytes`]. Exposed separately so callers holding a
    /// pool slot (rather than an owned `Msg`) don't need to clone one
    /// just to log it.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Streaming reader half of a `TpLog`: reads one `(header, payload)`
/// record at a time, in write order.
pub struct TpLogReader {
    reader: BufReader<File>,
}

impl TpLogReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    /// Read the next entry. `Ok(None)` on a clean EOF between records;
    /// a short read mid-record is reported as an `UnexpectedEof` error,
    /// matching §4.8's "EOF terminates replay" contract (a clean
    /// boundary is expected, a truncated one is not).
    pub fn next_entry(&mut self) -> Result<Option<Msg>> {
        let mut header_buf = [0u8; HEADER_LEN];
        match read_exact_or_eof(&mut self.reader, &mut header_buf)? {
            false => return Ok(None),
            true => {}
        }
        let header = MsgHeader::from_bytes(&header_buf);
        let payload_len = header.size as usize - HEADER_LEN;
        let mut payload = vec![0u8; payload_len];
        self.reader.read_exact(&mut payload)?;
        Ok(Some(Msg::new(header, payload)))
    }
}

/// Like `Read::read_exact`, but returns `Ok(false)` instead of erroring
/// when the very first byte hits EOF (a clean record boundary), and
/// still errors on a short read once any bytes have been consumed (a
/// truncated record).
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::{Aid, InstanceType};
    use crate::msg::{DeliveryMode, MsgType};

    fn sample(session_count: u64, payload: &[u8]) -> Msg {
        let header = MsgHeader {
            msg_type: MsgType::Regular,
            src: Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0),
            dest: Aid::new(2, 0, 0, 0, 0, 0, InstanceType::Lib, 0),
            id: 0,
            size: 0,
            session_count,
            delivery: DeliveryMode::Cleartext,
            evidence_hash: [0u8; 32],
            omit_from_log: false,
        };
        Msg::new(header, payload.to_vec())
    }

    #[test]
    fn append_then_read_back_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        let mut writer = TpLogWriter::create(&path).unwrap();
        writer.append(&sample(0, b"one")).unwrap();
        writer.append(&sample(1, b"two")).unwrap();
        writer.append(&sample(2, b"three")).unwrap();
        drop(writer);

        let mut reader = TpLogReader::open(&path).unwrap();
        let e0 = reader.next_entry().unwrap().unwrap();
        assert_eq!(e0.payload, b"one");
        assert_eq!(e0.header.session_count, 0);
        let e1 = reader.next_entry().unwrap().unwrap();
        assert_eq!(e1.payload, b"two");
        let e2 = reader.next_entry().unwrap().unwrap();
        assert_eq!(e2.payload, b"three");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn empty_log_yields_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.log");
        TpLogWriter::create(&path).unwrap();
        let mut reader = TpLogReader::open(&path).unwrap();
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn appends_across_separate_writer_handles_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi.log");
        TpLogWriter::create(&path).unwrap().append(&sample(0, b"a")).unwrap();
        TpLogWriter::create(&path).unwrap().append(&sample(1, b"b")).unwrap();

        let mut reader = TpLogReader::open(&path).unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap().payload, b"a");
        assert_eq!(reader.next_entry().unwrap().unwrap().payload, b"b");
    }
}
