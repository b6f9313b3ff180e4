// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Zero-copy virtual buffer (`Mbuf`) and the view over it (`Zcstr`), §4.2.
//!
//! `Mbuf` is a reference-counted, append-only chain of byte chunks. Unlike
//! the original's raw-pointer linked list with manual per-node refcounts,
//! this implementation leans on `Arc` — the "shared-refcount primitive"
//! the design notes (§9) call out as the equivalent, safer choice in a
//! language that has one. Each chunk is an `Arc<[u8]>`; sharing a chunk
//! across two `Zcstr`s (via `substr`, `append(&Zcstr)`, or simply cloning a
//! `Mbuf` handle) is a pointer-and-refcount bump, never a byte copy. The
//! chunk list itself lives behind `Arc<Mutex<Vec<Node>>>` so a `Mbuf` can be
//! shared for reading by several `Zcstr` windows while a single owner
//! mutates it (the contract in §4.2: shared-reader immutability, single-
//! owner mutation — the mutex exists to make moving a `Zcstr` across
//! threads sound, not to support concurrent mutation, which callers must
//! not attempt).

pub mod zcstr;

pub use zcstr::Zcstr;

use parking_lot::Mutex;
use std::sync::Arc;

/// One chunk in the chain: a shared, immutable byte array plus the
/// `(skip, len)` window this node exposes into it. `skip`/`len` let a node
/// represent a sub-range of `bytes` without copying, which is how
/// `substr`/`append(&Zcstr)` duplicate "descriptors" that share the
/// physical array (§4.2).
#[derive(Clone)]
struct Node {
    bytes: Arc<[u8]>,
    skip: usize,
    len: usize,
}

impl Node {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        &self.bytes[self.skip..self.skip + self.len]
    }
}

/// Head of a chain of byte chunks. Cheap to clone (bumps the chain's
/// refcount); the chain itself is only physically freed once every `Mbuf`
/// handle referencing it has dropped, at which point each chunk's `Arc<[u8]>`
/// is decremented in turn and freed at zero — the refcount-balance
/// invariant in §4.2/§8.4 falls out of ordinary `Arc` drop semantics.
#[derive(Clone)]
pub struct Mbuf {
    nodes: Arc<Mutex<Vec<Node>>>,
}

impl Mbuf {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn total_len(&self) -> usize {
        self.nodes.lock().iter().map(|n| n.len).sum()
    }

    /// Append an owned buffer. Zero-copy: the `Vec` is boxed and wrapped in
    /// a fresh `Arc<[u8]>` with no byte copy, matching `owns=true` in the
    /// original's `append(chunk, owns)`.
    fn push_owned(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let len = bytes.len();
        self.nodes.lock().push(Node {
            bytes: Arc::from(bytes.into_boxed_slice()),
            skip: 0,
            len,
        });
    }

    /// Append a reference to an already-shared buffer (zero-copy,
    /// `owns=false`'s intent: the caller need not transfer sole ownership,
    /// because `Arc` lets both sides keep independent handles).
    fn push_shared(&self, bytes: Arc<[u8]>, skip: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.nodes.lock().push(Node { bytes, skip, len });
    }

    /// Every chunk covering `[offset, offset+length)` of the logical
    /// sequence, each as `(shared array, start-within-array, len)`.
    fn window(&self, offset: usize, length: usize) -> Vec<(Arc<[u8]>, usize, usize)> {
        let nodes = self.nodes.lock();
        let mut out = Vec::new();
        let mut consumed = 0usize;
        let mut remaining = length;
        for node in nodes.iter() {
            if remaining == 0 {
                break;
            }
            let node_start = consumed;
            let node_end = consumed + node.len;
            consumed = node_end;
            if node_end <= offset {
                continue;
            }
            let local_start = offset.saturating_sub(node_start);
            let take = (node.len - local_start).min(remaining);
            if take == 0 {
                continue;
            }
            out.push((node.bytes.clone(), node.skip + local_start, take));
            remaining -= take;
        }
        assert_eq!(remaining, 0, "Zcstr window out of bounds of its Mbuf");
        out
    }

    fn replace_all(&self, bytes: Vec<u8>) {
        let len = bytes.len();
        let mut nodes = self.nodes.lock();
        nodes.clear();
        if len > 0 {
            nodes.push(Node {
                bytes: Arc::from(bytes.into_boxed_slice()),
                skip: 0,
                len,
            });
        }
    }
}

impl Default for Mbuf {
    fn default() -> Self {
        Self::new()
    }
}
