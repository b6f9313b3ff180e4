// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # diggi-core
//!
//! Trusted-runtime messaging and execution core for process-internal actor
//! systems: a lock-free MPMC ring, a zero-copy virtual buffer, a global
//! message pool, a per-thread async dispatcher, an authenticated in-order
//! secure message layer, record/replay, a tamper-proof log, and a
//! cooperative per-thread scheduler, wired together behind a single
//! [`Runtime`] handle.
//!
//! Every durable piece of mutable state belongs to exactly one physical
//! thread (its `Amm`/`Smm` pair); the only cross-thread traffic is message
//! hand-off through a ring or a scheduled continuation, never a shared
//! mutex around application state. This mirrors the original design's
//! "never block the thread that owns the data" rule, expressed here with
//! `Arc`, `DashMap`, and explicit thread-routed façades rather than global
//! statics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use diggi_core::aid::{Aid, InstanceType};
//! use diggi_core::msg::DeliveryMode;
//! use diggi_core::runtime::RuntimeBuilder;
//! use diggi_core::MMngr;
//!
//! let self_aid = Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0);
//! let runtime = RuntimeBuilder::new(self_aid, 4).build()?;
//! runtime.start();
//!
//! let mngr = MMngr::new(runtime.clone());
//! // From a thread bound via `Pool::bind_current_thread`:
//! // let handle = mngr.allocate(self_aid, 64, DeliveryMode::Cleartext)?;
//! // mngr.send(handle)?;
//!
//! runtime.stop();
//! # Ok::<(), diggi_core::error::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                          Runtime                            |
//! |  (RoutingTable, SharedPool, one Amm/Smm pair per thread)     |
//! +-------------------------------------------------------------+
//!        |                 |                 |
//!        v                 v                 v
//! +-----------+     +-----------+     +-----------+
//! | thread 0  |     | thread 1  |     | thread N  |
//! |  Smm      |     |  Smm      |     |  Smm      |   secure layer:
//! |  (AEAD,   |     |  (AEAD,   |     |  (AEAD,   |   handshake, order,
//! |  order,   |     |  order,   |     |  order,   |   TPLog record
//! |  TPLog)   |     |  TPLog)   |     |  TPLog)   |
//! |   |       |     |   |       |     |   |       |
//! |   v       |     |   v       |     |   v       |
//! |  Amm      |     |  Amm      |     |  Amm      |   async dispatch:
//! |  (ring,   |     |  (ring,   |     |  (ring,   |   routing, idle
//! |  routing) |     |  routing) |     |  routing) |   back-off
//! +-----------+     +-----------+     +-----------+
//!        \                 |                 /
//!         \________________|________________/
//!                          v
//!                   GlobalPool (Ring)
//!                   Mbuf / Zcstr payloads
//! ```
//!
//! `MMngr` sits above the per-thread pairs as a thread-routed façade;
//! `Replay` and `TpLog` sit beside `Smm` as the record/replay path;
//! `SignalHandler` and `Pool` (the cooperative scheduler) tie the whole
//! thing to an orderly, in-band shutdown.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ring::Ring`] | Lock-free MPMC ring buffer of opaque `usize` slots |
//! | [`mbuf::Mbuf`] / [`mbuf::zcstr::Zcstr`] | Zero-copy, ref-counted virtual buffer and view |
//! | [`pool::GlobalPool`] | Pre-allocated, ring-backed pool of `Msg` slots |
//! | [`engine::Amm`] | Per-thread async dispatcher |
//! | [`security::Smm`] | Per-thread secure message layer (AEAD, handshake, ordering) |
//! | [`MMngr`] | Thread-routed façade over every thread's `Smm` |
//! | [`replay::Replay`] | Deterministic record/replay manager |
//! | [`tplog::TpLogWriter`] / [`tplog::TpLogReader`] | Tamper-proof append-only log |
//! | [`thread_pool::Pool`] | Cooperative per-thread task scheduler |
//! | [`Runtime`] / [`RuntimeBuilder`] | Process-wide handle tying every module together |
//! | [`SignalHandler`] | In-band, self-addressed shutdown request |

pub mod aid;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mbuf;
pub mod mmngr;
pub mod msg;
pub mod pool;
pub mod replay;
pub mod ring;
pub mod runtime;
pub mod security;
pub mod signal;
pub mod thread_pool;
pub mod tplog;

pub use aid::Aid;
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use mmngr::MMngr;
pub use msg::Msg;
pub use runtime::{Runtime, RuntimeBuilder};
pub use signal::SignalHandler;
