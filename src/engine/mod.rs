// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Asynchronous dispatch engine: the per-thread [`amm::Amm`] and the
//! shared [`routing::RoutingTable`] it routes through (§4.3).

pub mod amm;
pub mod routing;

pub use amm::{Amm, FlowCallback, ForwardFn, TypeHandler};
pub use routing::RoutingTable;
