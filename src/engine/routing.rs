// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outbound routing table (§3, §4.3): `Aid (thread=0) -> Ring` for direct
//! delivery to co-located peers, with a fallback gateway ring for any
//! `Aid` not present (off-host / not-yet-registered peers).

use crate::aid::Aid;
use crate::ring::Ring;
use dashmap::DashMap;
use std::sync::Arc;

pub struct RoutingTable {
    direct: DashMap<Aid, Arc<Ring>>,
    gateway: Arc<Ring>,
}

impl RoutingTable {
    pub fn new(gateway: Arc<Ring>) -> Self {
        Self {
            direct: DashMap::new(),
            gateway,
        }
    }

    /// Register `aid`'s instance-level key (thread byte cleared) as the
    /// ring to deliver into for any message addressed to that instance.
    pub fn register(&self, aid: Aid, ring: Arc<Ring>) {
        self.direct.insert(aid.instance_key(), ring);
    }

    pub fn unregister(&self, aid: Aid) {
        self.direct.remove(&aid.instance_key());
    }

    /// The ring to push a message addressed to `dest` into, and whether it
    /// was a direct hit (`true`) or the gateway fallback (`false`).
    pub fn resolve(&self, dest: Aid) -> (Arc<Ring>, bool) {
        match self.direct.get(&dest.instance_key()) {
            Some(entry) => (entry.value().clone(), true),
            None => (self.gateway.clone(), false),
        }
    }

    pub fn gateway(&self) -> Arc<Ring> {
        self.gateway.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::InstanceType;

    fn ring() -> Arc<Ring> {
        Arc::new(Ring::new(16, 1, 1))
    }

    #[test]
    fn registered_peer_resolves_directly() {
        let table = RoutingTable::new(ring());
        let peer = Aid::new(1, 0, 0, 0, 0, 0, InstanceType::Lib, 0);
        let peer_ring = ring();
        table.register(peer, peer_ring.clone());

        let (resolved, direct) = table.resolve(peer.with_thread(3));
        assert!(direct);
        assert!(Arc::ptr_eq(&resolved, &peer_ring));
    }

    #[test]
    fn unknown_peer_falls_back_to_gateway() {
        let gw = ring();
        let table = RoutingTable::new(gw.clone());
        let unknown = Aid::new(9, 0, 0, 0, 0, 0, InstanceType::Proc, 0);
        let (resolved, direct) = table.resolve(unknown);
        assert!(!direct);
        assert!(Arc::ptr_eq(&resolved, &gw));
    }

    #[test]
    fn unregister_falls_back_to_gateway() {
        let gw = ring();
        let table = RoutingTable::new(gw.clone());
        let peer = Aid::new(2, 0, 0, 0, 0, 0, InstanceType::Lib, 0);
        table.register(peer, ring());
        table.unregister(peer);
        let (_, direct) = table.resolve(peer);
        assert!(!direct);
    }
}
