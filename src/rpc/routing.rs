//! Routing decisions over the leaf set and the routing table.

use std::collections::HashSet;

use crate::common::{Id, IdSpace, LeafSet, Peer, RoutingTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which part of the routing state chose the next hop.
pub enum Via {
    LeafSet,
    RoutingTable,
    FallbackScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a routing decision for a target.
pub enum Route {
    /// This node is the closest it knows of, the message is delivered here.
    Arrived,
    /// Forward to a peer strictly closer to the target.
    Forward(Peer, Via),
}

#[derive(Debug, Clone)]
/// Leaf set and routing table of a node, updated together.
pub struct RoutingState {
    space: IdSpace,
    leaf_set: LeafSet,
    routing_table: RoutingTable,
}

impl RoutingState {
    pub fn new(id: Id, space: IdSpace, leaf_set_size: usize) -> Self {
        Self {
            space,
            leaf_set: LeafSet::new(id, space, leaf_set_size),
            routing_table: RoutingTable::new(id, space),
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        self.leaf_set.id()
    }

    pub fn space(&self) -> &IdSpace {
        &self.space
    }

    pub fn leaf_set(&self) -> &LeafSet {
        &self.leaf_set
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    // === Public Methods ===

    /// Offer a peer to both the leaf set and the routing table.
    ///
    /// Returns `true` if either of them changed. Ids outside of the space are ignored.
    pub fn consider(&mut self, peer: Peer) -> bool {
        if !self.space.contains(&peer.id) {
            return false;
        }

        let in_leaf_set = self.leaf_set.consider(peer);
        let in_routing_table = self.routing_table.consider(peer);

        in_leaf_set || in_routing_table
    }

    /// Evict a peer from both structures, returns `true` if it was known.
    pub fn remove(&mut self, id: &Id) -> bool {
        let in_leaf_set = self.leaf_set.remove(id);
        let in_routing_table = self.routing_table.remove(id);

        in_leaf_set || in_routing_table
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.leaf_set.contains(id) || self.routing_table.contains(id)
    }

    pub fn is_responsible_for(&self, target: &Id) -> bool {
        self.leaf_set.is_responsible_for(target)
    }

    /// Decide where a message for `target` goes next.
    ///
    /// Every [Route::Forward] is strictly closer to the target than this node.
    pub fn next_hop(&self, target: &Id) -> Route {
        if self.leaf_set.is_responsible_for(target) {
            return Route::Arrived;
        }

        if let Some(peer) = self.leaf_set.closest_known_to(target) {
            if self.is_closer_than_self(&peer, target) {
                return Route::Forward(peer, Via::LeafSet);
            }
        }

        if let Some(peer) = self.routing_table.lookup(target) {
            if self.is_closer_than_self(&peer, target) {
                return Route::Forward(peer, Via::RoutingTable);
            }
        }

        self.fallback_scan(target)
    }

    /// Forward to the closest of all known peers, if it is closer than this node.
    pub fn fallback_scan(&self, target: &Id) -> Route {
        let closest = self
            .leaf_set
            .peers()
            .chain(self.routing_table.peers())
            .fold(None, |closest: Option<&Peer>, peer| match closest {
                Some(current) if !self.space.is_closer(&peer.id, &current.id, target) => {
                    Some(current)
                }
                _ => Some(peer),
            });

        match closest {
            Some(peer) if self.is_closer_than_self(peer, target) => {
                Route::Forward(*peer, Via::FallbackScan)
            }
            _ => Route::Arrived,
        }
    }

    /// The routing table row a joining node with this Id should learn from this node.
    pub fn join_row(&self, joiner: &Id) -> Vec<Peer> {
        self.routing_table
            .row(self.space.shared_prefix_len(self.id(), joiner))
    }

    /// Every known peer, once.
    pub fn known_peers(&self) -> Vec<Peer> {
        let mut seen = HashSet::new();

        self.leaf_set
            .peers()
            .chain(self.routing_table.peers())
            .filter(|peer| seen.insert(peer.id))
            .copied()
            .collect()
    }

    // === Private Methods ===

    fn is_closer_than_self(&self, peer: &Peer, target: &Id) -> bool {
        self.space.is_closer(&peer.id, self.id(), target)
    }
}
