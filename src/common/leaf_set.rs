//! Pastry leaf set: the numerically closest peers on both sides of the local Id.

use crate::common::{Id, IdSpace, Peer};

/// Default total number of peers in the leaf set (`L`), half of them on each side.
pub const DEFAULT_LEAF_SET_SIZE: usize = 8;

#[derive(Debug, Clone)]
/// The `L/2` closest known peers clockwise and counter-clockwise of the local Id.
///
/// Both halves are sorted by ring distance from the local Id, closest first.
pub struct LeafSet {
    id: Id,
    space: IdSpace,
    half_size: usize,
    clockwise: Vec<Peer>,
    counter_clockwise: Vec<Peer>,
}

impl LeafSet {
    /// Create an empty leaf set holding up to `size / 2` peers on each side (at least one).
    pub fn new(id: Id, space: IdSpace, size: usize) -> Self {
        let half_size = (size / 2).max(1);

        LeafSet {
            id,
            space,
            half_size,
            clockwise: Vec::with_capacity(half_size + 1),
            counter_clockwise: Vec::with_capacity(half_size + 1),
        }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where distances are measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Maximum number of peers on each side.
    pub fn half_size(&self) -> usize {
        self.half_size
    }

    /// Peers with larger Ids (going clockwise), closest first.
    pub fn clockwise(&self) -> &[Peer] {
        &self.clockwise
    }

    /// Peers with smaller Ids (going counter-clockwise), closest first.
    pub fn counter_clockwise(&self) -> &[Peer] {
        &self.counter_clockwise
    }

    // === Public Methods ===

    /// Attempts to add a peer to its side of the leaf set, and returns `true` if it did.
    ///
    /// When the side is full, the farthest peer is evicted if the new one is closer.
    pub fn consider(&mut self, peer: Peer) -> bool {
        if peer.id == self.id || self.contains(&peer.id) {
            return false;
        }

        let id = self.id;
        let space = self.space;
        let half_size = self.half_size;

        let side = if space.is_clockwise(&id, &peer.id) {
            &mut self.clockwise
        } else {
            &mut self.counter_clockwise
        };

        let index = side
            .iter()
            .position(|existing| space.is_closer(&peer.id, &existing.id, &id))
            .unwrap_or(side.len());

        if index >= half_size {
            return false;
        }

        side.insert(index, peer);
        side.truncate(half_size);

        true
    }

    /// Remove a peer from the leaf set, returns `true` if it was there.
    pub fn remove(&mut self, id: &Id) -> bool {
        let before = self.len();

        self.clockwise.retain(|peer| peer.id != *id);
        self.counter_clockwise.retain(|peer| peer.id != *id);

        self.len() != before
    }

    /// Returns true if the local node is the closest to `key` among itself and its leaf set.
    pub fn is_responsible_for(&self, key: &Id) -> bool {
        self.peers()
            .all(|peer| !self.space.is_closer(&peer.id, &self.id, key))
    }

    /// The closest leaf to `key`, or `None` if `key` is outside of the range covered by
    /// the leaf set.
    ///
    /// The range spans from the farthest counter-clockwise peer to the farthest clockwise
    /// peer, passing through the local Id.
    pub fn closest_known_to(&self, key: &Id) -> Option<Peer> {
        if !self.in_range(key) {
            return None;
        }

        self.peers().fold(None, |closest: Option<Peer>, peer| match closest {
            Some(current) if !self.space.is_closer(&peer.id, &current.id, key) => Some(current),
            _ => Some(*peer),
        })
    }

    /// Returns true if `key` falls within the range covered by the leaf set.
    pub fn in_range(&self, key: &Id) -> bool {
        if self.is_empty() {
            return false;
        }

        let clockwise_extent = self
            .clockwise
            .last()
            .map(|peer| self.space.clockwise_offset(&self.id, &peer.id))
            .unwrap_or(0);
        let counter_clockwise_extent = self
            .counter_clockwise
            .last()
            .map(|peer| self.space.clockwise_offset(&peer.id, &self.id))
            .unwrap_or(0);

        self.space.clockwise_offset(&self.id, key) <= clockwise_extent
            || self.space.clockwise_offset(key, &self.id) <= counter_clockwise_extent
    }

    /// Returns true if a peer with this Id is in either half.
    pub fn contains(&self, id: &Id) -> bool {
        self.peers().any(|peer| peer.id == *id)
    }

    /// Returns an iterator over the peers of both halves, counter-clockwise half first.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.counter_clockwise.iter().chain(self.clockwise.iter())
    }

    /// Export an owned vector of the leaf set peers.
    pub fn to_owned_peers(&self) -> Vec<Peer> {
        self.peers().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clockwise.len() + self.counter_clockwise.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clockwise.is_empty() && self.counter_clockwise.is_empty()
    }
}
