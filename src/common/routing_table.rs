//! Pastry prefix routing table

use std::fmt::{self, Debug, Formatter};

use crate::common::{Id, IdSpace, Peer};

#[derive(Clone)]
/// Prefix indexed routing table.
///
/// A fixed `digits × radix` array: row `r` holds peers sharing exactly `r` leading
/// digits with the local Id, in the column of their digit `r`.
pub struct RoutingTable {
    id: Id,
    space: IdSpace,
    slots: Vec<Option<Peer>>,
}

impl RoutingTable {
    /// Create a new empty [RoutingTable] for the given local id.
    pub fn new(id: Id, space: IdSpace) -> Self {
        RoutingTable {
            id,
            space,
            slots: vec![None; space.digits() * space.radix()],
        }
    }

    /// Returns the [Id] of this node, where prefixes are measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Number of rows, one per digit of an Id.
    pub fn rows(&self) -> usize {
        self.space.digits()
    }

    /// Number of columns, one per possible value of a digit.
    pub fn columns(&self) -> usize {
        self.space.radix()
    }

    // === Public Methods ===

    /// Attempts to add a peer to its slot, and returns `true` if it did.
    ///
    /// Occupied slots are kept, any known peer is preferred over an empty slot.
    pub fn consider(&mut self, peer: Peer) -> bool {
        let Some(index) = self.slot_index(&peer.id) else {
            // Do not add self to the routing_table
            return false;
        };

        if self.slots[index].is_some() {
            return false;
        }

        self.slots[index] = Some(peer);

        true
    }

    /// Remove a peer from this routing table, returns `true` if it was there.
    pub fn remove(&mut self, id: &Id) -> bool {
        if let Some(index) = self.slot_index(id) {
            if self.slots[index].is_some_and(|peer| peer.id == *id) {
                self.slots[index] = None;
                return true;
            }
        }

        false
    }

    /// The peer sharing one more digit with `target` than the local node does, if known.
    pub fn lookup(&self, target: &Id) -> Option<Peer> {
        self.slot_index(target).and_then(|index| self.slots[index])
    }

    /// Peer at a given row and column.
    pub fn get(&self, row: usize, column: usize) -> Option<Peer> {
        if row >= self.rows() || column >= self.columns() {
            return None;
        }

        self.slots[row * self.columns() + column]
    }

    /// All known peers in a given row.
    pub fn row(&self, row: usize) -> Vec<Peer> {
        if row >= self.rows() {
            return vec![];
        }

        let start = row * self.columns();

        self.slots[start..start + self.columns()]
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    /// Returns true if a peer with this Id is in its slot.
    pub fn contains(&self, id: &Id) -> bool {
        self.slot_index(id)
            .is_some_and(|index| self.slots[index].is_some_and(|peer| peer.id == *id))
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Return the number of peers in this routing table.
    pub fn size(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Returns an iterator over the peers in this routing table, row by row.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.slots.iter().flatten()
    }

    /// Export an owned vector of peers from this routing table.
    pub fn to_owned_peers(&self) -> Vec<Peer> {
        self.peers().copied().collect()
    }

    // === Private Methods ===

    /// Index of the slot an Id belongs to, or `None` for the local Id.
    fn slot_index(&self, id: &Id) -> Option<usize> {
        let row = self.space.shared_prefix_len(&self.id, id);

        if row >= self.rows() {
            return None;
        }

        Some(row * self.columns() + self.space.digit(id, row))
    }
}

impl Debug for RoutingTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "RoutingTable({}) {{", self.id)?;
        for row in 0..self.rows() {
            let peers = self.row(row);
            if !peers.is_empty() {
                writeln!(f, "  {row}: {peers:?}")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_is_empty() {
        let space = IdSpace::default();
        let mut table = RoutingTable::new(Id(0xa3f1), space);
        assert!(table.is_empty());

        table.consider(Peer::with_id(0x1234));
        assert!(!table.is_empty());
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn places_by_prefix_and_next_digit() {
        let space = IdSpace::default();
        let mut table = RoutingTable::new(Id(0xa3f1), space);

        assert!(table.consider(Peer::with_id(0x1234)));
        assert!(table.consider(Peer::with_id(0xa7aa)));
        assert!(table.consider(Peer::with_id(0xa3f5)));

        assert_eq!(table.get(0, 0x1).map(|p| p.id), Some(Id(0x1234)));
        assert_eq!(table.get(1, 0x7).map(|p| p.id), Some(Id(0xa7aa)));
        assert_eq!(table.get(3, 0x5).map(|p| p.id), Some(Id(0xa3f5)));
        assert!(table.row(2).is_empty());
    }

    #[test]
    fn should_not_add_self() {
        let mut table = RoutingTable::new(Id(0xa3f1), IdSpace::default());

        assert!(!table.consider(Peer::with_id(0xa3f1)));
        assert!(table.is_empty());
    }

    #[test]
    fn keeps_occupied_slots() {
        let mut table = RoutingTable::new(Id(0xa3f1), IdSpace::default());

        assert!(table.consider(Peer::with_id(0x1234)));
        assert!(!table.consider(Peer::with_id(0x1999)));
        assert!(!table.consider(Peer::with_id(0x1234)));

        assert_eq!(table.lookup(&Id(0x1fff)).map(|p| p.id), Some(Id(0x1234)));
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn lookup() {
        let mut table = RoutingTable::new(Id(0xa3f1), IdSpace::default());

        table.consider(Peer::with_id(0xa7aa));

        assert_eq!(table.lookup(&Id(0xa700)).map(|p| p.id), Some(Id(0xa7aa)));
        assert_eq!(table.lookup(&Id(0xa800)), None);
        assert_eq!(table.lookup(&Id(0xa3f1)), None);
    }

    #[test]
    fn remove() {
        let mut table = RoutingTable::new(Id(0xa3f1), IdSpace::default());
        let peer = Peer::with_id(0x1234);

        table.consider(peer);
        assert!(table.contains(&peer.id));

        assert!(!table.remove(&Id(0x1999)));
        assert!(table.remove(&peer.id));
        assert!(!table.contains(&peer.id));
        assert!(table.is_empty());
    }

    #[test]
    fn placement_always_matches_shared_prefix() {
        for (bits, digit_bits) in [(16, 4), (8, 2), (12, 3), (32, 8)] {
            let space = IdSpace::new(bits, digit_bits).unwrap();
            let local = Id::random(&space);
            let mut table = RoutingTable::new(local, space);

            for _ in 0..1000 {
                table.consider(Peer::with_id(Id::random(&space).0));
            }

            for row in 0..table.rows() {
                for column in 0..table.columns() {
                    if let Some(peer) = table.get(row, column) {
                        assert_ne!(peer.id, local);
                        assert_eq!(space.shared_prefix_len(&local, &peer.id), row);
                        assert_eq!(space.digit(&peer.id, row), column);
                    }
                }
            }
        }
    }
}
