//! Struct and implementation of the Peer entry in the leaf set and routing table
use std::{
    fmt::{self, Debug, Formatter},
    net::SocketAddrV4,
};

use crate::common::{Id, IdSpace};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
/// Peer entry in the leaf set and the routing table.
///
/// The identity of a peer is its [Id], its address is fixed for the peer's lifetime.
pub struct Peer {
    pub id: Id,
    pub address: SocketAddrV4,
}

impl Peer {
    /// Creates a new Peer from an id and socket address.
    pub fn new(id: Id, address: SocketAddrV4) -> Peer {
        Peer { id, address }
    }

    /// Creates a new Peer deriving its Id from its address.
    pub fn from_address(space: &IdSpace, address: SocketAddrV4) -> Peer {
        Peer {
            id: space.id_from_address(address),
            address,
        }
    }

    #[cfg(test)]
    /// Peer with a given id on an arbitrary local address, useful for tests.
    pub fn with_id(id: u64) -> Peer {
        Peer {
            id: Id(id),
            address: SocketAddrV4::new([127, 0, 0, 1].into(), 1024 + (id % 60000) as u16),
        }
    }
}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({}@{})", self.id, self.address)
    }
}
