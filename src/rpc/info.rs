use std::net::SocketAddrV4;

use crate::Id;

use super::Rpc;

/// Information and statistics about this Pastry node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    local_addr: SocketAddrV4,
    leaf_set_size: usize,
    routing_table_size: usize,
    stored_keys: usize,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }
    /// Local Ipv4 socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }
    /// Number of peers currently in the leaf set.
    pub fn leaf_set_size(&self) -> usize {
        self.leaf_set_size
    }
    /// Number of occupied routing table slots.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }
    /// Number of keys this node stores as their owner.
    pub fn stored_keys(&self) -> usize {
        self.stored_keys
    }
}

impl From<&Rpc> for Info {
    fn from(rpc: &Rpc) -> Self {
        let (leaf_set_size, routing_table_size) = rpc.routing_state_sizes();

        Self {
            id: *rpc.id(),
            local_addr: rpc.local_addr(),
            leaf_set_size,
            routing_table_size,
            stored_keys: rpc.stored_keys(),
        }
    }
}
