use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};

use crate::common::{IdSpace, DEFAULT_LEAF_SET_SIZE};

use super::{DEFAULT_MAINTENANCE_INTERVAL, DEFAULT_MAX_VALUE_SIZE, DEFAULT_REQUEST_TIMEOUT};

#[derive(Debug, Clone)]
/// Pastry node configurations
pub struct Config {
    /// Ipv4 address to bind to and to derive this node's [crate::Id] from.
    ///
    /// Defaults to `127.0.0.1`
    pub address: Ipv4Addr,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where [super::DEFAULT_PORT] is tried first, then any free port.
    pub port: Option<u16>,
    /// Address of any node already in the ring to join through.
    ///
    /// Defaults to None, where this node starts a new ring.
    pub bootstrap: Option<SocketAddrV4>,
    /// Timeout of a single request to the next hop.
    ///
    /// A peer that doesn't respond within this duration is considered failed,
    /// removed from the routing state, and the message is routed around it.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Width of Ids and digits.
    ///
    /// Defaults to 16 bit Ids with 4 bit digits. Every node of a ring must use the same space.
    pub id_space: IdSpace,
    /// Total number of peers in the leaf set (`L`), half on each side.
    ///
    /// Defaults to [DEFAULT_LEAF_SET_SIZE]
    pub leaf_set_size: usize,
    /// How often to probe the leaf set for failed peers.
    ///
    /// Defaults to [DEFAULT_MAINTENANCE_INTERVAL]
    pub maintenance_interval: Duration,
    /// Largest value accepted in a PUT, in bytes.
    ///
    /// Defaults to [DEFAULT_MAX_VALUE_SIZE] to keep every request within a single datagram.
    pub max_value_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            port: None,
            bootstrap: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            id_space: IdSpace::default(),
            leaf_set_size: DEFAULT_LEAF_SET_SIZE,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

