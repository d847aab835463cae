//! Pastry node listening on a UDP socket.

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, info};

use crate::{
    common::{
        messages::PEER_SIZE, GetResponseArguments, Id, IdSpace, LeafSet, MessageType, Peer,
        RoutingTable,
    },
    rpc::{
        Config, Info, JoinError, KrpcSocket, RequestError, Rpc, MAX_THREAD_BLOCK_DURATION, MTU,
    },
};

#[derive(Debug, Clone)]
/// Pastry node.
///
/// Cheap to clone, the node shuts down when [Node::shutdown] is called or the last
/// clone is dropped.
pub struct Node(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    rpc: Arc<Rpc>,
    shutdown: Arc<AtomicBool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Default, Clone)]
/// A builder for [Node].
pub struct NodeBuilder(Config);

impl NodeBuilder {
    /// Ipv4 address to bind to, see [Config::address].
    pub fn address(mut self, address: Ipv4Addr) -> Self {
        self.0.address = address;

        self
    }

    /// Explicit port to listen on, `0` for any free port.
    pub fn port(mut self, port: u16) -> Self {
        self.0.port = Some(port);

        self
    }

    /// Join an existing ring through the node at this address.
    pub fn bootstrap(mut self, bootstrap: SocketAddrV4) -> Self {
        self.0.bootstrap = Some(bootstrap);

        self
    }

    /// Set [Config::request_timeout]
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.0.request_timeout = request_timeout;

        self
    }

    /// Set [Config::id_space]
    pub fn id_space(mut self, id_space: IdSpace) -> Self {
        self.0.id_space = id_space;

        self
    }

    /// Set [Config::leaf_set_size]
    pub fn leaf_set_size(mut self, leaf_set_size: usize) -> Self {
        self.0.leaf_set_size = leaf_set_size;

        self
    }

    /// Set [Config::maintenance_interval]
    pub fn maintenance_interval(mut self, maintenance_interval: Duration) -> Self {
        self.0.maintenance_interval = maintenance_interval;

        self
    }

    /// Set [Config::max_value_size]
    pub fn max_value_size(mut self, max_value_size: usize) -> Self {
        self.0.max_value_size = max_value_size;

        self
    }

    /// Create a node, and join the ring of the [Self::bootstrap] node if set.
    pub fn build(self) -> Result<Node, BuildError> {
        Node::new(self.0)
    }
}

impl Node {
    /// Create a new node with default configurations, starting a new ring.
    pub fn client() -> Result<Self, BuildError> {
        Node::builder().build()
    }

    /// Returns a builder to edit settings before creating a Node.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    /// Create a new node, listen on its socket, and join the ring of
    /// [Config::bootstrap] if set.
    pub fn new(config: Config) -> Result<Self, BuildError> {
        if config.leaf_set_size < 2 {
            return Err(BuildError::InvalidConfig(
                "leaf_set_size must hold at least one peer on each side",
            ));
        }
        if config.request_timeout.is_zero() {
            return Err(BuildError::InvalidConfig("request_timeout must not be zero"));
        }
        if largest_join_response(&config) > MTU {
            return Err(BuildError::InvalidConfig(
                "id_space and leaf_set_size allow JOIN responses larger than a datagram",
            ));
        }

        let socket = Arc::new(KrpcSocket::new(&config)?);
        let peer = Peer::from_address(&config.id_space, socket.local_addr());

        let bootstrap = config.bootstrap;
        let rpc = Arc::new(Rpc::new(peer, config, socket.clone()));
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let rpc = rpc.clone();
            let shutdown = shutdown.clone();

            thread::Builder::new()
                .name("Pastry listener".to_string())
                .spawn(move || run_listener(rpc, socket, shutdown))?;
        }

        {
            let rpc = rpc.clone();
            let shutdown = shutdown.clone();

            thread::Builder::new()
                .name("Pastry maintenance".to_string())
                .spawn(move || run_maintenance(rpc, shutdown))?;
        }

        info!(id = %peer.id, address = %peer.address, "Pastry node listening");

        let node = Node(Arc::new(Inner { rpc, shutdown }));

        if let Some(bootstrap) = bootstrap {
            node.0.rpc.join(bootstrap)?;
        }

        Ok(node)
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.0.rpc.id()
    }

    /// This node's Id and address.
    pub fn peer(&self) -> Peer {
        self.0.rpc.peer()
    }

    /// Local UDP Ipv4 socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.0.rpc.local_addr()
    }

    /// Information and statistics about this node.
    pub fn info(&self) -> Info {
        self.0.rpc.info()
    }

    /// Snapshot of the current leaf set.
    pub fn leaf_set(&self) -> LeafSet {
        self.0.rpc.leaf_set()
    }

    /// Snapshot of the current routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.0.rpc.routing_table()
    }

    /// The [Rpc] this node runs, for lower level access.
    pub fn rpc(&self) -> &Rpc {
        &self.0.rpc
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.load(Ordering::Relaxed)
    }

    // === Public Methods ===

    /// Stop the listener and maintenance threads of this node and all its clones.
    pub fn shutdown(&self) {
        self.0.shutdown.store(true, Ordering::Relaxed);
    }

    /// Join (again) the ring of the node at `bootstrap`.
    pub fn join(&self, bootstrap: SocketAddrV4) -> Result<(), JoinError> {
        if self.is_shutdown() {
            return Err(JoinError::Shutdown);
        }

        self.0.rpc.join(bootstrap)
    }

    /// Store `value` at the node responsible for the hash of `key`, returns that node.
    pub fn put(&self, key: &[u8], value: impl Into<Bytes>) -> Result<Peer, RequestError> {
        if self.is_shutdown() {
            return Err(RequestError::Shutdown);
        }

        self.0.rpc.put(key, value.into())
    }

    /// Store `value` at the node responsible for `target`, returns that node.
    pub fn put_target(&self, target: Id, value: impl Into<Bytes>) -> Result<Peer, RequestError> {
        if self.is_shutdown() {
            return Err(RequestError::Shutdown);
        }

        self.0.rpc.put_target(target, value.into())
    }

    /// Look up the value stored for the hash of `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, RequestError> {
        if self.is_shutdown() {
            return Err(RequestError::Shutdown);
        }

        self.0.rpc.get(key)
    }

    /// Look up the value stored for `target`, along with the node responsible for it.
    pub fn get_target(&self, target: Id) -> Result<GetResponseArguments, RequestError> {
        if self.is_shutdown() {
            return Err(RequestError::Shutdown);
        }

        self.0.rpc.get_target(target)
    }
}

/// Upper bound of an encoded JOIN response, with a full routing table row from every hop
/// of a route as long as the number of digits, plus the final hop's leaf set.
fn largest_join_response(config: &Config) -> usize {
    // Dictionary keys, transaction id, source, and length prefixes.
    const OVERHEAD: usize = 128;

    let space = &config.id_space;
    let hops = space.digits() + 1;
    let peers = hops * space.radix() + config.leaf_set_size;

    OVERHEAD + hops * 5 + peers * PEER_SIZE
}

fn run_listener(rpc: Arc<Rpc>, socket: Arc<KrpcSocket>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        let Some((message, from)) = socket.recv_from() else {
            continue;
        };

        let transaction_id = message.transaction_id;
        let source = message.source;

        let MessageType::Request(request) = message.message_type else {
            continue;
        };

        let rpc = rpc.clone();
        let socket = socket.clone();

        // Forwarding blocks until the next hop responds.
        thread::spawn(move || {
            if let Some(reply) = rpc.handle_request(source, request) {
                socket.response(from, transaction_id, rpc.peer(), reply);
            }
        });
    }

    debug!(id = %rpc.id(), "Pastry listener stopped");
}

fn run_maintenance(rpc: Arc<Rpc>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(MAX_THREAD_BLOCK_DURATION);

        rpc.maintain();
    }
}

#[derive(thiserror::Error, Debug)]
/// Failed to create a [Node].
pub enum BuildError {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Join(#[from] JoinError),
}

/// Create a testnet of Pastry nodes on localhost, to run tests against.
#[derive(Debug)]
pub struct Testnet {
    /// Address of the first node, every other node joined through it.
    pub bootstrap: SocketAddrV4,
    pub nodes: Vec<Node>,
}

impl Testnet {
    /// Create `count` nodes on ephemeral ports, joined one after the other.
    pub fn new(count: usize) -> Result<Testnet, BuildError> {
        Self::with_config(count, Config::default())
    }

    /// Same as [Self::new], every node is created with `config` and an ephemeral port.
    pub fn with_config(count: usize, config: Config) -> Result<Testnet, BuildError> {
        let mut nodes: Vec<Node> = vec![];
        let mut bootstrap = None;

        for _ in 0..count {
            let node = Node::new(Config {
                port: Some(0),
                bootstrap,
                ..config.clone()
            })?;

            bootstrap.get_or_insert(node.local_addr());
            nodes.push(node);
        }

        Ok(Testnet {
            bootstrap: bootstrap.ok_or(BuildError::InvalidConfig("testnet without nodes"))?,
            nodes,
        })
    }
}
