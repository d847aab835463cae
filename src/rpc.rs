//! Pastry node logic: routing, joining, storage and maintenance over a [Transport].

mod config;
mod info;
mod maintenance;
mod memory;
mod routing;
mod socket;
mod store;
mod transport;

use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::common::{
    ErrorSpecific, GetResponseArguments, Id, IdSpace, JoinHop, JoinResponseArguments, LeafSet,
    MessageType, Peer, PutRequestArguments, PutResponseArguments, RequestSpecific,
    RequestTypeSpecific, ResponseSpecific, RouteUpdateResponseArguments, RoutingTable,
};

pub use crate::common::messages;
pub use config::Config;
pub use info::Info;
pub use maintenance::{
    MaintenanceDecisions, RoutingMaintenance, DEFAULT_MAINTENANCE_INTERVAL,
    REFRESH_TABLE_INTERVAL,
};
pub use memory::LocalNetwork;
pub use routing::{Route, RoutingState, Via};
pub use socket::{
    KrpcSocket, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT, MAX_THREAD_BLOCK_DURATION, MTU,
};
pub use store::{Store, DEFAULT_MAX_VALUE_SIZE};
pub use transport::{Transport, TransportError};

/// Maximum number of next hops tried for a single message before giving up.
pub const MAX_FORWARD_ATTEMPTS: usize = 3;
/// Time kept from the budget of a forwarded request to send the response back.
///
/// A node forwarding a request waits for the next hop at most the sender's timeout
/// minus this margin, so it answers before its sender gives up on it.
pub const FORWARD_MARGIN: Duration = Duration::from_millis(50);

#[derive(Debug)]
/// A single Pastry node's state and protocol logic.
///
/// Inbound requests enter through [Rpc::handle_request], outbound round trips go through
/// the [Transport]. No lock is held across a round trip, so the same [Rpc] can serve many
/// requests concurrently.
pub struct Rpc {
    peer: Peer,
    config: Config,

    state: RwLock<RoutingState>,
    store: RwLock<Store>,
    maintenance: Mutex<RoutingMaintenance>,

    transport: Arc<dyn Transport>,
}

impl Rpc {
    /// Create a node identified by `peer`, sending requests through `transport`.
    ///
    /// Does not perform any network I/O, call [Rpc::join] to enter an existing ring.
    pub fn new(peer: Peer, config: Config, transport: Arc<dyn Transport>) -> Self {
        Rpc {
            peer,
            state: RwLock::new(RoutingState::new(
                peer.id,
                config.id_space,
                config.leaf_set_size,
            )),
            store: RwLock::new(Store::new()),
            maintenance: Mutex::new(RoutingMaintenance::new(config.maintenance_interval)),
            config,
            transport,
        }
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        &self.peer.id
    }

    /// This node as it appears in other nodes' routing state.
    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Returns the address this node is reachable at.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.peer.address
    }

    pub fn space(&self) -> &IdSpace {
        &self.config.id_space
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of the current leaf set.
    pub fn leaf_set(&self) -> LeafSet {
        self.read_state().leaf_set().clone()
    }

    /// Snapshot of the current routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.read_state().routing_table().clone()
    }

    /// Every peer currently in the leaf set or the routing table.
    pub fn known_peers(&self) -> Vec<Peer> {
        self.read_state().known_peers()
    }

    /// Returns true if this node is the closest to `target` among itself and its leaf set.
    pub fn is_responsible_for(&self, target: &Id) -> bool {
        self.read_state().is_responsible_for(target)
    }

    /// Returns the value this node stores locally for `target`, without routing.
    pub fn stored(&self, target: &Id) -> Option<Bytes> {
        self.read_store().get(target)
    }

    /// Returns a thread safe and lightweight summary of this node's
    /// information and statistics.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    pub(crate) fn routing_state_sizes(&self) -> (usize, usize) {
        let state = self.read_state();

        (state.leaf_set().len(), state.routing_table().size())
    }

    pub(crate) fn stored_keys(&self) -> usize {
        self.read_store().len()
    }

    // === Public Methods ===

    /// Learn about a peer from any message it sent or relayed.
    ///
    /// Every request handler calls this before its own logic, and every response received
    /// passes its responder through here.
    pub fn on_message_received(&self, source: &Peer) {
        if source.id == self.peer.id || !self.space().contains(&source.id) {
            return;
        }

        if self.write_state().consider(*source) {
            trace!(context = "routing_state", id = %self.peer.id, peer = ?source, "Learned peer");
        }
    }

    /// Handle an inbound request from `from`.
    ///
    /// Returns the response or error to send back, or `None` if the request is dropped.
    pub fn handle_request(&self, from: Peer, request: RequestSpecific) -> Option<MessageType> {
        if !self.space().contains(&from.id) || !self.space().contains(&request.target) {
            debug!(
                context = "request_validation",
                ?from,
                target = ?request.target,
                "Dropping request with Ids outside of the Id space"
            );
            return None;
        }

        let deadline = request
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));

        let is_joining = matches!(request.request_type, RequestTypeSpecific::Join)
            && from.id == request.target;

        // A joining node isn't a member until it announces itself.
        if !is_joining {
            self.on_message_received(&from);
        }

        let result = match &request.request_type {
            RequestTypeSpecific::Join => self.handle_join(request.target, deadline),
            RequestTypeSpecific::Put(PutRequestArguments { value }) => {
                if value.len() > self.config.max_value_size {
                    debug!(
                        context = "request_validation",
                        ?from,
                        size = value.len(),
                        "Message (v field) too big."
                    );

                    return Some(MessageType::Error(ErrorSpecific {
                        code: 205,
                        description: "Message (v field) too big.".to_string(),
                    }));
                }

                self.route(&request, deadline)
            }
            RequestTypeSpecific::Get => self.route(&request, deadline),
            RequestTypeSpecific::RouteUpdate => Ok(self.deliver(&request)),
        };

        Some(match result {
            Ok(response) => MessageType::Response(response),
            Err(RequestError::Remote(error)) => MessageType::Error(error),
            Err(error @ RequestError::UnexpectedResponse) => MessageType::Error(ErrorSpecific {
                code: 203,
                description: error.to_string(),
            }),
            Err(error) => MessageType::Error(ErrorSpecific {
                code: 201,
                description: error.to_string(),
            }),
        })
    }

    /// Join the ring that the node at `bootstrap` belongs to.
    ///
    /// Sends a JOIN for this node's own Id through `bootstrap`, learns the routing state
    /// collected along the route, then announces itself to every peer it learned about.
    pub fn join(&self, bootstrap: SocketAddrV4) -> Result<(), JoinError> {
        let request = RequestSpecific {
            target: self.peer.id,
            request_type: RequestTypeSpecific::Join,
            timeout: Some(self.config.request_timeout),
        };

        let (responder, response) = self
            .transport
            .request(bootstrap, &self.peer, request, self.config.request_timeout)
            .map_err(|error| match error {
                TransportError::Remote(error) => JoinError::Rejected(error),
                error => {
                    warn!(context = "join", ?bootstrap, ?error, "Bootstrap node unreachable");
                    JoinError::BootstrapUnreachable(bootstrap)
                }
            })?;

        let ResponseSpecific::Join(JoinResponseArguments { hops, leaf_set }) = response else {
            return Err(JoinError::UnexpectedResponse);
        };

        self.on_message_received(&responder);

        {
            let mut state = self.write_state();

            for hop in hops {
                state.consider(hop.peer);

                for peer in hop.row {
                    state.consider(peer);
                }
            }

            for peer in leaf_set {
                state.consider(peer);
            }
        }

        let announced = self.announce();

        info!(
            context = "join",
            id = %self.peer.id,
            ?bootstrap,
            announced,
            "Joined"
        );

        Ok(())
    }

    /// Send a ROUTE_UPDATE to every known peer, including those learned from their responses.
    ///
    /// Returns the number of peers that acknowledged.
    pub fn announce(&self) -> usize {
        let mut announced = HashSet::new();
        let mut acknowledged = 0;

        loop {
            let pending: Vec<Peer> = self
                .known_peers()
                .into_iter()
                .filter(|peer| !announced.contains(&peer.id))
                .collect();

            if pending.is_empty() {
                break;
            }

            for peer in pending {
                announced.insert(peer.id);

                if self.route_update(&peer) {
                    acknowledged += 1;
                }
            }
        }

        debug!(context = "announce", id = %self.peer.id, acknowledged, "Announced");

        acknowledged
    }

    /// Store `value` at the node responsible for the hash of `key`.
    ///
    /// Returns the owner that stored it.
    pub fn put(&self, key: &[u8], value: Bytes) -> Result<Peer, RequestError> {
        self.put_target(self.space().hash_key(key), value)
    }

    /// Store `value` at the node responsible for `target`.
    pub fn put_target(&self, target: Id, value: Bytes) -> Result<Peer, RequestError> {
        if value.len() > self.config.max_value_size {
            return Err(RequestError::ValueTooBig {
                size: value.len(),
                max: self.config.max_value_size,
            });
        }

        let request = RequestSpecific {
            target,
            request_type: RequestTypeSpecific::Put(PutRequestArguments { value }),
            timeout: None,
        };

        match self.route(&request, None)? {
            ResponseSpecific::Put(PutResponseArguments { owner }) => Ok(owner),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Look up the value stored for the hash of `key`.
    ///
    /// A missing key is `Ok(None)`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, RequestError> {
        Ok(self.get_target(self.space().hash_key(key))?.value)
    }

    /// Look up the value stored for `target`, along with the node that answered for it.
    pub fn get_target(&self, target: Id) -> Result<GetResponseArguments, RequestError> {
        let request = RequestSpecific {
            target,
            request_type: RequestTypeSpecific::Get,
            timeout: None,
        };

        match self.route(&request, None)? {
            ResponseSpecific::Get(response) => Ok(response),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Run maintenance if it is due: probe the leaf set, or every known peer when the
    /// routing table refresh is due, and evict peers that don't respond.
    ///
    /// Returns the number of evicted peers.
    pub fn maintain(&self) -> usize {
        let decisions = {
            let state = self.read_state();
            let mut maintenance = self
                .maintenance
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            maintenance.periodic_maintenance_decisions(&state)
        };

        if decisions.peers_to_probe.is_empty() {
            return 0;
        }

        let evicted = decisions
            .peers_to_probe
            .iter()
            .filter(|peer| !self.route_update(peer))
            .count();

        debug!(
            context = "maintenance",
            id = %self.peer.id,
            refresh = decisions.should_refresh_table,
            probed = decisions.peers_to_probe.len(),
            evicted,
            "Maintenance done"
        );

        evicted
    }

    // === Private Methods ===

    /// Contribute this node's routing table row to a JOIN and pass it on toward the joiner.
    fn handle_join(
        &self,
        joiner: Id,
        deadline: Option<Instant>,
    ) -> Result<ResponseSpecific, RequestError> {
        let hop = {
            let mut state = self.write_state();
            state.remove(&joiner);

            JoinHop {
                peer: self.peer,
                row: state.join_row(&joiner),
            }
        };

        let request = RequestSpecific {
            target: joiner,
            request_type: RequestTypeSpecific::Join,
            timeout: None,
        };

        match self.route(&request, deadline)? {
            ResponseSpecific::Join(mut arguments) => {
                arguments.hops.insert(0, hop);

                Ok(ResponseSpecific::Join(arguments))
            }
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Route a request hop by hop until it arrives, here or at a closer node.
    ///
    /// A next hop that fails is evicted and the request is rerouted with a fallback scan,
    /// up to [MAX_FORWARD_ATTEMPTS] times.
    ///
    /// Each next hop is given [Config::request_timeout] to respond, or less if the sender
    /// of this request expects an answer before `deadline`.
    fn route(
        &self,
        request: &RequestSpecific,
        deadline: Option<Instant>,
    ) -> Result<ResponseSpecific, RequestError> {
        let target = request.target;

        let mut route = self.read_state().next_hop(&target);
        let mut attempts = 0;

        loop {
            let (peer, via) = match route {
                Route::Arrived => return Ok(self.deliver(request)),
                Route::Forward(peer, via) => (peer, via),
            };

            if attempts >= MAX_FORWARD_ATTEMPTS {
                warn!(
                    context = "routing",
                    id = %self.peer.id,
                    ?target,
                    attempts,
                    "Giving up after unreachable next hops"
                );

                return Err(RequestError::Unreachable(target));
            }

            let Some(timeout) = self.forward_timeout(deadline) else {
                debug!(
                    context = "routing",
                    id = %self.peer.id,
                    ?target,
                    next = ?peer,
                    "No time left to forward"
                );

                return Err(RequestError::Expired(target));
            };
            attempts += 1;

            debug!(
                context = "routing",
                id = %self.peer.id,
                ?target,
                next = ?peer,
                ?via,
                ?timeout,
                request_type = request.request_type.name(),
                "Forwarding"
            );

            let forwarded = RequestSpecific {
                timeout: Some(timeout),
                ..request.clone()
            };

            match self
                .transport
                .request(peer.address, &self.peer, forwarded, timeout)
            {
                Ok((responder, response)) => {
                    self.on_message_received(&responder);

                    return Ok(response);
                }
                Err(TransportError::Remote(error)) => return Err(RequestError::Remote(error)),
                Err(error) => {
                    debug!(
                        context = "routing",
                        id = %self.peer.id,
                        peer = ?peer,
                        ?error,
                        "Evicting unreachable peer"
                    );

                    self.write_state().remove(&peer.id);
                    route = self.read_state().fallback_scan(&target);
                }
            }
        }
    }

    /// How long to wait for the next hop, `None` if the sender's budget is spent.
    fn forward_timeout(&self, deadline: Option<Instant>) -> Option<Duration> {
        let Some(deadline) = deadline else {
            return Some(self.config.request_timeout);
        };

        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .checked_sub(FORWARD_MARGIN)
            .filter(|remaining| !remaining.is_zero())?;

        Some(remaining.min(self.config.request_timeout))
    }

    /// Local effect of a request arriving at this node.
    fn deliver(&self, request: &RequestSpecific) -> ResponseSpecific {
        match &request.request_type {
            RequestTypeSpecific::Join => ResponseSpecific::Join(JoinResponseArguments {
                hops: vec![],
                leaf_set: self.read_state().leaf_set().to_owned_peers(),
            }),
            RequestTypeSpecific::Put(PutRequestArguments { value }) => {
                self.write_store().put(request.target, value.clone());

                debug!(
                    context = "store",
                    id = %self.peer.id,
                    key = ?request.target,
                    size = value.len(),
                    "Stored value"
                );

                ResponseSpecific::Put(PutResponseArguments { owner: self.peer })
            }
            RequestTypeSpecific::Get => ResponseSpecific::Get(GetResponseArguments {
                owner: self.peer,
                value: self.read_store().get(&request.target),
            }),
            RequestTypeSpecific::RouteUpdate => {
                ResponseSpecific::RouteUpdate(RouteUpdateResponseArguments {
                    leaf_set: self.read_state().leaf_set().to_owned_peers(),
                })
            }
        }
    }

    /// Send a ROUTE_UPDATE to a peer and learn its leaf set.
    ///
    /// Evicts the peer and returns `false` if it is unreachable.
    fn route_update(&self, peer: &Peer) -> bool {
        let request = RequestSpecific {
            target: self.peer.id,
            request_type: RequestTypeSpecific::RouteUpdate,
            timeout: Some(self.config.request_timeout),
        };

        match self.transport.request(
            peer.address,
            &self.peer,
            request,
            self.config.request_timeout,
        ) {
            Ok((responder, ResponseSpecific::RouteUpdate(arguments))) => {
                self.on_message_received(&responder);

                let mut state = self.write_state();
                for peer in arguments.leaf_set {
                    state.consider(peer);
                }

                true
            }
            Ok((responder, _)) => {
                debug!(context = "route_update", ?responder, "Unexpected response");
                true
            }
            Err(error) if error.is_unreachable() => {
                debug!(
                    context = "route_update",
                    id = %self.peer.id,
                    ?peer,
                    ?error,
                    "Evicting unreachable peer"
                );
                self.write_state().remove(&peer.id);

                false
            }
            Err(error) => {
                debug!(context = "route_update", ?peer, ?error, "Route update refused");
                true
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RoutingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RoutingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_store(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(thiserror::Error, Debug)]
/// Failed PUT or GET.
pub enum RequestError {
    #[error("Value is {size} bytes, larger than the maximum of {max} bytes")]
    ValueTooBig { size: usize, max: usize },

    #[error("No reachable next hop toward {0}")]
    /// Every next hop tried was unreachable.
    Unreachable(Id),

    #[error("No time left to forward toward {0} before the sender's timeout")]
    /// The request arrived too late in its sender's timeout to be forwarded.
    Expired(Id),

    #[error("Remote node responded with error {}: {}", .0.code, .0.description)]
    Remote(ErrorSpecific),

    #[error("Response type doesn't match the request")]
    UnexpectedResponse,

    #[error("Node was shutdown")]
    /// Returned by [crate::Node] after [crate::Node::shutdown].
    Shutdown,
}

#[derive(thiserror::Error, Debug)]
/// Failed to join a ring.
pub enum JoinError {
    #[error("Bootstrap node {0} is unreachable")]
    BootstrapUnreachable(SocketAddrV4),

    #[error("JOIN rejected with error {}: {}", .0.code, .0.description)]
    Rejected(ErrorSpecific),

    #[error("Response type doesn't match the JOIN request")]
    UnexpectedResponse,

    #[error("Node was shutdown")]
    /// Returned by [crate::Node] after [crate::Node::shutdown].
    Shutdown,
}

#[cfg(test)]
mod test {
    use super::*;

    fn lonely(id: u64) -> Arc<Rpc> {
        let config = Config {
            id_space: IdSpace::new(8, 4).unwrap(),
            leaf_set_size: 4,
            max_value_size: 4,
            ..Default::default()
        };

        LocalNetwork::new().spawn(Peer::with_id(id), config)
    }

    fn request(target: u64, request_type: RequestTypeSpecific) -> RequestSpecific {
        RequestSpecific {
            target: Id(target),
            request_type,
            timeout: None,
        }
    }

    #[test]
    fn drop_ids_outside_of_the_space() {
        let rpc = lonely(10);

        assert!(rpc
            .handle_request(Peer::with_id(300), request(20, RequestTypeSpecific::Get))
            .is_none());
        assert!(rpc
            .handle_request(Peer::with_id(20), request(256, RequestTypeSpecific::Get))
            .is_none());
        assert!(rpc.known_peers().is_empty());
    }

    #[test]
    fn value_too_big() {
        let rpc = lonely(10);

        let response = rpc.handle_request(
            Peer::with_id(20),
            request(
                30,
                RequestTypeSpecific::Put(PutRequestArguments {
                    value: Bytes::from_static(b"too big"),
                }),
            ),
        );

        match response {
            Some(MessageType::Error(error)) => assert_eq!(error.code, 205),
            other => panic!("expected an error, got {other:?}"),
        }
        assert!(rpc.stored(&Id(30)).is_none());
    }

    #[test]
    fn joiner_is_not_admitted() {
        let rpc = lonely(10);

        let response = rpc.handle_request(Peer::with_id(50), request(50, RequestTypeSpecific::Join));

        match response {
            Some(MessageType::Response(ResponseSpecific::Join(arguments))) => {
                assert_eq!(arguments.hops.len(), 1);
                assert_eq!(arguments.hops[0].peer, rpc.peer());
                assert!(arguments.leaf_set.is_empty());
            }
            other => panic!("expected a JOIN response, got {other:?}"),
        }
        assert!(rpc.known_peers().is_empty());
    }

    #[test]
    fn route_update_admits_the_sender() {
        let rpc = lonely(10);

        let response = rpc.handle_request(
            Peer::with_id(50),
            request(50, RequestTypeSpecific::RouteUpdate),
        );

        assert!(matches!(
            response,
            Some(MessageType::Response(ResponseSpecific::RouteUpdate(_)))
        ));
        assert_eq!(rpc.known_peers(), vec![Peer::with_id(50)]);
        assert!(rpc.leaf_set().contains(&Id(50)));
    }

    #[test]
    fn spent_budget_is_not_forwarded() {
        let rpc = lonely(10);
        rpc.on_message_received(&Peer::with_id(70));

        let response = rpc.handle_request(
            Peer::with_id(20),
            RequestSpecific {
                timeout: Some(FORWARD_MARGIN / 2),
                ..request(95, RequestTypeSpecific::Get)
            },
        );

        match response {
            Some(MessageType::Error(error)) => assert_eq!(error.code, 201),
            other => panic!("expected an error, got {other:?}"),
        }
        assert!(rpc.known_peers().contains(&Peer::with_id(70)));
    }

    #[test]
    fn forward_timeout_fits_the_sender_budget() {
        let rpc = lonely(10);
        let request_timeout = rpc.config().request_timeout;

        assert_eq!(rpc.forward_timeout(None), Some(request_timeout));

        let far = Instant::now() + request_timeout * 10;
        assert_eq!(rpc.forward_timeout(Some(far)), Some(request_timeout));

        let near = Instant::now() + FORWARD_MARGIN * 3;
        let timeout = rpc.forward_timeout(Some(near)).unwrap();
        assert!(timeout <= FORWARD_MARGIN * 2);
        assert!(timeout > FORWARD_MARGIN);

        assert_eq!(rpc.forward_timeout(Some(Instant::now())), None);
    }

    #[test]
    fn lonely_node_owns_every_key() {
        let rpc = lonely(10);

        let owner = rpc
            .put_target(Id(200), Bytes::from_static(b"red"))
            .unwrap();
        assert_eq!(owner, rpc.peer());

        let response = rpc.get_target(Id(200)).unwrap();
        assert_eq!(response.owner, rpc.peer());
        assert_eq!(response.value, Some(Bytes::from_static(b"red")));

        assert!(matches!(
            rpc.put_target(Id(200), Bytes::from_static(b"purple")),
            Err(RequestError::ValueTooBig { size: 6, max: 4 })
        ));
    }

    #[test]
    fn unreachable_peers_are_evicted_by_maintenance() {
        let network = LocalNetwork::new();
        let config = Config {
            id_space: IdSpace::new(8, 4).unwrap(),
            leaf_set_size: 4,
            maintenance_interval: std::time::Duration::ZERO,
            ..Default::default()
        };
        let rpc = network.spawn(Peer::with_id(10), config);

        // Never spawned, so every request to it times out.
        rpc.on_message_received(&Peer::with_id(20));
        assert!(rpc.leaf_set().contains(&Id(20)));

        assert_eq!(rpc.maintain(), 1);
        assert!(rpc.known_peers().is_empty());
    }
}
