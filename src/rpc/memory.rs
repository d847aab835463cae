//! In-process transport, to simulate many nodes in a single process.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV4;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::common::{Message, MessageType, Peer, RequestSpecific, ResponseSpecific};

use super::{Config, Rpc, Transport, TransportError};

#[derive(Debug, Default, Clone)]
/// A network of [Rpc] nodes calling each other directly.
///
/// Messages still go through the wire encoding. A response that takes longer than the
/// caller's timeout is a [TransportError::Timeout], as it would be on a real network.
///
/// Unreachable nodes fail immediately, unless the network was created with
/// [LocalNetwork::with_timeouts].
pub struct LocalNetwork {
    inner: Arc<RwLock<Inner>>,
    wait_on_unreachable: bool,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<SocketAddrV4, Weak<Rpc>>,
    unreachable: HashSet<SocketAddrV4>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A network where requests to unreachable nodes block for the caller's whole timeout.
    pub fn with_timeouts() -> Self {
        LocalNetwork {
            wait_on_unreachable: true,
            ..Self::default()
        }
    }

    /// Create a node on this network, it can then [Rpc::join] others through their address.
    pub fn spawn(&self, peer: Peer, config: Config) -> Arc<Rpc> {
        let rpc = Arc::new(Rpc::new(peer, config, Arc::new(self.clone())));

        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes
            .insert(peer.address, Arc::downgrade(&rpc));

        rpc
    }

    /// Make requests to `address` fail, as if the node crashed, or recover it.
    pub fn set_unreachable(&self, address: SocketAddrV4, unreachable: bool) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if unreachable {
            inner.unreachable.insert(address);
        } else {
            inner.unreachable.remove(&address);
        }
    }

    /// Remove a node from this network for good.
    pub fn remove(&self, address: &SocketAddrV4) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes
            .remove(address);
    }

    fn node(&self, address: &SocketAddrV4) -> Option<Arc<Rpc>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        if inner.unreachable.contains(address) {
            return None;
        }

        inner.nodes.get(address).and_then(Weak::upgrade)
    }
}

impl Transport for LocalNetwork {
    fn request(
        &self,
        to: SocketAddrV4,
        from: &Peer,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<(Peer, ResponseSpecific), TransportError> {
        let Some(rpc) = self.node(&to) else {
            trace!(context = "local_network", ?to, "Unreachable node");

            if self.wait_on_unreachable {
                thread::sleep(timeout);
            }

            return Err(TransportError::Timeout);
        };

        let started = Instant::now();

        let message = Message {
            transaction_id: 0,
            source: *from,
            message_type: MessageType::Request(request),
        };
        let Ok(Message {
            source,
            message_type: MessageType::Request(request),
            ..
        }) = Message::from_bytes(message.to_bytes()?)
        else {
            return Err(TransportError::Timeout);
        };

        let Some(reply) = rpc.handle_request(source, request) else {
            return Err(TransportError::Timeout);
        };

        if started.elapsed() > timeout {
            trace!(context = "local_network", ?to, ?timeout, "Response came too late");
            return Err(TransportError::Timeout);
        }

        let message = Message {
            transaction_id: 0,
            source: rpc.peer(),
            message_type: reply,
        };

        match Message::from_bytes(message.to_bytes()?) {
            Ok(Message {
                source,
                message_type: MessageType::Response(response),
                ..
            }) => Ok((source, response)),
            Ok(Message {
                message_type: MessageType::Error(error),
                ..
            }) => Err(TransportError::Remote(error)),
            _ => Err(TransportError::Timeout),
        }
    }
}
