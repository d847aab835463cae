//! AsyncNode node.

use std::{net::SocketAddrV4, thread};

use bytes::Bytes;

use crate::{
    common::{GetResponseArguments, Id, Peer},
    node::Node,
    rpc::{Info, JoinError, RequestError},
};

impl Node {
    /// Return an async version of the Pastry node.
    pub fn as_async(self) -> AsyncNode {
        AsyncNode(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Pastry node.
///
/// Every operation runs on its own thread, and is awaited through a channel.
pub struct AsyncNode(Node);

impl AsyncNode {
    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.0.id()
    }

    /// Local UDP Ipv4 socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.0.local_addr()
    }

    /// Information and statistics about this node.
    pub fn info(&self) -> Info {
        self.0.info()
    }

    /// Returns the blocking version of this node.
    pub fn as_sync(self) -> Node {
        self.0
    }

    // === Public Methods ===

    /// Stop the listener and maintenance threads of this node and all its clones.
    pub fn shutdown(&self) {
        self.0.shutdown();
    }

    /// Join (again) the ring of the node at `bootstrap`.
    pub async fn join(&self, bootstrap: SocketAddrV4) -> Result<(), JoinError> {
        let node = self.0.clone();

        spawn(move || node.join(bootstrap))
            .await
            .unwrap_or(Err(JoinError::Shutdown))
    }

    /// Store `value` at the node responsible for the hash of `key`, returns that node.
    pub async fn put(&self, key: &[u8], value: impl Into<Bytes>) -> Result<Peer, RequestError> {
        let node = self.0.clone();
        let key = key.to_vec();
        let value = value.into();

        spawn(move || node.put(&key, value))
            .await
            .unwrap_or(Err(RequestError::Shutdown))
    }

    /// Store `value` at the node responsible for `target`, returns that node.
    pub async fn put_target(
        &self,
        target: Id,
        value: impl Into<Bytes>,
    ) -> Result<Peer, RequestError> {
        let node = self.0.clone();
        let value = value.into();

        spawn(move || node.put_target(target, value))
            .await
            .unwrap_or(Err(RequestError::Shutdown))
    }

    /// Look up the value stored for the hash of `key`.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, RequestError> {
        let node = self.0.clone();
        let key = key.to_vec();

        spawn(move || node.get(&key))
            .await
            .unwrap_or(Err(RequestError::Shutdown))
    }

    /// Look up the value stored for `target`, along with the node responsible for it.
    pub async fn get_target(&self, target: Id) -> Result<GetResponseArguments, RequestError> {
        let node = self.0.clone();

        spawn(move || node.get_target(target))
            .await
            .unwrap_or(Err(RequestError::Shutdown))
    }
}

/// Run a blocking operation on its own thread, returns `None` if it never responded.
async fn spawn<T, F>(f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = flume::bounded::<T>(1);

    thread::spawn(move || {
        let _ = sender.send(f());
    });

    receiver.recv_async().await.ok()
}
