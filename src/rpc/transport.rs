//! Request/response round trips between nodes.

use std::{fmt::Debug, net::SocketAddrV4, time::Duration};

use crate::common::{ErrorSpecific, Peer, RequestSpecific, ResponseSpecific};

/// Blocking request/response exchange with another node.
///
/// Implemented by the UDP [super::KrpcSocket] and by the in-process [super::LocalNetwork].
pub trait Transport: Send + Sync + Debug {
    /// Send a `request` on behalf of `from` to the node listening on `to`, and wait up to
    /// `timeout` for its response.
    ///
    /// Returns the responding peer along with its response.
    fn request(
        &self,
        to: SocketAddrV4,
        from: &Peer,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<(Peer, ResponseSpecific), TransportError>;
}

#[derive(thiserror::Error, Debug)]
/// Failed round trip to another node.
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_bencode::Error),

    #[error("Remote node responded with error {}: {}", .0.code, .0.description)]
    /// The node is alive, but refused the request.
    Remote(ErrorSpecific),
}

impl TransportError {
    /// Returns `true` if the node should be considered failed.
    ///
    /// Every error except [TransportError::Remote] means no valid response came back.
    pub fn is_unreachable(&self) -> bool {
        !matches!(self, TransportError::Remote(_))
    }
}
