//! UDP socket layer managing incoming/outgoing requests and responses.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use crate::common::{ErrorSpecific, Message, MessageType, Peer, RequestSpecific, ResponseSpecific};

use super::config::Config;
use super::{Transport, TransportError};

/// Largest datagram read from the socket, every message must fit in it.
pub const MTU: usize = 2048;

/// Port tried first when [Config::port] is not set.
pub const DEFAULT_PORT: u16 = 5000;
/// Default request timeout before considering a non-responding node failed.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
/// The maximum duration [KrpcSocket::recv_from] blocks waiting for a datagram.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(100);

type ResponseResult = Result<(Peer, ResponseSpecific), ErrorSpecific>;

/// A UdpSocket wrapper that formats and correlates Pastry requests and responses.
#[derive(Debug)]
pub struct KrpcSocket {
    next_tid: AtomicU16,
    socket: UdpSocket,
    local_addr: SocketAddrV4,
    inflight_requests: Mutex<HashMap<u16, InflightRequest>>,
}

#[derive(Debug)]
struct InflightRequest {
    to: SocketAddrV4,
    sender: flume::Sender<ResponseResult>,
}

impl KrpcSocket {
    pub fn new(config: &Config) -> Result<Self, std::io::Error> {
        let address = config.address;

        let socket = if let Some(port) = config.port {
            UdpSocket::bind(SocketAddr::from((address, port)))?
        } else {
            match UdpSocket::bind(SocketAddr::from((address, DEFAULT_PORT))) {
                Ok(socket) => Ok(socket),
                Err(_) => UdpSocket::bind(SocketAddr::from((address, 0))),
            }?
        };

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "KrpcSocket does not support Ipv6",
                ))
            }
        };

        socket.set_read_timeout(Some(MAX_THREAD_BLOCK_DURATION))?;

        Ok(Self {
            next_tid: AtomicU16::new(0),
            socket,
            local_addr,
            inflight_requests: Mutex::new(HashMap::new()),
        })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// Returns true if this transaction_id is still waiting for a response.
    pub fn inflight(&self, transaction_id: &u16) -> bool {
        self.inflight_requests().contains_key(transaction_id)
    }

    /// Send a response or an error on behalf of `source` to the given address.
    pub fn response(
        &self,
        address: SocketAddrV4,
        transaction_id: u16,
        source: Peer,
        message_type: MessageType,
    ) {
        let message = Message {
            transaction_id,
            source,
            message_type,
        };

        let _ = self.send(address, &message).map_err(|e| {
            debug!(?e, "Error sending response message");
        });
    }

    /// Receives a single datagram on the socket, blocking up to [MAX_THREAD_BLOCK_DURATION].
    ///
    /// Responses are handed to the thread waiting in [Transport::request], so on success
    /// this only returns requests, along with their origin.
    pub fn recv_from(&self) -> Option<(Message, SocketAddrV4)> {
        let mut buf = [0u8; MTU];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, SocketAddr::V4(from))) => {
                let bytes = &buf[..amt];

                if from.port() == 0 {
                    trace!(
                        context = "socket_validation",
                        message = "Response from port 0"
                    );
                    return None;
                }

                match Message::from_bytes(bytes) {
                    Ok(message) => match message.message_type {
                        MessageType::Request(_) => {
                            trace!(
                                context = "socket_message_receiving",
                                ?message,
                                ?from,
                                "Received request message"
                            );
                            return Some((message, from));
                        }
                        MessageType::Response(response) => {
                            trace!(
                                context = "socket_message_receiving",
                                transaction_id = message.transaction_id,
                                ?from,
                                "Received response message"
                            );
                            self.resolve(message.transaction_id, &from, Ok((message.source, response)));
                        }
                        MessageType::Error(error) => {
                            trace!(
                                context = "socket_message_receiving",
                                transaction_id = message.transaction_id,
                                ?error,
                                ?from,
                                "Received error message"
                            );
                            self.resolve(message.transaction_id, &from, Err(error));
                        }
                    },
                    Err(error) => {
                        debug!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid Bencode message."
                        );
                    }
                }
            }
            Ok((_, SocketAddr::V6(_))) => {
                trace!(
                    context = "socket_validation",
                    message = "Received IPv6 packet"
                );
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
            }
        }

        None
    }

    // === Private Methods ===

    /// Hand a response to the requester waiting for it, if it came from the expected address.
    fn resolve(&self, transaction_id: u16, from: &SocketAddrV4, result: ResponseResult) {
        let mut inflight_requests = self.inflight_requests();

        match inflight_requests.get(&transaction_id) {
            Some(request) if compare_socket_addr(&request.to, from) => {
                if let Some(request) = inflight_requests.remove(&transaction_id) {
                    let _ = request.sender.send(result);
                }
            }
            Some(_) => {
                trace!(
                    context = "socket_validation",
                    message = "Response from wrong address"
                );
            }
            None => {
                trace!(
                    context = "socket_validation",
                    message = "Unexpected response id"
                );
            }
        }
    }

    /// Increments next_tid and returns the previous value.
    fn tid(&self) -> u16 {
        // Transaction ids are not reused while inflight in practice, the timeout is
        // short enough to never run out of 65535 ids.
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    fn inflight_requests(&self) -> MutexGuard<'_, HashMap<u16, InflightRequest>> {
        self.inflight_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a raw Pastry message
    fn send(&self, address: SocketAddrV4, message: &Message) -> Result<(), TransportError> {
        self.socket.send_to(&message.to_bytes()?, address)?;
        trace!(context = "socket_message_sending", message = ?message);
        Ok(())
    }
}

impl Transport for KrpcSocket {
    fn request(
        &self,
        to: SocketAddrV4,
        from: &Peer,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<(Peer, ResponseSpecific), TransportError> {
        let transaction_id = self.tid();
        let (sender, receiver) = flume::bounded(1);

        self.inflight_requests()
            .insert(transaction_id, InflightRequest { to, sender });

        let message = Message {
            transaction_id,
            source: *from,
            message_type: MessageType::Request(request),
        };

        if let Err(error) = self.send(to, &message) {
            self.inflight_requests().remove(&transaction_id);
            return Err(error);
        }

        let result = receiver.recv_timeout(timeout);
        self.inflight_requests().remove(&transaction_id);

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(TransportError::Remote(error)),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

// Same as SocketAddr::eq but ignores the ip if it is unspecified for testing reasons.
fn compare_socket_addr(a: &SocketAddrV4, b: &SocketAddrV4) -> bool {
    if a.port() != b.port() {
        return false;
    }

    if a.ip().is_unspecified() {
        return true;
    }

    a.ip() == b.ip()
}
