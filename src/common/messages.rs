//! Serialize and deserialize overlay messages.

mod internal;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use bytes::Bytes;
use serde_bytes::ByteBuf;

use crate::common::{Id, Peer, ID_SIZE};

/// Size of a compact peer: an [Id] followed by a compact Ipv4 address.
pub const PEER_SIZE: usize = ID_SIZE + 6;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u16,

    /// The sender of this message, its Id and address.
    ///
    /// Every message carries it, so receivers can learn about the sender.
    pub source: Peer,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    /// The key Id, or the joining node's Id.
    pub target: Id,
    pub request_type: RequestTypeSpecific,
    /// How long the sender waits for the response, `None` if it didn't say.
    ///
    /// A node forwarding this request has to answer within this budget.
    pub timeout: Option<Duration>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Join,
    Put(PutRequestArguments),
    Get,
    RouteUpdate,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Join(JoinResponseArguments),
    Put(PutResponseArguments),
    Get(GetResponseArguments),
    RouteUpdate(RouteUpdateResponseArguments),
}

// === JOIN ===

#[derive(Debug, PartialEq, Clone)]
pub struct JoinResponseArguments {
    /// Contribution of every node on the route to the joining node's Id, in order.
    pub hops: Vec<JoinHop>,
    /// Leaf set of the final hop.
    pub leaf_set: Vec<Peer>,
}

#[derive(Debug, PartialEq, Clone)]
/// A node on the route of a JOIN, and its routing table row matching the joining node.
pub struct JoinHop {
    pub peer: Peer,
    pub row: Vec<Peer>,
}

// === PUT ===

#[derive(Debug, PartialEq, Clone)]
pub struct PutRequestArguments {
    pub value: Bytes,
}

#[derive(Debug, PartialEq, Clone)]
pub struct PutResponseArguments {
    /// The node that stored the value.
    pub owner: Peer,
}

// === GET ===

#[derive(Debug, PartialEq, Clone)]
pub struct GetResponseArguments {
    /// The node responsible for the key.
    pub owner: Peer,
    /// `None` if the owner has no value for this key.
    pub value: Option<Bytes>,
}

// === ROUTE_UPDATE ===

#[derive(Debug, PartialEq, Clone)]
pub struct RouteUpdateResponseArguments {
    /// Leaf set of the responder.
    pub leaf_set: Vec<Peer>,
}

impl RequestTypeSpecific {
    /// Name of this request type as written on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            RequestTypeSpecific::Join => "JOIN",
            RequestTypeSpecific::Put(_) => "PUT",
            RequestTypeSpecific::Get => "GET",
            RequestTypeSpecific::RouteUpdate => "ROUTE_UPDATE",
        }
    }
}

impl Message {
    fn into_serde_message(self) -> internal::PastryMessage {
        internal::PastryMessage {
            transaction_id: self.transaction_id.to_be_bytes(),
            source_id: self.source.id.to_bytes(),
            source_address: sockaddr_to_bytes(&self.source.address),
            variant: match self.message_type {
                MessageType::Request(RequestSpecific {
                    target,
                    request_type,
                    timeout,
                }) => {
                    let target = target.to_bytes();
                    let timeout = timeout.map(duration_to_millis);

                    internal::PastryMessageVariant::Request(match request_type {
                        RequestTypeSpecific::Join => internal::PastryRequestSpecific::Join {
                            arguments: internal::PastryTargetArguments { target, timeout },
                        },
                        RequestTypeSpecific::Put(PutRequestArguments { value }) => {
                            internal::PastryRequestSpecific::Put {
                                arguments: internal::PastryPutRequestArguments {
                                    target,
                                    v: value.to_vec().into(),
                                    timeout,
                                },
                            }
                        }
                        RequestTypeSpecific::Get => internal::PastryRequestSpecific::Get {
                            arguments: internal::PastryTargetArguments { target, timeout },
                        },
                        RequestTypeSpecific::RouteUpdate => {
                            internal::PastryRequestSpecific::RouteUpdate {
                                arguments: internal::PastryTargetArguments { target, timeout },
                            }
                        }
                    })
                }
                MessageType::Response(response) => {
                    internal::PastryMessageVariant::Response(match response {
                        ResponseSpecific::Join(JoinResponseArguments { hops, leaf_set }) => {
                            internal::PastryResponseSpecific::Join {
                                arguments: internal::PastryJoinResponseArguments {
                                    path: peers_to_bytes(hops.iter().map(|hop| &hop.peer)).into(),
                                    rows: hops
                                        .iter()
                                        .map(|hop| ByteBuf::from(peers_to_bytes(hop.row.iter())))
                                        .collect(),
                                    leaf: peers_to_bytes(leaf_set.iter()).into(),
                                },
                            }
                        }
                        ResponseSpecific::Put(PutResponseArguments { owner }) => {
                            internal::PastryResponseSpecific::Put {
                                arguments: internal::PastryPutResponseArguments {
                                    owner: peer_to_bytes(&owner),
                                },
                            }
                        }
                        ResponseSpecific::Get(GetResponseArguments { owner, value }) => {
                            internal::PastryResponseSpecific::Get {
                                arguments: internal::PastryGetResponseArguments {
                                    owner: peer_to_bytes(&owner),
                                    v: value.map(|v| v.to_vec().into()),
                                },
                            }
                        }
                        ResponseSpecific::RouteUpdate(RouteUpdateResponseArguments {
                            leaf_set,
                        }) => internal::PastryResponseSpecific::RouteUpdate {
                            arguments: internal::PastryRouteUpdateResponseArguments {
                                leaf: peers_to_bytes(leaf_set.iter()).into(),
                            },
                        },
                    })
                }
                MessageType::Error(err) => {
                    internal::PastryMessageVariant::Error(internal::PastryErrorSpecific {
                        error_info: (err.code, err.description),
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::PastryMessage) -> Result<Message, DecodeMessageError> {
        Ok(Message {
            transaction_id: u16::from_be_bytes(msg.transaction_id),
            source: Peer::new(
                Id::from_bytes(msg.source_id),
                bytes_to_sockaddr(msg.source_address)?,
            ),
            message_type: match msg.variant {
                internal::PastryMessageVariant::Request(req_variant) => {
                    MessageType::Request(match req_variant {
                        internal::PastryRequestSpecific::Join { arguments } => RequestSpecific {
                            target: Id::from_bytes(arguments.target),
                            request_type: RequestTypeSpecific::Join,
                            timeout: arguments.timeout.map(millis_to_duration),
                        },
                        internal::PastryRequestSpecific::Put { arguments } => RequestSpecific {
                            target: Id::from_bytes(arguments.target),
                            request_type: RequestTypeSpecific::Put(PutRequestArguments {
                                value: arguments.v.into_vec().into(),
                            }),
                            timeout: arguments.timeout.map(millis_to_duration),
                        },
                        internal::PastryRequestSpecific::Get { arguments } => RequestSpecific {
                            target: Id::from_bytes(arguments.target),
                            request_type: RequestTypeSpecific::Get,
                            timeout: arguments.timeout.map(millis_to_duration),
                        },
                        internal::PastryRequestSpecific::RouteUpdate { arguments } => {
                            RequestSpecific {
                                target: Id::from_bytes(arguments.target),
                                request_type: RequestTypeSpecific::RouteUpdate,
                                timeout: arguments.timeout.map(millis_to_duration),
                            }
                        }
                    })
                }
                internal::PastryMessageVariant::Response(res_variant) => {
                    MessageType::Response(match res_variant {
                        internal::PastryResponseSpecific::Join { arguments } => {
                            let path = bytes_to_peers(&arguments.path)?;

                            if path.len() != arguments.rows.len() {
                                return Err(DecodeMessageError::MismatchedJoinRows {
                                    hops: path.len(),
                                    rows: arguments.rows.len(),
                                });
                            }

                            let hops = path
                                .into_iter()
                                .zip(arguments.rows.iter())
                                .map(|(peer, row)| {
                                    Ok(JoinHop {
                                        peer,
                                        row: bytes_to_peers(row)?,
                                    })
                                })
                                .collect::<Result<Vec<_>, DecodeMessageError>>()?;

                            ResponseSpecific::Join(JoinResponseArguments {
                                hops,
                                leaf_set: bytes_to_peers(&arguments.leaf)?,
                            })
                        }
                        internal::PastryResponseSpecific::Put { arguments } => {
                            ResponseSpecific::Put(PutResponseArguments {
                                owner: bytes_to_peer(&arguments.owner)?,
                            })
                        }
                        internal::PastryResponseSpecific::Get { arguments } => {
                            ResponseSpecific::Get(GetResponseArguments {
                                owner: bytes_to_peer(&arguments.owner)?,
                                value: arguments.v.map(|v| v.into_vec().into()),
                            })
                        }
                        internal::PastryResponseSpecific::RouteUpdate { arguments } => {
                            ResponseSpecific::RouteUpdate(RouteUpdateResponseArguments {
                                leaf_set: bytes_to_peers(&arguments.leaf)?,
                            })
                        }
                    })
                }
                internal::PastryMessageVariant::Error(err) => MessageType::Error(ErrorSpecific {
                    code: err.error_info.0,
                    description: err.error_info.1,
                }),
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        self.clone().into_serde_message().to_bytes()
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message, DecodeMessageError> {
        Message::from_serde_message(internal::PastryMessage::from_bytes(bytes.as_ref())?)
    }
}

#[derive(thiserror::Error, Debug)]
/// Malformed overlay message.
pub enum DecodeMessageError {
    /// Errors related to parsing bencoded messages.
    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("Wrong number of bytes for a compact peer list ({0})")]
    InvalidPeersLength(usize),

    #[error("A JOIN response listed {hops} hops but {rows} routing table rows")]
    MismatchedJoinRows { hops: usize, rows: usize },
}

fn duration_to_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn millis_to_duration(millis: u32) -> Duration {
    Duration::from_millis(millis.into())
}

fn bytes_to_sockaddr(bytes: [u8; 6]) -> Result<SocketAddrV4, DecodeMessageError> {
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);

    Ok(SocketAddrV4::new(ip, port))
}

pub fn sockaddr_to_bytes(sockaddr: &SocketAddrV4) -> [u8; 6] {
    let mut bytes = [0; 6];

    bytes[..4].copy_from_slice(&sockaddr.ip().octets());
    bytes[4..].copy_from_slice(&sockaddr.port().to_be_bytes());

    bytes
}

fn peer_to_bytes(peer: &Peer) -> [u8; PEER_SIZE] {
    let mut bytes = [0; PEER_SIZE];

    bytes[..ID_SIZE].copy_from_slice(&peer.id.to_bytes());
    bytes[ID_SIZE..].copy_from_slice(&sockaddr_to_bytes(&peer.address));

    bytes
}

fn bytes_to_peer(bytes: &[u8; PEER_SIZE]) -> Result<Peer, DecodeMessageError> {
    let mut id = [0; ID_SIZE];
    id.copy_from_slice(&bytes[..ID_SIZE]);

    let mut address = [0; 6];
    address.copy_from_slice(&bytes[ID_SIZE..]);

    Ok(Peer::new(Id::from_bytes(id), bytes_to_sockaddr(address)?))
}

fn peers_to_bytes<'a>(peers: impl Iterator<Item = &'a Peer>) -> Vec<u8> {
    let mut vec = Vec::new();
    for peer in peers {
        vec.extend_from_slice(&peer_to_bytes(peer));
    }
    vec
}

fn bytes_to_peers<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<Peer>, DecodeMessageError> {
    let bytes = bytes.as_ref();

    if bytes.len() % PEER_SIZE != 0 {
        return Err(DecodeMessageError::InvalidPeersLength(bytes.len()));
    }

    bytes
        .chunks_exact(PEER_SIZE)
        .map(|chunk| {
            let mut compact = [0; PEER_SIZE];
            compact.copy_from_slice(chunk);

            bytes_to_peer(&compact)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Peer {
        Peer::new(Id(0xa3f1), "127.0.0.1:5000".parse().unwrap())
    }

    fn assert_survives_the_wire(original_msg: Message) {
        let bytes = original_msg.to_bytes().unwrap();
        let parsed_msg = Message::from_bytes(bytes).unwrap();

        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn join_request_is_bencoded_with_type_name() {
        let msg = Message {
            transaction_id: 258,
            source: source(),
            message_type: MessageType::Request(RequestSpecific {
                target: Id(0xa3f1),
                request_type: RequestTypeSpecific::Join,
                timeout: None,
            }),
        };

        let bytes = msg.to_bytes().unwrap();
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.contains("1:q4:JOIN"));
        assert!(text.contains("1:y1:q"));
        assert!(!text.contains("2:tm"));

        assert_survives_the_wire(msg);
    }

    #[test]
    fn put_request() {
        assert_survives_the_wire(Message {
            transaction_id: 7,
            source: source(),
            message_type: MessageType::Request(RequestSpecific {
                target: Id(0x0042),
                request_type: RequestTypeSpecific::Put(PutRequestArguments {
                    value: Bytes::from_static(b"red"),
                }),
                timeout: Some(Duration::from_millis(1500)),
            }),
        });
    }

    #[test]
    fn request_carries_the_sender_timeout() {
        let msg = Message {
            transaction_id: 3,
            source: source(),
            message_type: MessageType::Request(RequestSpecific {
                target: Id(0x0042),
                request_type: RequestTypeSpecific::Get,
                timeout: Some(Duration::from_millis(250)),
            }),
        };

        let bytes = msg.to_bytes().unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("2:tmi250e"));

        assert_survives_the_wire(msg);
    }

    #[test]
    fn join_response() {
        let hop = |id: u64, row: &[u64]| JoinHop {
            peer: Peer::with_id(id),
            row: row.iter().map(|id| Peer::with_id(*id)).collect(),
        };

        assert_survives_the_wire(Message {
            transaction_id: 9,
            source: source(),
            message_type: MessageType::Response(ResponseSpecific::Join(JoinResponseArguments {
                hops: vec![hop(0x1000, &[0x2000, 0x3000]), hop(0xa000, &[])],
                leaf_set: vec![Peer::with_id(0xa001), Peer::with_id(0x9fff)],
            })),
        });
    }

    #[test]
    fn get_response_with_and_without_value() {
        for value in [None, Some(Bytes::from_static(b"yellow"))] {
            assert_survives_the_wire(Message {
                transaction_id: 1,
                source: source(),
                message_type: MessageType::Response(ResponseSpecific::Get(GetResponseArguments {
                    owner: Peer::with_id(0x0043),
                    value,
                })),
            });
        }
    }

    #[test]
    fn error_message() {
        assert_survives_the_wire(Message {
            transaction_id: 1,
            source: source(),
            message_type: MessageType::Error(ErrorSpecific {
                code: 205,
                description: "Message (v field) too big.".to_string(),
            }),
        });
    }

    #[test]
    fn rejects_malformed_bytes() {
        assert!(Message::from_bytes(b"not bencode").is_err());
        assert!(Message::from_bytes(b"d1:t2:aae").is_err());
    }

    #[test]
    fn rejects_truncated_peer_lists() {
        assert!(matches!(
            bytes_to_peers([0u8; PEER_SIZE + 3]),
            Err(DecodeMessageError::InvalidPeersLength(17))
        ));
    }
}
