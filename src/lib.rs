#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

#[cfg(feature = "async")]
pub mod async_node;
mod node;
pub mod rpc;

pub use crate::common::{
    Id, IdSpace, InvalidIdSpace, LeafSet, Peer, RoutingTable, DEFAULT_DIGIT_BITS,
    DEFAULT_ID_BITS, DEFAULT_LEAF_SET_SIZE,
};
pub use bytes::Bytes;
pub use node::{BuildError, Node, NodeBuilder, Testnet};

pub mod errors {
    //! Exported errors
    pub use super::common::DecodeMessageError;
    pub use super::node::BuildError;
    pub use super::rpc::{JoinError, RequestError, TransportError};
}
