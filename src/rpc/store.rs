//! Values stored at the node responsible for their key.

use std::collections::HashMap;

use bytes::Bytes;

use crate::common::Id;

/// Default maximum size of a stored value in bytes, keeping a PUT within one datagram.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1000;

#[derive(Debug, Default, Clone)]
/// Key-value pairs this node accepted as the owner of their keys.
///
/// Values never expire, and stay where they were written even if a closer node joins later.
pub struct Store {
    values: HashMap<Id, Bytes>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the value of a key, returning the previous value if any.
    pub fn put(&mut self, key: Id, value: Bytes) -> Option<Bytes> {
        self.values.insert(key, value)
    }

    pub fn get(&self, key: &Id) -> Option<Bytes> {
        self.values.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
