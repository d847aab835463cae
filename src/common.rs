//! Miscellaneous common structs used throughout the library.

mod id;
mod leaf_set;
pub mod messages;
mod peer;
mod routing_table;

pub use id::*;
pub use leaf_set::*;
pub use messages::*;
pub use peer::*;
pub use routing_table::*;
