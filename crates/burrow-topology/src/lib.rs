//! Burrow Address Topology
//!
//! Hierarchical addressing for the Burrow mesh.
//!
//! # Model
//!
//! A node's address (its *nip*) is an ordered sequence of slot numbers, one
//! per level. Level 0 is the lowest: the slot of the node inside its smallest
//! group. Nodes sharing every slot above level `l` belong to the same
//! *gnode* of level `l + 1`.
//!
//! ```text
//! level:    3    2    1    0
//! nip:    [ 10 | 4  | 7  | 21 ]   ->  10.4.7.21
//!           \_________/
//!          same gnode of level 2 for every nip starting 10.4
//! ```
//!
//! With four levels of 256 slots a nip is exactly an IPv4 address, which is
//! how the radar names its peers.
//!
//! # Maps
//!
//! [`LevelMap`] is the per-node view of which slots are occupied at every
//! level of the node's own gnode chain. The join protocol reads free slots
//! from it and resets it after a rehook.

mod error;
mod map;
mod nip;

pub use error::{Error, Result};
pub use map::{LevelMap, MapEvent};
pub use nip::{nearest_nip, NetId, Nip, SlotId, Topology};

/// Number of levels of an IPv4 mesh.
pub const IPV4_LEVELS: usize = 4;

/// Slots per level of an IPv4 mesh (one address byte per level).
pub const IPV4_GSIZE: u16 = 256;

// One byte per level is the whole IPv4 address
const _: () = assert!(IPV4_LEVELS * 8 == 32);
