//! Burrow Coordinator
//!
//! Slot allocation for the gnodes of the Burrow mesh.
//!
//! Each node keeps a [`MapCache`], a replica of which slots of its gnode
//! chain are taken, and runs a [`Coordinator`] that answers slot requests
//! for the gnodes it coordinates:
//!
//! - [`Coordinator::going_in`] assigns a free slot to a joining node,
//! - [`Coordinator::going_out`] frees the slot of a leaving node,
//! - [`Coordinator::going_out_ok`] acknowledges that the departure completed.
//!
//! When a closer participant appears, the old coordinator hands its mapcache
//! over through the [`CoordinatorLink`].

mod coordinator;
mod error;
mod link;
mod mapcache;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{Error, Result};
pub use link::{CoordinatorLink, ParticipantResolver};
pub use mapcache::{MapCache, MapPacket};
