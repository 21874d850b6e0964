//! Burrow Hook
//!
//! How a node joins the Burrow mesh and moves inside it.
//!
//! # Triggers
//!
//! | trigger                              | request                                  |
//! |--------------------------------------|------------------------------------------|
//! | startup, failed attempt              | [`HookRequest::bootstrap`]               |
//! | our gnode split, we are the minority | [`HookRequest::group_split`]             |
//! | a neighbouring gnode has more room   | [`HookRequest::communicating_vessels`]   |
//! | a larger network with another netid  | [`HookRequest::network_collision`]       |
//!
//! Every trigger goes through [`Hook::hook`], which runs one attempt at a
//! time. The remote side of the protocol (free-node queries, coordinator
//! calls, address changes) goes through a [`HookTransport`].
//!
//! # Status
//!
//! [`NodeStatus`] tracks whether the node is hooked. Query handlers consult
//! it: a zombie node refuses [`Hook::highest_free_nodes`] and friends while
//! it cools down after a split.

mod collision;
mod config;
mod error;
mod hook;
mod status;
mod transport;
mod vessels;

pub use collision::{collision_winner, estimated_size};
pub use config::HookConfig;
pub use error::{Error, Result};
pub use hook::{Hook, HookEvent, HookOutcome, HookReason, HookRequest};
pub use status::NodeStatus;
pub use transport::{CoordTarget, Hfn, HookTransport};
