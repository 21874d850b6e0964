//! Burrow Simulation
//!
//! An in-memory network to run Burrow nodes against each other.
//!
//! [`SimNet`] owns the nodes and the undirected links between them, and
//! implements every transport seam of the other crates:
//!
//! - radar probes reach the linked nodes after the link latency,
//! - remote queries reach any live node by `(ip, netid)`,
//! - coordinator calls reach the participant of the netid nearest to the
//!   ideal address.
//!
//! Routing maps are not propagated by a routing protocol here:
//! [`SimNet::sync_maps`] recomputes them from the nips of every node sharing
//! a netid, the way a converged route discovery would leave them.
//!
//! Every node reacts to its own events: a completed scan triggers a
//! collision check, and a settled rehook readvertises the neighbours.
//!
//! ```no_run
//! # async fn run() -> burrow_sim::Result<()> {
//! use burrow_sim::{SimConfig, SimNet};
//!
//! let net = SimNet::new(SimConfig::default())?;
//! for _ in 0..4 {
//!     net.add_node()?;
//! }
//! net.link_line();
//! net.bootstrap_all().await;
//! net.scan_all().await;
//! net.settle().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod net;
mod node;

pub use config::SimConfig;
pub use error::{Error, Result};
pub use net::{CountChange, NetSummary, SimNet};
pub use node::{NodeSummary, SimNode};
