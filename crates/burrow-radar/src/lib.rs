//! Burrow Radar
//!
//! Neighbour discovery for the Burrow mesh.
//!
//! The [`Radar`] periodically broadcasts a bouquet of probes and measures how
//! long every peer takes to answer. The [`NeighborTable`] turns those noisy
//! per-round measurements into a stable neighbour set with small integer
//! handles, and announces changes as [`NeighbourEvent`]s.
//!
//! # Churn damping
//!
//! | what happens                    | what the table does                     |
//! |---------------------------------|-----------------------------------------|
//! | more peers than `max_neigh`     | keep the lowest-RTT ones                |
//! | peer missing from a scan        | keep it for `scans_before_delete` scans |
//! | RTT jitter under the threshold  | keep the old record, no event           |
//!
//! Route installers synchronise with the table through [`GatewaySync`].

mod config;
mod error;
mod gateway;
mod neighbour;
mod radar;
mod transport;

pub use config::{NeighbourConfig, RadarConfig};
pub use error::{Error, Result};
pub use gateway::GatewaySync;
pub use neighbour::{
    rtt_variation, DevRtt, Neigh, NeighFilter, NeighId, NeighKey, NeighborTable, NeighbourEvent,
};
pub use radar::{Radar, RadarEvent, RadarState};
pub use transport::{Probe, RadarTransport, Reply};
