//! Error types for burrow-sim.

use thiserror::Error;

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No node with this index.
    #[error("unknown node {0}")]
    UnknownNode(usize),

    /// Every address of the topology is taken.
    #[error("no free address left")]
    AddressSpaceFull,

    /// Bad environment value
    #[error("invalid {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    /// Address model error
    #[error("topology error: {0}")]
    Topology(#[from] burrow_topology::Error),
}
