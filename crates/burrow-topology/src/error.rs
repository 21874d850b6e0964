//! Error types for burrow-topology.

use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building or translating addresses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The level/slot geometry cannot be represented.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// A nip does not match the topology it is used with.
    #[error("invalid nip {nip}: {reason}")]
    InvalidNip { nip: String, reason: &'static str },

    /// An IP address lies outside the addressable space.
    #[error("address {0} is outside the mesh address space")]
    NotInAddressSpace(std::net::IpAddr),
}
