//! Error types for burrow-coord.

use thiserror::Error;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating a gnode.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer we had to talk to did not answer.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Address model error
    #[error("topology error: {0}")]
    Topology(#[from] burrow_topology::Error),
}
