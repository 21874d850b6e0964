//! Error types for burrow-hook.

use thiserror::Error;

/// Result type for hook operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while joining or answering join queries.
#[derive(Debug, Error)]
pub enum Error {
    /// The node is cooling down after a gnode split and answers nothing.
    #[error("node is a zombie")]
    Zombie,

    /// No free slot anywhere.
    #[error("network is full")]
    NetworkFull,

    /// A coordinator refused the move.
    #[error("denied by coordinator")]
    Denied,

    /// A peer or coordinator did not answer
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// A remote call took longer than the rpc timeout.
    #[error("remote call timed out")]
    Timeout,

    /// Address model error
    #[error("topology error: {0}")]
    Topology(#[from] burrow_topology::Error),
}
