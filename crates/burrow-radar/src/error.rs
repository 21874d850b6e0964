//! Error types for burrow-radar.

use thiserror::Error;

use crate::neighbour::NeighId;

/// Result type for radar operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning or tracking neighbours.
#[derive(Debug, Error)]
pub enum Error {
    /// A second radar loop was started on the same instance.
    #[error("radar is already running")]
    AlreadyRunning,

    /// The broadcast transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Nobody released the gateway rendezvous in time.
    #[error("timed out waiting for gateway {0}")]
    GatewayTimeout(NeighId),
}
