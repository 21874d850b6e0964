//! What the coordinator needs from the rest of the node.

use async_trait::async_trait;
use burrow_topology::Nip;

use crate::error::Result;
use crate::mapcache::MapPacket;

/// Finds the participant closest to an ideal address (the `H` function).
#[async_trait]
pub trait ParticipantResolver: Send + Sync {
    /// Nearest known coordinator participant to `hip`, if any.
    async fn nearest(&self, hip: &Nip) -> Option<Nip>;
}

/// Reaches the coordinator responsible for an ideal address.
#[async_trait]
pub trait CoordinatorLink: Send + Sync {
    /// Hand our mapcache to the coordinator of `level` nearest to `hip`.
    async fn send_mapcache(&self, level: usize, hip: &Nip, packet: MapPacket) -> Result<()>;
}
