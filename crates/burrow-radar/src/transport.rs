//! Broadcast transport used by the radar.

use std::net::IpAddr;

use async_trait::async_trait;
use burrow_topology::NetId;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A radar probe, broadcast on every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Per-process token of the sender, used to ignore our own probes.
    pub token: u64,
    /// Round the probe belongs to.
    pub round_id: u32,
}

/// Answer to a [`Probe`], carrying the replier's netid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub round_id: u32,
    pub netid: NetId,
}

/// Link-local broadcast used by the radar.
///
/// Whoever receives a probe calls [`Radar::reply`](crate::Radar::reply) with
/// the device and source address it arrived on. Whoever receives a reply
/// calls [`Radar::time_register`](crate::Radar::time_register).
#[async_trait]
pub trait RadarTransport: Send + Sync {
    /// Broadcast one probe on every device.
    async fn broadcast_probe(&self, probe: Probe) -> Result<()>;

    /// Send a reply to `to` through device `dev`.
    async fn send_reply(&self, dev: &str, to: IpAddr, reply: Reply) -> Result<()>;
}
