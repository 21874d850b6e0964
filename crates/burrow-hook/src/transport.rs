//! Remote calls made by the hook.

use std::net::IpAddr;

use async_trait::async_trait;
use burrow_radar::{Neigh, NeighKey};
use burrow_topology::{NetId, Nip, SlotId};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Highest level with a free slot, and the free slots of that level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hfn {
    pub level: Option<usize>,
    pub free: Vec<SlotId>,
}

impl Hfn {
    /// Nothing free at any level.
    pub fn none() -> Self {
        Self {
            level: None,
            free: Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.level.is_none()
    }
}

/// Address of a coordinator: the participant of `netid` nearest to `hip`,
/// serving gnodes of `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordTarget {
    pub level: usize,
    pub hip: Nip,
    pub netid: NetId,
    /// Neighbour to relay through while we have no route of our own.
    pub via: Option<IpAddr>,
}

/// Everything the hook asks of other nodes and of the host.
#[async_trait]
pub trait HookTransport: Send + Sync {
    /// Ask a neighbour for its highest free nodes.
    async fn highest_free_nodes(&self, neigh: &Neigh) -> Result<Hfn>;

    /// Ask a neighbour how many slots of level `lvl` are free in its gnode.
    async fn free_nodes_nb(&self, neigh: &Neigh, lvl: usize) -> Result<usize>;

    /// Ask a neighbour to run its own communicating vessels check.
    async fn communicating_vessels(&self, neigh: &Neigh) -> Result<()>;

    /// Ask a neighbour how large it thinks its network is.
    async fn network_size(&self, neigh: &Neigh) -> Result<usize>;

    /// Tell `neighs` that we moved from `old` to `new`. Fire and forget.
    async fn ip_netid_change(&self, neighs: &[Neigh], old: NeighKey, new: NeighKey);

    async fn going_out(
        &self,
        target: &CoordTarget,
        lvl: usize,
        id: SlotId,
        gfree_new: Option<usize>,
    ) -> Result<Option<usize>>;

    async fn going_in(
        &self,
        target: &CoordTarget,
        lvl: usize,
        gfree_old: Option<usize>,
    ) -> Result<Option<Nip>>;

    async fn going_out_ok(&self, target: &CoordTarget, lvl: usize, id: SlotId) -> Result<()>;

    /// Drop open sessions with former peers.
    async fn reset_sessions(&self);

    /// Configure `ip` on the local interfaces.
    async fn activate(&self, ip: IpAddr) -> Result<()>;
}
