//! Network collisions: two networks with different netids meet, and the
//! smaller one rehooks into the larger.

use std::collections::BTreeMap;
use std::sync::Arc;

use burrow_radar::{Neigh, NeighFilter};
use burrow_topology::{LevelMap, NetId};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hook::{Hook, HookOutcome, HookRequest};

/// Rough size of the network seen from `map`: the nodes alive at every
/// level, counting ourselves once.
pub fn estimated_size(map: &LevelMap) -> usize {
    map.node_nb_all()
        .iter()
        .map(|nb| nb.saturating_sub(1))
        .sum::<usize>()
        + 1
}

/// The foreign netid we should join, if any.
///
/// Networks compare by `(size, netid)`; the larger pair wins, so two
/// networks of equal size still agree on which one moves.
pub fn collision_winner(local: (usize, NetId), remotes: &[(NetId, usize)]) -> Option<NetId> {
    let (size, netid) = remotes
        .iter()
        .map(|&(netid, size)| (size, netid))
        .max()?;
    ((size, netid) > local).then_some(netid)
}

impl Hook {
    /// Answer a neighbour's network size query.
    pub async fn network_size(&self) -> Result<usize> {
        if self.status.is_zombie() {
            return Err(Error::Zombie);
        }
        Ok(estimated_size(&*self.map.read().await))
    }

    /// Compare our network with the foreign networks around us, and rehook
    /// into the winner if it is not ours.
    ///
    /// Returns `None` when no rehook was started.
    pub async fn check_collision(self: &Arc<Self>) -> Option<HookOutcome> {
        if !self.status.is_hooked() {
            return None;
        }
        let mine = self.table.netid();
        if mine.is_none() {
            return None;
        }

        let mut foreign: BTreeMap<NetId, Vec<Neigh>> = BTreeMap::new();
        for nr in self.table.neigh_list(NeighFilter::OutOfMyNetwork) {
            if !nr.netid.is_none() {
                foreign.entry(nr.netid).or_default().push(nr);
            }
        }
        if foreign.is_empty() {
            return None;
        }

        let mut remotes = Vec::new();
        for (netid, neighs) in &foreign {
            for nr in neighs {
                match self.rpc(self.transport.network_size(nr)).await {
                    Ok(size) => {
                        debug!(%netid, size, "foreign network size");
                        remotes.push((*netid, size));
                        break;
                    }
                    Err(e) => debug!(neigh = %nr.ip, error = %e, "no network size answer"),
                }
            }
        }

        let local = self.network_size().await.ok()?;
        let winner = collision_winner((local, mine), &remotes)?;
        let candidates = foreign.remove(&winner)?;
        info!(
            ours = %mine,
            theirs = %winner,
            size = local,
            "network collision, joining the larger network"
        );
        self.status.set_gonna_hook(true);
        Some(self.hook(HookRequest::network_collision(candidates)).await)
    }
}
