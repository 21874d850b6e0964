//! Communicating vessels and gnode splits.
//!
//! Nodes drift from crowded gnodes towards neighbouring gnodes with more
//! room, and the smaller side of a broken gnode rehooks elsewhere after a
//! zombie cooldown.

use std::sync::Arc;

use burrow_radar::{Neigh, NeighFilter};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hook::{Hook, HookRequest};
use crate::transport::Hfn;

/// Highest level whose count dropped by at least what is left of it.
pub(crate) fn split_level(old_node_nb: &[usize], cur_node_nb: &[usize]) -> Option<usize> {
    (0..old_node_nb.len().min(cur_node_nb.len())).rev().find(|&lvl| {
        let (old, cur) = (old_node_nb[lvl], cur_node_nb[lvl]);
        old > cur && old - cur >= cur
    })
}

impl Hook {
    /// Answer a neighbour's highest-free-nodes query.
    pub async fn highest_free_nodes(&self) -> Result<Hfn> {
        if self.status.is_zombie() {
            return Err(Error::Zombie);
        }
        let map = self.map.read().await;
        for lvl in (0..map.levels()).rev() {
            let free = map.free_nodes_list(lvl);
            if !free.is_empty() {
                return Ok(Hfn {
                    level: Some(lvl),
                    free,
                });
            }
        }
        Ok(Hfn::none())
    }

    /// Answer a neighbour's free-nodes query for level `lvl`. Levels above
    /// the topology have no free slots.
    pub async fn free_nodes_nb(&self, lvl: usize) -> Result<usize> {
        if self.status.is_zombie() {
            return Err(Error::Zombie);
        }
        Ok(self.map.read().await.free_nodes_nb(lvl))
    }

    /// Detect that our side of a gnode split off as the smaller part. If so,
    /// turn zombie and schedule a rehook after the cooldown.
    pub fn gnodes_split(self: &Arc<Self>, old_node_nb: &[usize], cur_node_nb: &[usize]) -> bool {
        let Some(lvl) = split_level(old_node_nb, cur_node_nb) else {
            return false;
        };
        info!(
            level = lvl + 1,
            cooldown = ?self.config.zombie_cooldown,
            "gnode split, we are on the smaller side"
        );
        let zombie_id: u32 = rand::random();
        self.status.set_zombie_id(zombie_id);
        self.spawn_rehook_after_delay(zombie_id);
        true
    }

    fn spawn_rehook_after_delay(self: &Arc<Self>, zombie_id: u32) {
        let hook = Arc::clone(self);
        let delay = self.config.zombie_cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !hook.status.unset_zombie_id(zombie_id) {
                debug!(zombie_id, "zombie token superseded, no rehook");
                return;
            }
            info!("split cooldown over, rehooking");
            hook.status.set_gonna_hook(true);
            hook.hook(HookRequest::group_split(Vec::new())).await;
        });
    }

    /// Look for neighbouring gnodes with clearly more room and move there.
    ///
    /// `old_node_nb` and `cur_node_nb` are the per-level node counts before
    /// and after a map update; both are `None` when a neighbour asked us to
    /// run the check.
    pub async fn communicating_vessels(
        self: &Arc<Self>,
        old_node_nb: Option<&[usize]>,
        cur_node_nb: Option<&[usize]>,
    ) -> Result<()> {
        if self.status.is_zombie() {
            return Err(Error::Zombie);
        }

        if let (Some(old), Some(cur)) = (old_node_nb, cur_node_nb) {
            if self.gnodes_split(old, cur) {
                return Ok(());
            }
            if old.first() == cur.first() {
                debug!("no node came or went at level 0");
                return Ok(());
            }
        }

        let (topo, me, my_free) = {
            let map = self.map.read().await;
            (*map.topology(), map.me().clone(), map.free_nodes_nb(0))
        };

        let mut candidates: Vec<(Neigh, usize)> = Vec::new();
        let mut inv_candidates: Vec<(Neigh, usize)> = Vec::new();
        for nr in self.table.neigh_list(NeighFilter::InMyNetwork) {
            let Ok(nrnip) = topo.ip_to_nip(nr.ip) else {
                continue;
            };
            // Only neighbours in other gnodes of level 1
            if topo.nip_cmp(&me, &nrnip).map_or(true, |lvl| lvl == 0) {
                continue;
            }
            let fnb = match self.rpc(self.transport.free_nodes_nb(&nr, 0)).await {
                Ok(fnb) => fnb,
                Err(e) => {
                    debug!(neigh = %nrnip, error = %e, "no free nodes answer");
                    continue;
                }
            };
            debug!(neigh = %nrnip, free = fnb, "neighbour gnode free nodes");
            if fnb + 1 < my_free {
                inv_candidates.push((nr, fnb));
            } else if my_free + 1 < fnb {
                candidates.push((nr, fnb));
            }
        }

        if let Some((nr, _)) = inv_candidates.iter().min_by_key(|(_, fnb)| *fnb) {
            debug!(neigh = %nr.ip, "asking a fuller gnode to run its own check");
            if let Err(e) = self.rpc(self.transport.communicating_vessels(nr)).await {
                debug!(neigh = %nr.ip, error = %e, "remote vessels check failed");
            }
        }

        if candidates.is_empty() {
            return Ok(());
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        if !self.status.is_hooked() {
            debug!("already rehooking, vessels move skipped");
            return Ok(());
        }
        let gfree_new = candidates[0].1;
        info!(gfree_new, my_free, "a neighbouring gnode has more room, rehooking");
        self.status.set_gonna_hook(true);
        let request = HookRequest::communicating_vessels(
            candidates.into_iter().map(|(nr, _)| nr).collect(),
            gfree_new,
        );
        self.hook(request).await;
        Ok(())
    }
}
