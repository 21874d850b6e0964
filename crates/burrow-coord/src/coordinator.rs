//! Gnode coordinator.
//!
//! Every gnode of level `l + 1` has one coordinator: the participant nearest
//! to the gnode's ideal address `h(l + 1, me)`, the node's own nip with every
//! slot below `l + 1` zeroed. The coordinator hands out free slots of level
//! `l` to joining nodes and takes them back from leaving ones.
//!
//! # Optimistic checks
//!
//! A node moving between two gnodes to even out their sizes passes the free
//! slot count it saw at the destination. The old coordinator only lets it go
//! if the destination really is emptier, and the new one only lets it in if
//! it still is:
//!
//! ```text
//! going_out(lvl, id, Some(n))  ok iff  free_here < n - 1
//! going_in(lvl, Some(n))       ok iff  free_here > n
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use burrow_topology::{MapEvent, Nip, SlotId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::link::{CoordinatorLink, ParticipantResolver};
use crate::mapcache::{MapCache, MapPacket};

/// Configuration for a coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long a granted departure may stay unacknowledged.
    pub pending_departure_timeout: Duration,

    /// Period of the pending departure sweep.
    pub purge_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pending_departure_timeout: Duration::from_secs(32),
            purge_interval: Duration::from_secs(8),
        }
    }
}

impl CoordinatorConfig {
    #[must_use]
    pub fn with_pending_departure_timeout(mut self, timeout: Duration) -> Self {
        self.pending_departure_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }
}

/// The coordinator service of one node, for every level.
pub struct Coordinator {
    config: CoordinatorConfig,
    mapcache: RwLock<MapCache>,
    /// `coordnode[l]`: who we believe coordinates our gnode of level `l`.
    /// Index 0 is unused.
    coordnode: RwLock<Vec<Option<Nip>>>,
    resolver: Arc<dyn ParticipantResolver>,
    link: Arc<dyn CoordinatorLink>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        mapcache: MapCache,
        resolver: Arc<dyn ParticipantResolver>,
        link: Arc<dyn CoordinatorLink>,
    ) -> Self {
        let levels = mapcache.topology().levels();
        Self {
            config,
            mapcache: RwLock::new(mapcache),
            coordnode: RwLock::new(vec![None; levels + 1]),
            resolver,
            link,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Snapshot of the mapcache.
    pub async fn mapcache(&self) -> MapCache {
        self.mapcache.read().await.clone()
    }

    pub async fn free_nodes_nb(&self, lvl: usize) -> usize {
        self.mapcache.read().await.free_nodes_nb(lvl)
    }

    /// Believed coordinator of our gnode of `level`.
    pub async fn coordnode(&self, level: usize) -> Option<Nip> {
        self.coordnode.read().await.get(level).cloned().flatten()
    }

    /// A member of our gnode of level `lvl + 1` wants to leave it.
    ///
    /// Returns the new free slot count, or `None` if the departure is denied
    /// or the slot was not alive.
    pub async fn going_out(&self, lvl: usize, id: SlotId, gfree_new: Option<usize>) -> Option<usize> {
        let mut cache = self.mapcache.write().await;
        if !cache.has_slot(lvl, id) {
            debug!(lvl, id, "going_out for a slot outside the topology");
            return None;
        }
        let free = cache.free_nodes_nb(lvl);
        if let Some(gfree_new) = gfree_new {
            if free + 1 >= gfree_new {
                debug!(lvl, id, free, gfree_new, "going_out denied");
                return None;
            }
        }
        if !cache.is_alive(lvl, id) {
            debug!(lvl, id, "going_out for a free slot");
            return None;
        }
        cache.tmp_deleted_add(lvl, id);
        let free = cache.free_nodes_nb(lvl);
        info!(lvl, id, free, "member going out");
        Some(free)
    }

    /// The member that left `(lvl, id)` confirmed its migration.
    pub async fn going_out_ok(&self, lvl: usize, id: SlotId) {
        if self.mapcache.write().await.tmp_deleted_del(lvl, id) {
            debug!(lvl, id, "departure acknowledged");
        }
    }

    /// A node wants to join our gnode of level `lvl + 1`.
    ///
    /// Returns its new nip: a free slot at `lvl`, random valid slots below.
    pub async fn going_in(&self, lvl: usize, gfree_old: Option<usize>) -> Option<Nip> {
        let mut cache = self.mapcache.write().await;
        if lvl >= cache.topology().levels() {
            debug!(lvl, "going_in above the top level");
            return None;
        }
        trace!(lvl, mapcache = %cache.repr_me(), "going_in");
        let free = cache.free_nodes_nb(lvl);
        if let Some(gfree_old) = gfree_old {
            if free <= gfree_old {
                debug!(lvl, free, gfree_old, "going_in denied");
                return None;
            }
        }

        let newnip = {
            let mut rng = rand::thread_rng();
            let fnl = cache.free_nodes_list(lvl);
            let id = *fnl.choose(&mut rng)?;
            let topo = *cache.topology();
            let mut newnip = cache.me().clone();
            newnip.set(lvl, id);
            for l in (0..lvl).rev() {
                let ids = topo.valid_ids(l);
                if let Some(&slot) = ids.choose(&mut rng) {
                    newnip.set(l, slot);
                }
            }
            newnip
        };
        cache.alive_node_add(lvl, newnip.get(lvl));
        info!(lvl, nip = %newnip, "member going in");
        Some(newnip)
    }

    /// Restore departures that were never acknowledged.
    pub async fn purge_pending(&self) -> Vec<(usize, SlotId)> {
        self.mapcache
            .write()
            .await
            .purge_pending(self.config.pending_departure_timeout)
    }

    /// Run [`purge_pending`](Self::purge_pending) every `purge_interval`
    /// until the coordinator is dropped.
    pub fn spawn_purger(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.purge_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coord) = weak.upgrade() else { break };
                let restored = coord.purge_pending().await;
                if !restored.is_empty() {
                    info!(count = restored.len(), "restored unacknowledged departures");
                }
            }
        })
    }

    /// Recompute who coordinates each of our gnodes.
    pub async fn coord_nodes_set(&self) {
        let me = self.mapcache.read().await.me().clone();
        let topo = *self.mapcache.read().await.topology();
        let mut nodes = vec![None; topo.levels() + 1];
        for lvl in 0..topo.levels() {
            let hip = topo.project(lvl + 1, &me);
            nodes[lvl + 1] = self.resolver.nearest(&hip).await;
        }
        trace!(?nodes, "coordinator nodes");
        *self.coordnode.write().await = nodes;
    }

    /// Become a participant of the coordinator service.
    pub async fn participate(&self) {
        self.coord_nodes_set().await;
    }

    /// A participant appeared at slot `id` of level `lvl`: it may now be
    /// the coordinator of our gnode of level `lvl + 1`.
    pub async fn new_participant_joined(&self, lvl: usize, id: SlotId) -> Result<()> {
        let level = lvl + 1;
        let (me, topo) = {
            let cache = self.mapcache.read().await;
            (cache.me().clone(), *cache.topology())
        };
        if lvl >= topo.levels() {
            return Ok(());
        }

        let it_was_me = self.coordnode(level).await.as_ref() == Some(&me);
        let hip = topo.project(level, &me);
        let Some(best) = self.resolver.nearest(&hip).await else {
            return Ok(());
        };

        // The participant shares our slots above lvl and holds `id` at lvl
        let is_new_participant =
            best.get(lvl) == id && (lvl + 1..topo.levels()).all(|j| best.get(j) == me.get(j));
        if !is_new_participant {
            return Ok(());
        }

        if let Some(slot) = self.coordnode.write().await.get_mut(level) {
            *slot = Some(best.clone());
        }
        info!(level, coordinator = %best, "new coordinator for our gnode");

        if it_was_me && best != me {
            debug!(level, to = %best, "handing our mapcache to the new coordinator");
            let packet = self.map_data_pack().await;
            self.link.send_mapcache(level, &hip, packet).await?;
        }
        Ok(())
    }

    pub async fn map_data_pack(&self) -> MapPacket {
        self.mapcache.read().await.map_data_pack()
    }

    /// Merge a mapcache handed over by the previous coordinator.
    pub async fn map_data_merge(&self, packet: &MapPacket) {
        self.mapcache.write().await.map_data_merge(packet);
    }

    /// Follow a change of the routing map.
    pub async fn on_map_event(&self, event: &MapEvent) {
        self.mapcache.write().await.apply(event);
    }

    pub async fn me_changed(&self, new_me: Nip) {
        self.mapcache.write().await.me_changed(new_me);
    }

    /// Replace the mapcache, e.g. after the node reset its map.
    pub async fn reset(&self, mapcache: MapCache) {
        *self.mapcache.write().await = mapcache;
    }
}
