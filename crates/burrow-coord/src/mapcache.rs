//! The coordinator's replica of its gnode's slot occupancy.

use std::collections::HashMap;
use std::time::Duration;

use burrow_topology::{LevelMap, MapEvent, Nip, SlotId, Topology};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

/// A mapcache as shipped to another coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapPacket {
    /// Nip of the sender; the receiver only adopts the levels it shares.
    pub nip: Nip,
    /// Alive rows, lowest level first.
    pub rows: Vec<Vec<bool>>,
}

/// Slot occupancy as seen by a coordinator, plus departures that were
/// granted but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct MapCache {
    map: LevelMap,
    pending: HashMap<(usize, SlotId), Instant>,
}

impl MapCache {
    /// Copy the occupancy of the node's own map.
    pub fn from_map(map: &LevelMap) -> Self {
        trace!("copying a mapcache from the level map");
        let mut cache = Self {
            map: LevelMap::new(*map.topology(), map.me().clone()),
            pending: HashMap::new(),
        };
        for (lvl, row) in map.rows().iter().enumerate() {
            for (id, &alive) in row.iter().enumerate() {
                if alive {
                    cache.alive_node_add(lvl, id as SlotId);
                }
            }
        }
        cache
    }

    pub fn me(&self) -> &Nip {
        self.map.me()
    }

    pub fn topology(&self) -> &Topology {
        self.map.topology()
    }

    pub fn is_alive(&self, lvl: usize, id: SlotId) -> bool {
        self.map.is_alive(lvl, id)
    }

    pub fn has_slot(&self, lvl: usize, id: SlotId) -> bool {
        self.map.has_slot(lvl, id)
    }

    pub fn free_nodes_nb(&self, lvl: usize) -> usize {
        self.map.free_nodes_nb(lvl)
    }

    pub fn free_nodes_list(&self, lvl: usize) -> Vec<SlotId> {
        self.map.free_nodes_list(lvl)
    }

    pub fn alive_node_add(&mut self, lvl: usize, id: SlotId) -> bool {
        self.map.node_add(lvl, id)
    }

    pub fn node_del(&mut self, lvl: usize, id: SlotId) -> bool {
        self.map.node_del(lvl, id)
    }

    pub fn me_changed(&mut self, new_me: Nip) {
        self.map.me_change(new_me);
        trace!(mapcache = %self.repr_me(), "mapcache updated after me change");
    }

    /// Follow a change of the routing map.
    pub fn apply(&mut self, event: &MapEvent) {
        match event {
            MapEvent::NodeNew { lvl, id } => {
                self.alive_node_add(*lvl, *id);
            }
            MapEvent::NodeDeleted { lvl, id } => {
                // The routing map confirms the departure
                self.pending.remove(&(*lvl, *id));
                self.node_del(*lvl, *id);
            }
            MapEvent::MeChanged { new, .. } => self.me_changed(new.clone()),
        }
    }

    /// Free a slot and remember when, until the departure is acknowledged.
    pub fn tmp_deleted_add(&mut self, lvl: usize, id: SlotId) {
        self.pending.insert((lvl, id), Instant::now());
        self.map.node_del(lvl, id);
    }

    /// Forget a pending departure.
    pub fn tmp_deleted_del(&mut self, lvl: usize, id: SlotId) -> bool {
        self.pending.remove(&(lvl, id)).is_some()
    }

    pub fn is_pending(&self, lvl: usize, id: SlotId) -> bool {
        self.pending.contains_key(&(lvl, id))
    }

    /// Restore every departure older than `timeout`: an unacknowledged
    /// departure means the member never left. Returns the restored slots.
    pub fn purge_pending(&mut self, timeout: Duration) -> Vec<(usize, SlotId)> {
        let now = Instant::now();
        let expired: Vec<(usize, SlotId)> = self
            .pending
            .iter()
            .filter(|(_, at)| now.duration_since(**at) >= timeout)
            .map(|(&slot, _)| slot)
            .collect();
        for &(lvl, id) in &expired {
            self.pending.remove(&(lvl, id));
            self.map.node_add(lvl, id);
            debug!(lvl, id, "unacknowledged departure restored");
        }
        expired
    }

    pub fn map_data_pack(&self) -> MapPacket {
        MapPacket {
            nip: self.me().clone(),
            rows: self.map.rows().to_vec(),
        }
    }

    /// Adopt another coordinator's view of the levels we share with it.
    ///
    /// Our own slot never goes from alive to free because of a merge.
    pub fn map_data_merge(&mut self, packet: &MapPacket) {
        let levels = self.map.levels();
        let me = self.me().clone();
        let me_was: Vec<bool> = (0..levels)
            .map(|lvl| self.map.is_alive(lvl, me.get(lvl)))
            .collect();

        let from = self.topology().nip_cmp(&packet.nip, &me).unwrap_or(0);
        debug!(from_level = from, remote = %packet.nip, "merging a mapcache");
        for lvl in from..levels.min(packet.rows.len()) {
            for (id, &alive) in packet.rows[lvl].iter().enumerate() {
                let id = id as SlotId;
                if id >= self.topology().gsize() {
                    break;
                }
                if alive {
                    self.map.node_add(lvl, id);
                } else {
                    self.map.node_del(lvl, id);
                }
            }
        }

        for (lvl, was) in me_was.into_iter().enumerate() {
            if was {
                self.map.node_add(lvl, me.get(lvl));
            }
        }
        trace!(mapcache = %self.repr_me(), "mapcache merged");
    }

    pub fn repr_me(&self) -> String {
        self.map.repr_me()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cache(me: &[SlotId]) -> MapCache {
        let topo = Topology::new(2, 8).unwrap();
        MapCache::from_map(&LevelMap::new(topo, Nip::new(me.to_vec())))
    }

    #[test]
    fn copies_the_level_map() {
        let topo = Topology::new(2, 8).unwrap();
        let mut map = LevelMap::new(topo, Nip::new(vec![1, 2]));
        map.node_add(0, 5);
        let cache = MapCache::from_map(&map);
        assert!(cache.is_alive(0, 5));
        assert!(cache.is_alive(0, 1));
        assert_eq!(cache.free_nodes_nb(0), 6);
    }

    #[test]
    fn merge_adopts_shared_levels_only() {
        let mut local = cache(&[1, 2]);
        local.alive_node_add(1, 6);

        // Same gnode of level 1: both rows are shared
        let mut remote = cache(&[3, 2]);
        remote.alive_node_add(0, 4);
        local.map_data_merge(&remote.map_data_pack());
        assert!(local.is_alive(0, 4));
        assert!(local.is_alive(0, 3));
        assert!(!local.is_alive(1, 6));

        // Different gnode of level 1: row 0 is theirs, not ours
        let mut local = cache(&[1, 2]);
        let mut other = cache(&[3, 5]);
        other.alive_node_add(0, 7);
        local.map_data_merge(&other.map_data_pack());
        assert!(!local.is_alive(0, 7));
        assert!(local.is_alive(1, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_restores_only_expired_departures() {
        let mut cache = cache(&[1, 2]);
        cache.alive_node_add(0, 3);
        cache.alive_node_add(0, 4);

        cache.tmp_deleted_add(0, 3);
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.tmp_deleted_add(0, 4);
        tokio::time::advance(Duration::from_secs(12)).await;

        assert_eq!(cache.purge_pending(Duration::from_secs(32)), vec![(0, 3)]);
        assert!(cache.is_alive(0, 3));
        assert!(!cache.is_alive(0, 4));
        assert!(cache.is_pending(0, 4));

        assert!(cache.tmp_deleted_del(0, 4));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.purge_pending(Duration::from_secs(32)).is_empty());
        assert!(!cache.is_alive(0, 4));
    }

    #[test]
    fn map_deletion_confirms_departure() {
        let mut cache = cache(&[1, 2]);
        cache.alive_node_add(0, 3);
        cache.tmp_deleted_add(0, 3);
        cache.apply(&MapEvent::NodeDeleted { lvl: 0, id: 3 });
        assert!(!cache.is_pending(0, 3));
    }

    proptest! {
        #[test]
        fn merge_never_frees_own_slot(
            me in proptest::collection::vec(0u16..8, 2),
            remote in proptest::collection::vec(0u16..8, 2),
            rows in proptest::collection::vec(proptest::collection::vec(any::<bool>(), 8), 2),
        ) {
            let mut local = cache(&me);
            let packet = MapPacket { nip: Nip::new(remote), rows };
            local.map_data_merge(&packet);
            for lvl in 0..2 {
                prop_assert!(local.is_alive(lvl, me[lvl]));
            }
        }
    }
}
