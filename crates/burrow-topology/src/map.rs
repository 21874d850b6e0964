//! Per-node level map: which slots of each level are occupied.

use crate::nip::{Nip, SlotId, Topology};

/// Membership change of a [`LevelMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MapEvent {
    /// Slot `id` of level `lvl` became alive.
    NodeNew { lvl: usize, id: SlotId },
    /// Slot `id` of level `lvl` became free.
    NodeDeleted { lvl: usize, id: SlotId },
    /// The local nip changed.
    MeChanged { old: Nip, new: Nip },
}

/// Occupancy of every level of the gnode chain containing `me`.
///
/// Row `lvl` describes the gnodes of level `lvl` inside our gnode of level
/// `lvl + 1`. Our own slot is alive in every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMap {
    topology: Topology,
    me: Nip,
    alive: Vec<Vec<bool>>,
}

impl LevelMap {
    /// Create a map containing only ourself.
    pub fn new(topology: Topology, me: Nip) -> Self {
        let alive = vec![vec![false; topology.gsize() as usize]; topology.levels()];
        let mut map = Self { topology, me, alive };
        map.mark_me_alive();
        map
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn me(&self) -> &Nip {
        &self.me
    }

    pub fn levels(&self) -> usize {
        self.topology.levels()
    }

    fn mark_me_alive(&mut self) {
        for lvl in 0..self.levels() {
            let id = self.me.get(lvl) as usize;
            self.alive[lvl][id] = true;
        }
    }

    /// Does slot `id` of level `lvl` exist in this topology?
    ///
    /// Levels and slots often come from remote peers; every accessor below
    /// treats a slot outside the map as free and unchangeable.
    pub fn has_slot(&self, lvl: usize, id: SlotId) -> bool {
        lvl < self.levels() && id < self.topology.gsize()
    }

    fn slot_mut(&mut self, lvl: usize, id: SlotId) -> Option<&mut bool> {
        self.alive.get_mut(lvl)?.get_mut(id as usize)
    }

    /// Is slot `id` of level `lvl` occupied?
    pub fn is_alive(&self, lvl: usize, id: SlotId) -> bool {
        self.alive
            .get(lvl)
            .and_then(|row| row.get(id as usize))
            .copied()
            .unwrap_or(false)
    }

    /// Mark a slot alive. Returns true if it was free.
    pub fn node_add(&mut self, lvl: usize, id: SlotId) -> bool {
        let Some(slot) = self.slot_mut(lvl, id) else {
            return false;
        };
        let changed = !*slot;
        *slot = true;
        changed
    }

    /// Mark a slot free. Returns true if it was alive.
    pub fn node_del(&mut self, lvl: usize, id: SlotId) -> bool {
        let Some(slot) = self.slot_mut(lvl, id) else {
            return false;
        };
        let changed = *slot;
        *slot = false;
        changed
    }

    /// Free, assignable slots of level `lvl`. Empty above the top level.
    pub fn free_nodes_list(&self, lvl: usize) -> Vec<SlotId> {
        if lvl >= self.levels() {
            return Vec::new();
        }
        self.topology
            .valid_ids(lvl)
            .into_iter()
            .filter(|&id| !self.is_alive(lvl, id))
            .collect()
    }

    /// Number of free, assignable slots of level `lvl`.
    pub fn free_nodes_nb(&self, lvl: usize) -> usize {
        self.free_nodes_list(lvl).len()
    }

    /// Number of occupied slots of level `lvl`.
    pub fn node_nb(&self, lvl: usize) -> usize {
        self.alive
            .get(lvl)
            .map_or(0, |row| row.iter().filter(|&&a| a).count())
    }

    /// Occupied slot counts of every level, lowest level first.
    pub fn node_nb_all(&self) -> Vec<usize> {
        (0..self.levels()).map(|lvl| self.node_nb(lvl)).collect()
    }

    /// Is `nip` occupied according to this map?
    pub fn is_nip_used(&self, nip: &Nip) -> bool {
        match self.topology.nip_cmp(&self.me, nip) {
            None => true,
            Some(lvl) => self.is_alive(lvl, nip.get(lvl)),
        }
    }

    /// Forget every other node.
    pub fn map_reset(&mut self) {
        for row in &mut self.alive {
            row.iter_mut().for_each(|a| *a = false);
        }
        self.mark_me_alive();
    }

    /// Change our own nip, keeping the rest of the map.
    pub fn me_change(&mut self, new_me: Nip) -> MapEvent {
        let old = std::mem::replace(&mut self.me, new_me.clone());
        self.mark_me_alive();
        MapEvent::MeChanged { old, new: new_me }
    }

    /// Raw alive rows, lowest level first.
    pub fn rows(&self) -> &[Vec<bool>] {
        &self.alive
    }

    /// One line per level, highest first: `X` alive, `.` free.
    pub fn repr_me(&self) -> String {
        let mut out = String::new();
        for lvl in (0..self.levels()).rev() {
            let row: String = self.alive[lvl]
                .iter()
                .map(|&a| if a { 'X' } else { '.' })
                .collect();
            out.push_str(&format!("{}: {}\n", lvl, row));
        }
        out
    }
}
