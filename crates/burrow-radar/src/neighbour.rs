//! Neighbour table: the stable view of who answers our radar.
//!
//! The radar hands [`NeighborTable::store`] a fresh snapshot every round.
//! The table smooths it before anyone downstream sees it:
//!
//! - only the `max_neigh` closest peers are considered at all,
//! - a peer missing from a scan is kept for `scans_before_delete` rounds,
//! - RTT jitter below `rtt_variation_threshold` is swallowed.
//!
//! Every neighbour holds a small integer handle ([`NeighId`]) that route
//! installers use as a gateway id.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use burrow_topology::NetId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::NeighbourConfig;
use crate::gateway::GatewaySync;

/// Stable small-integer handle of a neighbour, `1..=max_neigh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NeighId(pub u32);

impl fmt::Display for NeighId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A neighbour is identified by its address and the network it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NeighKey {
    pub ip: IpAddr,
    pub netid: NetId,
}

impl NeighKey {
    pub fn new(ip: IpAddr, netid: NetId) -> Self {
        Self { ip, netid }
    }
}

impl fmt::Display for NeighKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ip, self.netid)
    }
}

/// Average RTT measured through one network device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevRtt {
    pub dev: String,
    pub rtt: Duration,
}

/// Snapshot of a neighbour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neigh {
    pub ip: IpAddr,
    pub netid: NetId,
    /// Handle, set once the table accepted the neighbour.
    pub id: Option<NeighId>,
    /// Devices ranked by ascending average RTT. Never empty.
    pub devs: Vec<DevRtt>,
}

impl Neigh {
    /// Build a neighbour from unranked per-device RTTs.
    pub fn new(ip: IpAddr, netid: NetId, mut devs: Vec<DevRtt>) -> Self {
        devs.sort_by_key(|d| d.rtt);
        Self {
            ip,
            netid,
            id: None,
            devs,
        }
    }

    pub fn key(&self) -> NeighKey {
        NeighKey::new(self.ip, self.netid)
    }

    /// The device with the lowest RTT.
    pub fn bestdev(&self) -> Option<&DevRtt> {
        self.devs.first()
    }

    /// RTT through the best device.
    pub fn rtt(&self) -> Duration {
        self.bestdev().map(|d| d.rtt).unwrap_or(Duration::MAX)
    }
}

/// Which neighbours [`NeighborTable::neigh_list`] returns.
///
/// The isolated netid is never part of any network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighFilter {
    All,
    InMyNetwork,
    OutOfMyNetwork,
    InNetid(NetId),
    OutOfNetid(NetId),
}

impl NeighFilter {
    fn accepts(&self, mine: NetId, theirs: NetId) -> bool {
        match self {
            NeighFilter::All => true,
            NeighFilter::InMyNetwork => mine.same_network(&theirs),
            NeighFilter::OutOfMyNetwork => !mine.same_network(&theirs),
            NeighFilter::InNetid(n) => n.same_network(&theirs),
            NeighFilter::OutOfNetid(n) => !n.same_network(&theirs),
        }
    }
}

/// Changes of the neighbour set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighbourEvent {
    New(Neigh),
    Deleted(Neigh),
    /// The RTT changed enough to matter for routing.
    RemChanged { neigh: Neigh, old_rtt: Duration },
}

#[derive(Debug, Default)]
struct TableState {
    netid: NetId,
    records: BTreeMap<NeighKey, Neigh>,
    missing: BTreeMap<NeighKey, u32>,
    handles: BTreeMap<NeighKey, NeighId>,
}

/// The neighbour table.
///
/// All methods take `&self`; the table is shared as `Arc<NeighborTable>`
/// between the radar, which is its only regular writer, and readers that
/// get cloned snapshots.
pub struct NeighborTable {
    config: NeighbourConfig,
    state: Mutex<TableState>,
    gateways: Arc<GatewaySync>,
    events: broadcast::Sender<NeighbourEvent>,
}

impl fmt::Debug for NeighborTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeighborTable")
            .field("netid", &self.netid())
            .field("neighbours", &self.len())
            .finish()
    }
}

/// Relative change between two RTTs, in `[0, 1]`.
pub fn rtt_variation(old: Duration, new: Duration) -> f64 {
    let hi = old.max(new);
    if hi.is_zero() {
        return 0.0;
    }
    let diff = if new > old { new - old } else { old - new };
    diff.as_secs_f64() / hi.as_secs_f64()
}

impl NeighborTable {
    pub fn new(config: NeighbourConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            state: Mutex::new(TableState::default()),
            gateways: Arc::new(GatewaySync::new()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: NeighbourEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn config(&self) -> &NeighbourConfig {
        &self.config
    }

    /// Subscribe to neighbour events.
    pub fn subscribe(&self) -> broadcast::Receiver<NeighbourEvent> {
        self.events.subscribe()
    }

    /// The gateway rendezvous shared with the route installer.
    pub fn gateways(&self) -> &Arc<GatewaySync> {
        &self.gateways
    }

    pub fn netid(&self) -> NetId {
        self.state().netid
    }

    pub fn change_netid(&self, netid: NetId) {
        let mut st = self.state();
        if st.netid != netid {
            info!(old = %st.netid, new = %netid, "netid changed");
            st.netid = netid;
        }
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_neigh_in_my_network(&self, neigh: &Neigh) -> bool {
        self.netid().same_network(&neigh.netid)
    }

    /// Neighbours accepted by `filter`, ordered by key.
    pub fn neigh_list(&self, filter: NeighFilter) -> Vec<Neigh> {
        let st = self.state();
        st.records
            .values()
            .filter(|n| filter.accepts(st.netid, n.netid))
            .cloned()
            .collect()
    }

    pub fn key_to_neigh(&self, key: &NeighKey) -> Option<Neigh> {
        self.state().records.get(key).cloned()
    }

    pub fn id_to_key(&self, id: NeighId) -> Option<NeighKey> {
        self.state()
            .handles
            .iter()
            .find(|(_, &h)| h == id)
            .map(|(k, _)| *k)
    }

    pub fn id_to_neigh(&self, id: NeighId) -> Option<Neigh> {
        let key = self.id_to_key(id)?;
        self.key_to_neigh(&key)
    }

    /// Handle of `key`, allocating the smallest free one if needed.
    ///
    /// A handle whose routes are still being retracted is not free. Returns
    /// `None` when all `max_neigh` handles are taken.
    pub fn key_to_id(&self, key: &NeighKey) -> Option<NeighId> {
        let mut st = self.state();
        self.alloc_id(&mut st, key)
    }

    fn alloc_id(&self, st: &mut TableState, key: &NeighKey) -> Option<NeighId> {
        if let Some(id) = st.handles.get(key) {
            return Some(*id);
        }
        let used: HashSet<NeighId> = st.handles.values().copied().collect();
        let id = (1..=self.config.max_neigh as u32)
            .map(NeighId)
            .find(|id| !used.contains(id) && !self.gateways.is_removing(*id))?;
        st.handles.insert(*key, id);
        Some(id)
    }

    /// Keep the `max_neigh` lowest-RTT candidates. Ties keep input order.
    pub fn truncate(&self, mut candidates: Vec<Neigh>) -> Vec<Neigh> {
        candidates.sort_by_key(Neigh::rtt);
        candidates.truncate(self.config.max_neigh);
        candidates
    }

    /// Replace the table with a new radar snapshot and notify the changes.
    ///
    /// Returns how much longer the radar should wait on its next round.
    pub fn store(&self, candidates: Vec<Neigh>) -> Duration {
        let mut fresh = self.truncate(candidates);
        let mut st = self.state();

        for n in &fresh {
            st.missing.remove(&n.key());
        }

        let present: HashSet<NeighKey> = fresh.iter().map(Neigh::key).collect();
        let known: Vec<NeighKey> = st.records.keys().copied().collect();
        for key in known.into_iter().filter(|k| !present.contains(k)) {
            let times = {
                let t = st.missing.entry(key).or_insert(0);
                *t += 1;
                *t
            };
            if times > self.config.scans_before_delete {
                st.missing.remove(&key);
                self.delete_locked(&mut st, &key);
            } else if let Some(stale) = st.records.get(&key) {
                debug!(neigh = %key, missed = times, "neighbour missing, keeping it");
                fresh.push(stale.clone());
            }
        }

        let old = std::mem::take(&mut st.records);
        for mut neigh in fresh {
            let key = neigh.key();
            match old.get(&key) {
                None => {
                    let Some(id) = self.alloc_id(&mut st, &key) else {
                        warn!(neigh = %key, "no free neighbour handle, ignoring");
                        continue;
                    };
                    neigh.id = Some(id);
                    info!(neigh = %key, id = %id, "new neighbour");
                    st.records.insert(key, neigh.clone());
                    self.gateways.announce_gw(id);
                    self.emit(NeighbourEvent::New(neigh));
                }
                Some(prev) => {
                    let variation = rtt_variation(prev.rtt(), neigh.rtt());
                    if variation > self.config.rtt_variation_threshold {
                        neigh.id = prev.id;
                        info!(
                            neigh = %key,
                            old_rtt = ?prev.rtt(),
                            new_rtt = ?neigh.rtt(),
                            "neighbour rem changed"
                        );
                        st.records.insert(key, neigh.clone());
                        self.emit(NeighbourEvent::RemChanged {
                            neigh,
                            old_rtt: prev.rtt(),
                        });
                    } else {
                        st.records.insert(key, prev.clone());
                    }
                }
            }
        }

        st.missing
            .values()
            .max()
            .map(|&m| self.config.increment_wait * m)
            .unwrap_or(Duration::ZERO)
    }

    fn delete_locked(&self, st: &mut TableState, key: &NeighKey) -> Option<Neigh> {
        let mut neigh = st.records.remove(key)?;
        let id = st.handles.remove(key);
        neigh.id = id;
        info!(neigh = %key, "neighbour removed");
        if let Some(id) = id {
            self.gateways.announce_gw_removing(id);
        }
        self.emit(NeighbourEvent::Deleted(neigh.clone()));
        Some(neigh)
    }

    /// Send `New` again for every neighbour.
    pub fn readvertise(&self) {
        info!("readvertising all neighbours");
        let st = self.state();
        for neigh in st.records.values() {
            if let Some(id) = neigh.id {
                self.gateways.announce_gw(id);
            }
            self.emit(NeighbourEvent::New(neigh.clone()));
        }
    }

    /// A neighbour moved from `(old_ip, old_netid)` to `(new_ip, new_netid)`.
    ///
    /// The record is deleted under the old key, the table waits for the
    /// routes through it to be retracted, then the record comes back under
    /// the new key. Unknown old keys are left to the next scan.
    pub async fn ip_netid_change(&self, old: NeighKey, new: NeighKey) {
        let removed = {
            let mut st = self.state();
            if !st.records.contains_key(&old) {
                debug!(neigh = %old, "ip/netid change for unknown neighbour, ignored");
                return;
            }
            st.missing.remove(&old);
            self.delete_locked(&mut st, &old)
        };
        let Some(removed) = removed else { return };
        info!(old = %old, new = %new, "neighbour changed ip/netid");

        if let Some(id) = removed.id {
            if let Err(e) = self
                .gateways
                .waitfor_gw_removable_timeout(id, self.config.gateway_wait_timeout)
                .await
            {
                warn!(error = %e, "routes through old gateway not retracted, re-adding anyway");
            }
        }

        let mut st = self.state();
        if st.records.contains_key(&new) {
            return;
        }
        let Some(id) = self.alloc_id(&mut st, &new) else {
            warn!(neigh = %new, "no free neighbour handle, ignoring");
            return;
        };
        let neigh = Neigh {
            ip: new.ip,
            netid: new.netid,
            id: Some(id),
            devs: removed.devs,
        };
        st.records.insert(new, neigh.clone());
        self.gateways.announce_gw(id);
        self.emit(NeighbourEvent::New(neigh));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn cand(last: u8, netid: NetId, rtt_ms: u64) -> Neigh {
        Neigh::new(
            ip(last),
            netid,
            vec![DevRtt {
                dev: "eth0".into(),
                rtt: Duration::from_millis(rtt_ms),
            }],
        )
    }

    fn drain(rx: &mut broadcast::Receiver<NeighbourEvent>) -> Vec<NeighbourEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn deletes(events: &[NeighbourEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, NeighbourEvent::Deleted(_)))
            .count()
    }

    #[test]
    fn new_neighbours_get_smallest_handles() {
        let table = NeighborTable::new(NeighbourConfig::default());
        let mut rx = table.subscribe();
        table.store(vec![cand(1, NetId::NONE, 5), cand(2, NetId::NONE, 3)]);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        let a = table.key_to_neigh(&NeighKey::new(ip(1), NetId::NONE)).unwrap();
        let b = table.key_to_neigh(&NeighKey::new(ip(2), NetId::NONE)).unwrap();
        // Truncation orders by RTT, so the faster peer is seen first
        assert_eq!(b.id, Some(NeighId(1)));
        assert_eq!(a.id, Some(NeighId(2)));
        assert_eq!(table.id_to_neigh(NeighId(2)).unwrap().ip, ip(1));
    }

    #[test]
    fn handles_run_out_at_max_neigh() {
        let table = NeighborTable::new(NeighbourConfig::default().with_max_neigh(2));
        assert_eq!(table.key_to_id(&NeighKey::new(ip(1), NetId::NONE)), Some(NeighId(1)));
        assert_eq!(table.key_to_id(&NeighKey::new(ip(2), NetId::NONE)), Some(NeighId(2)));
        assert_eq!(table.key_to_id(&NeighKey::new(ip(3), NetId::NONE)), None);
        assert_eq!(table.key_to_id(&NeighKey::new(ip(1), NetId::NONE)), Some(NeighId(1)));
    }

    #[test]
    fn missing_neighbour_survives_threshold_scans() {
        let table = NeighborTable::new(NeighbourConfig::default());
        let mut rx = table.subscribe();
        table.store(vec![cand(1, NetId::NONE, 5)]);
        drain(&mut rx);

        let waits: Vec<Duration> = (0..3).map(|_| table.store(vec![])).collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(3000)
            ]
        );
        assert_eq!(table.len(), 1);
        assert_eq!(deletes(&drain(&mut rx)), 0);

        assert_eq!(table.store(vec![]), Duration::ZERO);
        assert_eq!(table.len(), 0);
        assert_eq!(deletes(&drain(&mut rx)), 1);

        table.store(vec![]);
        assert_eq!(deletes(&drain(&mut rx)), 0);
    }

    #[test]
    fn reappearing_neighbour_resets_missed_counter() {
        let table = NeighborTable::new(NeighbourConfig::default());
        table.store(vec![cand(1, NetId::NONE, 5)]);
        table.store(vec![]);
        table.store(vec![]);
        assert_eq!(table.store(vec![cand(1, NetId::NONE, 5)]), Duration::ZERO);
        for _ in 0..3 {
            table.store(vec![]);
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn small_rtt_jitter_keeps_old_record() {
        let table = NeighborTable::new(NeighbourConfig::default());
        let mut rx = table.subscribe();
        table.store(vec![cand(1, NetId::NONE, 100)]);
        drain(&mut rx);

        table.store(vec![cand(1, NetId::NONE, 150)]);
        assert!(drain(&mut rx).is_empty());
        let kept = table.key_to_neigh(&NeighKey::new(ip(1), NetId::NONE)).unwrap();
        assert_eq!(kept.rtt(), Duration::from_millis(100));
    }

    #[test]
    fn large_rtt_change_fires_rem_changed() {
        let table = NeighborTable::new(NeighbourConfig::default());
        let mut rx = table.subscribe();
        table.store(vec![cand(1, NetId::NONE, 10)]);
        drain(&mut rx);

        table.store(vec![cand(1, NetId::NONE, 200)]);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            NeighbourEvent::RemChanged { neigh, old_rtt } => {
                assert_eq!(*old_rtt, Duration::from_millis(10));
                assert_eq!(neigh.rtt(), Duration::from_millis(200));
                assert_eq!(neigh.id, Some(NeighId(1)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn truncation_keeps_lowest_rtts_in_input_order() {
        let table = NeighborTable::new(NeighbourConfig::default().with_max_neigh(2));
        let kept = table.truncate(vec![
            cand(1, NetId::NONE, 30),
            cand(2, NetId::NONE, 10),
            cand(3, NetId::NONE, 10),
            cand(4, NetId::NONE, 10),
        ]);
        let ips: Vec<IpAddr> = kept.iter().map(|n| n.ip).collect();
        assert_eq!(ips, vec![ip(2), ip(3)]);
    }

    #[test]
    fn filters_never_put_isolated_nodes_in_a_network() {
        let table = NeighborTable::new(NeighbourConfig::default());
        table.change_netid(NetId::new(7));
        table.store(vec![
            cand(1, NetId::new(7), 5),
            cand(2, NetId::new(9), 5),
            cand(3, NetId::NONE, 5),
        ]);
        assert_eq!(table.neigh_list(NeighFilter::All).len(), 3);
        assert_eq!(table.neigh_list(NeighFilter::InMyNetwork).len(), 1);
        assert_eq!(table.neigh_list(NeighFilter::OutOfMyNetwork).len(), 2);
        assert_eq!(table.neigh_list(NeighFilter::InNetid(NetId::new(9))).len(), 1);
        assert_eq!(table.neigh_list(NeighFilter::InNetid(NetId::NONE)).len(), 0);
        assert_eq!(table.neigh_list(NeighFilter::OutOfNetid(NetId::new(9))).len(), 2);
    }

    #[test]
    fn readvertise_resends_new_events() {
        let table = NeighborTable::new(NeighbourConfig::default());
        let mut rx = table.subscribe();
        table.store(vec![cand(1, NetId::NONE, 5), cand(2, NetId::NONE, 6)]);
        drain(&mut rx);
        table.readvertise();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, NeighbourEvent::New(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn ip_netid_change_moves_record_after_gateway_release() {
        let table = Arc::new(NeighborTable::new(NeighbourConfig::default()));
        let mut rx = table.subscribe();
        table.store(vec![cand(1, NetId::NONE, 5)]);
        drain(&mut rx);

        let old = NeighKey::new(ip(1), NetId::NONE);
        let new = NeighKey::new(ip(9), NetId::new(3));
        let mover = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.ip_netid_change(old, new).await })
        };
        tokio::task::yield_now().await;
        assert!(table.key_to_neigh(&old).is_none());
        assert!(table.key_to_neigh(&new).is_none());

        table.gateways().announce_gw_removable(NeighId(1));
        mover.await.unwrap();

        let moved = table.key_to_neigh(&new).unwrap();
        assert_eq!(moved.id, Some(NeighId(1)));
        let events = drain(&mut rx);
        assert!(matches!(events[0], NeighbourEvent::Deleted(_)));
        assert!(matches!(events[1], NeighbourEvent::New(_)));
    }

    #[tokio::test]
    async fn handle_of_a_deleted_neighbour_waits_for_route_retraction() {
        let table = Arc::new(NeighborTable::new(NeighbourConfig::default()));
        let gw = Arc::clone(table.gateways());
        table.store(vec![cand(1, NetId::NONE, 5)]);
        gw.announce_gw_added(NeighId(1));
        for _ in 0..3 {
            table.store(vec![]);
        }

        let retract = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.waitfor_gw_removable(NeighId(1)).await })
        };
        tokio::task::yield_now().await;

        // The same snapshot deletes the old neighbour and brings a new one
        table.store(vec![cand(2, NetId::NONE, 5)]);
        let fresh = table.key_to_neigh(&NeighKey::new(ip(2), NetId::NONE)).unwrap();
        assert_eq!(fresh.id, Some(NeighId(2)));
        tokio::task::yield_now().await;
        assert!(!retract.is_finished());

        gw.announce_gw_removable(NeighId(1));
        retract.await.unwrap();
        assert!(gw.is_pending(NeighId(2)));

        table.store(vec![cand(2, NetId::NONE, 5), cand(3, NetId::NONE, 6)]);
        let next = table.key_to_neigh(&NeighKey::new(ip(3), NetId::NONE)).unwrap();
        assert_eq!(next.id, Some(NeighId(1)));
    }

    #[tokio::test]
    async fn ip_netid_change_ignores_unknown_neighbour() {
        let table = NeighborTable::new(NeighbourConfig::default());
        table
            .ip_netid_change(
                NeighKey::new(ip(1), NetId::NONE),
                NeighKey::new(ip(2), NetId::NONE),
            )
            .await;
        assert!(table.is_empty());
    }

    #[test]
    fn zero_rtts_never_vary() {
        assert_eq!(rtt_variation(Duration::ZERO, Duration::ZERO), 0.0);
        let v = rtt_variation(Duration::from_millis(200), Duration::from_millis(400));
        assert!((v - 0.5).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn deleted_exactly_once_after_threshold(threshold in 1u32..6, extra in 1u32..4) {
            let table = NeighborTable::new(NeighbourConfig::default().with_scans_before_delete(threshold));
            let mut rx = table.subscribe();
            table.store(vec![cand(1, NetId::NONE, 5)]);
            drain(&mut rx);

            for _ in 0..threshold {
                table.store(vec![]);
            }
            prop_assert_eq!(table.len(), 1);
            prop_assert_eq!(deletes(&drain(&mut rx)), 0);

            for _ in 0..extra {
                table.store(vec![]);
            }
            prop_assert_eq!(table.len(), 0);
            prop_assert_eq!(deletes(&drain(&mut rx)), 1);
        }

        #[test]
        fn truncation_retains_the_lowest_rtts(rtts in proptest::collection::vec(0u64..50, 0..24), max in 1usize..10) {
            let table = NeighborTable::new(NeighbourConfig::default().with_max_neigh(max));
            let cands: Vec<Neigh> = rtts
                .iter()
                .enumerate()
                .map(|(i, &r)| cand(i as u8, NetId::NONE, r))
                .collect();
            let kept = table.truncate(cands.clone());
            prop_assert_eq!(kept.len(), rtts.len().min(max));

            let mut expected = cands;
            expected.sort_by_key(Neigh::rtt);
            expected.truncate(max);
            prop_assert_eq!(kept, expected);
        }

        #[test]
        fn rem_changed_iff_variation_exceeds_threshold(old in 1u64..1000, new in 1u64..1000) {
            let table = NeighborTable::new(NeighbourConfig::default());
            table.store(vec![cand(1, NetId::NONE, old)]);
            let mut rx = table.subscribe();
            table.store(vec![cand(1, NetId::NONE, new)]);

            let fired = !drain(&mut rx).is_empty();
            let variation = rtt_variation(Duration::from_millis(old), Duration::from_millis(new));
            prop_assert_eq!(fired, variation > 0.9);

            let stored = table.key_to_neigh(&NeighKey::new(ip(1), NetId::NONE)).unwrap().rtt();
            let expected = if fired { new } else { old };
            prop_assert_eq!(stored, Duration::from_millis(expected));
        }
    }
}
