//! The simulated network: nodes, links and every transport seam.

use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use burrow_coord::{Coordinator, CoordinatorLink, MapCache, MapPacket, ParticipantResolver};
use burrow_hook::{CoordTarget, Hfn, Hook, HookOutcome, HookRequest, HookTransport, NodeStatus};
use burrow_radar::{Neigh, NeighKey, NeighborTable, Probe, Radar, RadarTransport, Reply};
use burrow_topology::{nearest_nip, LevelMap, MapEvent, NetId, Nip, SlotId, Topology};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::config::SimConfig;
use crate::error::{Error, Result};
use crate::node::{NodeSummary, SimNode};

/// Name of the only device of every simulated node.
const DEV: &str = "sim0";

/// How the node counts of one map changed in [`SimNet::sync_maps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountChange {
    pub node: usize,
    pub old: Vec<usize>,
    pub cur: Vec<usize>,
}

/// State of the whole network, as printed by the driver.
#[derive(Debug, Clone, Serialize)]
pub struct NetSummary {
    pub nodes: Vec<NodeSummary>,
    pub netids: Vec<NetId>,
}

/// Events turning `old` into `new`, lowest level first.
pub(crate) fn map_diff(old: &LevelMap, new: &LevelMap) -> Vec<MapEvent> {
    let mut events = Vec::new();
    for lvl in 0..old.levels() {
        for id in 0..old.topology().gsize() {
            match (old.is_alive(lvl, id), new.is_alive(lvl, id)) {
                (false, true) => events.push(MapEvent::NodeNew { lvl, id }),
                (true, false) => events.push(MapEvent::NodeDeleted { lvl, id }),
                _ => {}
            }
        }
    }
    events
}

/// Nodes connected by undirected links.
pub struct SimNet {
    config: SimConfig,
    topology: Topology,
    nodes: Mutex<Vec<Arc<SimNode>>>,
    links: Mutex<BTreeSet<(usize, usize)>>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for SimNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNet")
            .field("topology", &self.topology)
            .field("nodes", &self.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn link_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl SimNet {
    pub fn new(config: SimConfig) -> Result<Arc<Self>> {
        let topology = config.topology()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Arc::new(Self {
            config,
            topology,
            nodes: Mutex::new(Vec::new()),
            links: Mutex::new(BTreeSet::new()),
            rng: Mutex::new(rng),
        }))
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn len(&self) -> usize {
        lock(&self.nodes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, index: usize) -> Result<Arc<SimNode>> {
        lock(&self.nodes)
            .get(index)
            .cloned()
            .ok_or(Error::UnknownNode(index))
    }

    fn alive_nodes(&self) -> Vec<Arc<SimNode>> {
        lock(&self.nodes)
            .iter()
            .filter(|n| n.is_alive())
            .cloned()
            .collect()
    }

    /// Add a fresh node at a random unused address. It has no netid until it
    /// hooks.
    pub fn add_node(self: &Arc<Self>) -> Result<usize> {
        let used: HashSet<IpAddr> = lock(&self.nodes).iter().map(|n| n.ip()).collect();
        let nip = {
            let mut rng = lock(&self.rng);
            let mut found = None;
            for _ in 0..1024 {
                let nip = self.topology.random_nip(&mut *rng);
                if !used.contains(&self.topology.nip_to_ip(&nip)) {
                    found = Some(nip);
                    break;
                }
            }
            found.ok_or(Error::AddressSpaceFull)?
        };
        self.add_node_at(nip, NetId::NONE)
    }

    /// Add a node at `nip`. With a netid the node starts already hooked.
    pub fn add_node_at(self: &Arc<Self>, nip: Nip, netid: NetId) -> Result<usize> {
        self.topology.check(&nip)?;
        let mut nodes = lock(&self.nodes);
        let index = nodes.len();
        let link = Arc::new(SimLink {
            net: Arc::downgrade(self),
            index,
        });

        let map = LevelMap::new(self.topology, nip.clone());
        let coordinator = Arc::new(Coordinator::new(
            self.config.coordinator.clone(),
            MapCache::from_map(&map),
            link.clone(),
            link.clone(),
        ));
        let map = Arc::new(RwLock::new(map));
        let table = Arc::new(NeighborTable::new(self.config.radar.neighbour.clone()));
        table.change_netid(netid);
        let radar = Arc::new(Radar::new(self.config.radar.clone(), table.clone(), link.clone()));
        let status = Arc::new(NodeStatus::new());
        if !netid.is_none() {
            status.set_hooking(true);
            status.set_hooking(false);
        }
        let hook = Arc::new(Hook::new(
            self.config.hook.clone(),
            status.clone(),
            table.clone(),
            map.clone(),
            coordinator.clone(),
            link,
        ));

        let ip = self.topology.nip_to_ip(&nip);
        debug!(node = index, %nip, %netid, "node added");
        nodes.push(Arc::new(SimNode::new(
            index,
            ip,
            status,
            table,
            map,
            radar,
            coordinator,
            hook,
        )));
        Ok(index)
    }

    pub fn link(&self, a: usize, b: usize) {
        if a != b {
            lock(&self.links).insert(link_key(a, b));
        }
    }

    pub fn unlink(&self, a: usize, b: usize) {
        lock(&self.links).remove(&link_key(a, b));
    }

    /// Link node `i` to node `i + 1` for every node.
    pub fn link_line(&self) {
        for i in 1..self.len() {
            self.link(i - 1, i);
        }
    }

    /// The node stops answering and loses its links.
    pub fn kill(&self, index: usize) -> Result<()> {
        let node = self.node(index)?;
        node.kill();
        lock(&self.links).retain(|&(a, b)| a != index && b != index);
        info!(node = index, "node killed");
        Ok(())
    }

    fn linked(&self, index: usize) -> Vec<Arc<SimNode>> {
        let peers: Vec<usize> = lock(&self.links)
            .iter()
            .filter_map(|&(a, b)| match (a == index, b == index) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect();
        let nodes = lock(&self.nodes);
        peers
            .into_iter()
            .filter_map(|i| nodes.get(i).cloned())
            .filter(|n| n.is_alive())
            .collect()
    }

    /// The live node answering as `(ip, netid)`.
    fn find(&self, ip: IpAddr, netid: NetId) -> Option<Arc<SimNode>> {
        self.alive_nodes()
            .into_iter()
            .find(|n| n.ip() == ip && n.netid() == netid)
    }

    /// Coordinator participant of `netid` nearest to `hip`.
    async fn coordinator_for(&self, netid: NetId, hip: &Nip) -> Option<(Nip, Arc<SimNode>)> {
        if netid.is_none() {
            return None;
        }
        let mut members = Vec::new();
        for node in self.alive_nodes() {
            if node.netid() == netid {
                members.push((node.nip().await, node));
            }
        }
        let best = nearest_nip(hip, members.iter().map(|(nip, _)| nip))?;
        members.into_iter().find(|(nip, _)| *nip == best)
    }

    /// Run one radar scan on every live node, concurrently.
    pub async fn scan_all(&self) {
        let handles: Vec<_> = self
            .alive_nodes()
            .into_iter()
            .map(|node| tokio::spawn(async move { node.radar.scan().await }))
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Bootstrap every live node concurrently.
    pub async fn bootstrap_all(&self) -> Vec<HookOutcome> {
        let handles: Vec<_> = self
            .alive_nodes()
            .into_iter()
            .map(|node| node.hook.spawn_hook(HookRequest::bootstrap()))
            .collect();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(outcome) = handle.await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Collision rehooks done by every node so far.
    pub fn collision_rehooks(&self) -> usize {
        lock(&self.nodes).iter().map(|n| n.collision_rehooks()).sum()
    }

    /// Recompute every routing map from the nips of the live nodes sharing
    /// the netid, and feed the differences to the coordinators.
    pub async fn sync_maps(&self) -> Vec<CountChange> {
        let nodes = self.alive_nodes();
        let mut nips = Vec::with_capacity(nodes.len());
        for node in &nodes {
            nips.push((node.netid(), node.nip().await));
        }

        let mut changes = Vec::new();
        for (node, (netid, me)) in nodes.iter().zip(&nips) {
            if netid.is_none() {
                continue;
            }
            let mut fresh = LevelMap::new(self.topology, me.clone());
            for (other, nip) in &nips {
                if other != netid {
                    continue;
                }
                if let Some(lvl) = self.topology.nip_cmp(me, nip) {
                    fresh.node_add(lvl, nip.get(lvl));
                }
            }
            let cur = fresh.node_nb_all();

            let (events, old) = {
                let mut map = node.map.write().await;
                if map.me() != me {
                    // Rehooked meanwhile; the next sync catches up
                    continue;
                }
                let events = map_diff(&map, &fresh);
                let old = map.node_nb_all();
                *map = fresh;
                (events, old)
            };

            for event in &events {
                node.coordinator.on_map_event(event).await;
            }
            for event in &events {
                if let MapEvent::NodeNew { lvl, id } = *event {
                    if let Err(e) = node.coordinator.new_participant_joined(lvl, id).await {
                        warn!(node = node.index, error = %e, "mapcache handover failed");
                    }
                }
            }
            if old != cur {
                trace!(node = node.index, ?old, ?cur, "node counts changed");
                changes.push(CountChange {
                    node: node.index,
                    old,
                    cur,
                });
            }
        }
        changes
    }

    /// Run the communicating vessels check of every hooked node whose
    /// counts changed.
    pub async fn communicating_vessels(&self, changes: Vec<CountChange>) {
        let mut handles = Vec::new();
        for change in changes {
            let Ok(node) = self.node(change.node) else {
                continue;
            };
            if !node.is_alive() || !node.status.is_hooked() {
                continue;
            }
            handles.push(tokio::spawn(async move {
                if let Err(e) = node
                    .hook
                    .communicating_vessels(Some(change.old.as_slice()), Some(change.cur.as_slice()))
                    .await
                {
                    debug!(node = node.index, error = %e, "vessels check refused");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Let in-flight messages and notices drain.
    pub async fn settle(&self) {
        tokio::time::sleep(self.config.latency * 4 + Duration::from_millis(10)).await;
    }

    pub async fn summary(&self) -> NetSummary {
        let mut nodes = Vec::new();
        for node in self.alive_nodes() {
            nodes.push(node.summary().await);
        }
        let netids: BTreeSet<NetId> = nodes.iter().map(|n| n.netid).collect();
        NetSummary {
            nodes,
            netids: netids.into_iter().collect(),
        }
    }
}

/// The network as seen from one node.
struct SimLink {
    net: Weak<SimNet>,
    index: usize,
}

impl SimLink {
    fn net(&self) -> Option<Arc<SimNet>> {
        self.net.upgrade()
    }

    fn me(&self) -> Option<(Arc<SimNet>, Arc<SimNode>)> {
        let net = self.net()?;
        let node = net.node(self.index).ok()?;
        Some((net, node))
    }

    fn peer(&self, neigh: &Neigh) -> burrow_hook::Result<Arc<SimNode>> {
        self.net()
            .and_then(|net| net.find(neigh.ip, neigh.netid))
            .ok_or_else(|| burrow_hook::Error::Unreachable(neigh.key().to_string()))
    }

    async fn coordinator(&self, target: &CoordTarget) -> burrow_hook::Result<Arc<SimNode>> {
        let net = self
            .net()
            .ok_or_else(|| burrow_hook::Error::Unreachable(target.hip.to_string()))?;
        net.coordinator_for(target.netid, &target.hip)
            .await
            .map(|(_, node)| node)
            .ok_or_else(|| burrow_hook::Error::Unreachable(format!("coordinator of {}", target.hip)))
    }
}

#[async_trait]
impl RadarTransport for SimLink {
    async fn broadcast_probe(&self, probe: Probe) -> burrow_radar::Result<()> {
        let (net, me) = self
            .me()
            .ok_or_else(|| burrow_radar::Error::Transport("network gone".into()))?;
        let from = me.ip();
        let latency = net.config.latency;
        for peer in net.linked(self.index) {
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                peer.radar.reply(DEV, from, probe).await;
            });
        }
        Ok(())
    }

    async fn send_reply(&self, dev: &str, to: IpAddr, reply: Reply) -> burrow_radar::Result<()> {
        let (net, me) = self
            .me()
            .ok_or_else(|| burrow_radar::Error::Transport("network gone".into()))?;
        let target = net
            .linked(self.index)
            .into_iter()
            .find(|n| n.ip() == to)
            .ok_or_else(|| burrow_radar::Error::Transport(format!("no link to {to}")))?;
        let from = me.ip();
        let latency = net.config.latency;
        let dev = dev.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            target.radar.time_register(from, &dev, reply.round_id, reply.netid);
        });
        Ok(())
    }
}

#[async_trait]
impl ParticipantResolver for SimLink {
    async fn nearest(&self, hip: &Nip) -> Option<Nip> {
        let (net, me) = self.me()?;
        let netid = me.netid();
        if netid.is_none() {
            return Some(me.nip().await);
        }
        net.coordinator_for(netid, hip).await.map(|(nip, _)| nip)
    }
}

#[async_trait]
impl CoordinatorLink for SimLink {
    async fn send_mapcache(&self, level: usize, hip: &Nip, packet: MapPacket) -> burrow_coord::Result<()> {
        let (net, me) = self
            .me()
            .ok_or_else(|| burrow_coord::Error::Unreachable(hip.to_string()))?;
        let (nip, node) = net
            .coordinator_for(me.netid(), hip)
            .await
            .ok_or_else(|| burrow_coord::Error::Unreachable(hip.to_string()))?;
        debug!(level, to = %nip, "mapcache delivered");
        node.coordinator.map_data_merge(&packet).await;
        Ok(())
    }
}

#[async_trait]
impl HookTransport for SimLink {
    async fn highest_free_nodes(&self, neigh: &Neigh) -> burrow_hook::Result<Hfn> {
        self.peer(neigh)?.hook.highest_free_nodes().await
    }

    async fn free_nodes_nb(&self, neigh: &Neigh, lvl: usize) -> burrow_hook::Result<usize> {
        self.peer(neigh)?.hook.free_nodes_nb(lvl).await
    }

    async fn communicating_vessels(&self, neigh: &Neigh) -> burrow_hook::Result<()> {
        let peer = self.peer(neigh)?;
        tokio::spawn(async move {
            if let Err(e) = peer.hook.communicating_vessels(None, None).await {
                debug!(node = peer.index, error = %e, "vessels check refused");
            }
        });
        Ok(())
    }

    async fn network_size(&self, neigh: &Neigh) -> burrow_hook::Result<usize> {
        self.peer(neigh)?.hook.network_size().await
    }

    async fn ip_netid_change(&self, neighs: &[Neigh], old: NeighKey, new: NeighKey) {
        let Some(net) = self.net() else { return };
        let peers = net.linked(self.index);
        for neigh in neighs {
            for peer in peers.iter().filter(|p| p.ip() == neigh.ip) {
                peer.deliver_change(old, new);
            }
        }
    }

    async fn going_out(
        &self,
        target: &CoordTarget,
        lvl: usize,
        id: SlotId,
        gfree_new: Option<usize>,
    ) -> burrow_hook::Result<Option<usize>> {
        let coord = self.coordinator(target).await?;
        Ok(coord.coordinator.going_out(lvl, id, gfree_new).await)
    }

    async fn going_in(
        &self,
        target: &CoordTarget,
        lvl: usize,
        gfree_old: Option<usize>,
    ) -> burrow_hook::Result<Option<Nip>> {
        let coord = self.coordinator(target).await?;
        Ok(coord.coordinator.going_in(lvl, gfree_old).await)
    }

    async fn going_out_ok(&self, target: &CoordTarget, lvl: usize, id: SlotId) -> burrow_hook::Result<()> {
        let coord = self.coordinator(target).await?;
        coord.coordinator.going_out_ok(lvl, id).await;
        Ok(())
    }

    async fn reset_sessions(&self) {
        trace!(node = self.index, "sessions reset");
    }

    async fn activate(&self, ip: IpAddr) -> burrow_hook::Result<()> {
        let (_, me) = self
            .me()
            .ok_or_else(|| burrow_hook::Error::Unreachable(ip.to_string()))?;
        me.set_ip(ip);
        Ok(())
    }
}
