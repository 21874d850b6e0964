//! One simulated node: radar, neighbour table, coordinator and hook wired
//! to the in-memory network.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use burrow_coord::Coordinator;
use burrow_hook::{Hook, HookEvent, HookOutcome, NodeStatus};
use burrow_radar::{GatewaySync, NeighKey, NeighborTable, NeighbourEvent, Radar, RadarEvent};
use burrow_topology::{LevelMap, NetId, Nip};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// A node of the simulated network.
pub struct SimNode {
    pub(crate) index: usize,
    ip: Mutex<IpAddr>,
    alive: AtomicBool,
    pub(crate) status: Arc<NodeStatus>,
    pub(crate) table: Arc<NeighborTable>,
    pub(crate) map: Arc<RwLock<LevelMap>>,
    pub(crate) radar: Arc<Radar>,
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) hook: Arc<Hook>,
    inbox: mpsc::UnboundedSender<(NeighKey, NeighKey)>,
    collision_rehooks: Arc<AtomicUsize>,
}

impl std::fmt::Debug for SimNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNode")
            .field("index", &self.index)
            .field("ip", &self.ip())
            .field("netid", &self.netid())
            .finish_non_exhaustive()
    }
}

/// What the summary shows of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub index: usize,
    pub nip: Nip,
    pub ip: IpAddr,
    pub netid: NetId,
    pub hooked: bool,
    pub neighbours: Vec<String>,
}

/// Play the route installer: release every gateway rendezvous as soon as
/// the table announces it.
fn spawn_route_installer(
    gateways: Arc<GatewaySync>,
    mut events: broadcast::Receiver<NeighbourEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NeighbourEvent::New(neigh)) => {
                    if let Some(id) = neigh.id {
                        gateways.announce_gw_added(id);
                    }
                }
                Ok(NeighbourEvent::Deleted(neigh)) => {
                    if let Some(id) = neigh.id {
                        gateways.announce_gw_removable(id);
                    }
                }
                Ok(NeighbourEvent::RemChanged { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "route installer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Look for a larger foreign network after every completed scan.
fn spawn_collision_watch(
    index: usize,
    hook: Arc<Hook>,
    rehooks: Arc<AtomicUsize>,
    mut events: broadcast::Receiver<RadarEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RadarEvent::ScanDone(scan)) => {
                    if let Some(outcome) = hook.check_collision().await {
                        info!(node = index, scan, ?outcome, "collision rehook done");
                        if matches!(outcome, HookOutcome::Hooked { .. }) {
                            rehooks.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(node = index, skipped = n, "collision watch lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Once a rehook fully settled, advertise every neighbour again so routes
/// are rebuilt under the new address.
fn spawn_readvertiser(table: Arc<NeighborTable>, mut events: broadcast::Receiver<HookEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(HookEvent::Hooked2) => table.readvertise(),
                Ok(HookEvent::Hooked { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "readvertiser lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Apply ip/netid change notices in arrival order.
fn spawn_inbox(radar: Arc<Radar>, mut rx: mpsc::UnboundedReceiver<(NeighKey, NeighKey)>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((old, new)) = rx.recv().await {
            radar.ip_netid_change(old, new).await;
        }
    })
}

impl SimNode {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        ip: IpAddr,
        status: Arc<NodeStatus>,
        table: Arc<NeighborTable>,
        map: Arc<RwLock<LevelMap>>,
        radar: Arc<Radar>,
        coordinator: Arc<Coordinator>,
        hook: Arc<Hook>,
    ) -> Self {
        spawn_route_installer(Arc::clone(table.gateways()), table.subscribe());
        let (inbox, rx) = mpsc::unbounded_channel();
        spawn_inbox(Arc::clone(&radar), rx);
        let collision_rehooks = Arc::new(AtomicUsize::new(0));
        spawn_collision_watch(
            index,
            Arc::clone(&hook),
            Arc::clone(&collision_rehooks),
            radar.subscribe(),
        );
        spawn_readvertiser(Arc::clone(&table), hook.subscribe());
        coordinator.spawn_purger();
        Self {
            index,
            ip: Mutex::new(ip),
            alive: AtomicBool::new(true),
            status,
            table,
            map,
            radar,
            coordinator,
            hook,
            inbox,
            collision_rehooks,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ip(&self) -> IpAddr {
        *self.ip.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_ip(&self, ip: IpAddr) {
        trace!(node = self.index, %ip, "address activated");
        *self.ip.lock().unwrap_or_else(|e| e.into_inner()) = ip;
    }

    pub fn netid(&self) -> NetId {
        self.table.netid()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.radar.set_reply(false);
    }

    pub fn status(&self) -> &Arc<NodeStatus> {
        &self.status
    }

    pub fn table(&self) -> &Arc<NeighborTable> {
        &self.table
    }

    pub fn radar(&self) -> &Arc<Radar> {
        &self.radar
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn hook(&self) -> &Arc<Hook> {
        &self.hook
    }

    /// Rehooks into a larger foreign network so far.
    pub fn collision_rehooks(&self) -> usize {
        self.collision_rehooks.load(Ordering::SeqCst)
    }

    pub async fn nip(&self) -> Nip {
        self.map.read().await.me().clone()
    }

    /// Queue an ip/netid change notice from a neighbour.
    pub(crate) fn deliver_change(&self, old: NeighKey, new: NeighKey) {
        if self.inbox.send((old, new)).is_err() {
            debug!(node = self.index, "inbox closed, notice dropped");
        }
    }

    pub async fn summary(&self) -> NodeSummary {
        NodeSummary {
            index: self.index,
            nip: self.nip().await,
            ip: self.ip(),
            netid: self.netid(),
            hooked: self.status.is_hooked(),
            neighbours: self
                .table
                .neigh_list(burrow_radar::NeighFilter::All)
                .iter()
                .map(|n| n.key().to_string())
                .collect(),
        }
    }
}
