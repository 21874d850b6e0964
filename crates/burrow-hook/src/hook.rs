//! The hook: how a node obtains (or changes) its place in the mesh.
//!
//! An attempt goes through these steps:
//!
//! 1. forget the current netid and tell the neighbours,
//! 2. ask the candidate neighbours for their highest free nodes,
//! 3. pick the highest level, then the longest free list, and draw a
//!    tentative nip from it,
//! 4. negotiate the slot with the coordinators involved,
//! 5. commit: new address, fresh map, new netid, `Hooked` event.
//!
//! A node with nobody around skips 2 to 4 and founds its own network.
//!
//! [`Hook::hook`] is single-flight: a call made while an attempt runs is
//! parked as the one pending request and runs right after, replacing any
//! request parked before it. Failed attempts restart as a bootstrap, in a
//! loop bounded by `max_restarts`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use burrow_coord::{Coordinator, MapCache};
use burrow_radar::{Neigh, NeighFilter, NeighKey, NeighborTable};
use burrow_topology::{LevelMap, NetId, Nip, Topology};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::HookConfig;
use crate::error::{Error, Result};
use crate::status::NodeStatus;
use crate::transport::{CoordTarget, Hfn, HookTransport};

/// Why a hook was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HookReason {
    /// Startup, or restart after a failed attempt.
    #[default]
    Bootstrap,
    /// Our side of a gnode became the minority.
    GroupSplit,
    /// A neighbouring gnode has clearly more room.
    CommunicatingVessels,
    /// We met a larger network with another netid.
    NetworkCollision,
}

/// A hook request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookRequest {
    pub reason: HookReason,
    /// Neighbours to hook among. Empty means "ask the radar".
    pub candidates: Vec<Neigh>,
    /// `(lvl, nip)`: skip neighbours sharing every level `>= lvl` with `nip`.
    pub forbidden: Vec<(usize, Nip)>,
    /// Free slots the destination gnode advertised; enables the optimistic
    /// checks on both coordinators.
    pub condition: Option<usize>,
}

impl HookRequest {
    pub fn bootstrap() -> Self {
        Self::default()
    }

    pub fn group_split(forbidden: Vec<(usize, Nip)>) -> Self {
        Self {
            reason: HookReason::GroupSplit,
            forbidden,
            ..Default::default()
        }
    }

    pub fn communicating_vessels(candidates: Vec<Neigh>, gfree_new: usize) -> Self {
        Self {
            reason: HookReason::CommunicatingVessels,
            candidates,
            condition: Some(gfree_new),
            ..Default::default()
        }
    }

    pub fn network_collision(candidates: Vec<Neigh>) -> Self {
        Self {
            reason: HookReason::NetworkCollision,
            candidates,
            ..Default::default()
        }
    }
}

/// How a call to [`Hook::hook`] ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookOutcome {
    Hooked { old: Nip, new: Nip },
    /// Another attempt was running; the request will run after it.
    Queued,
    /// The current coordinator refused to let us go.
    Denied,
    /// No free slot anywhere.
    NetworkFull,
    /// Too many consecutive restarts.
    GaveUp,
}

/// Hook notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookEvent {
    /// We have a new place in the mesh.
    Hooked { old: Nip, new: Nip },
    /// The join settled; normal query answering may resume.
    Hooked2,
}

#[derive(Debug, Default)]
struct Dispatch {
    running: bool,
    pending: Option<HookRequest>,
}

enum Next {
    Run(HookRequest, bool),
    Done,
}

/// The join state machine of one node.
pub struct Hook {
    pub(crate) config: HookConfig,
    pub(crate) status: Arc<NodeStatus>,
    pub(crate) table: Arc<NeighborTable>,
    pub(crate) map: Arc<RwLock<LevelMap>>,
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) transport: Arc<dyn HookTransport>,
    events: broadcast::Sender<HookEvent>,
    dispatch: Mutex<Dispatch>,
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Is `nip` excluded by the forbidden prefixes?
pub(crate) fn is_forbidden(topo: &Topology, nip: &Nip, forbidden: &[(usize, Nip)]) -> bool {
    forbidden
        .iter()
        .any(|(lvl, fnr)| topo.nip_cmp(nip, fnr).map_or(true, |d| d < *lvl))
}

/// Index of the best answer: highest level first, then the longest free
/// list, then the earliest answer.
pub(crate) fn select_hfn(answers: &[Hfn]) -> Option<usize> {
    let top = answers.iter().filter_map(|h| h.level).max()?;
    let mut best: Option<(usize, usize)> = None;
    for (i, h) in answers.iter().enumerate() {
        if h.level != Some(top) || h.free.is_empty() {
            continue;
        }
        if best.map_or(true, |(_, len)| h.free.len() > len) {
            best = Some((i, h.free.len()));
        }
    }
    best.map(|(i, _)| i)
}

impl Hook {
    pub fn new(
        config: HookConfig,
        status: Arc<NodeStatus>,
        table: Arc<NeighborTable>,
        map: Arc<RwLock<LevelMap>>,
        coordinator: Arc<Coordinator>,
        transport: Arc<dyn HookTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            status,
            table,
            map,
            coordinator,
            transport,
            events,
            dispatch: Mutex::new(Dispatch::default()),
        }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub fn status(&self) -> &Arc<NodeStatus> {
        &self.status
    }

    pub fn table(&self) -> &Arc<NeighborTable> {
        &self.table
    }

    pub fn map(&self) -> &Arc<RwLock<LevelMap>> {
        &self.map
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Our current nip.
    pub async fn me(&self) -> Nip {
        self.map.read().await.me().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HookEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: HookEvent) {
        let _ = self.events.send(event);
    }

    fn dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Is an attempt in flight?
    pub fn is_running(&self) -> bool {
        self.dispatch().running
    }

    /// Bound a remote call by the rpc timeout.
    pub(crate) async fn rpc<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.rpc_timeout, call)
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Run `request`, or park it if an attempt is already in flight.
    pub async fn hook(self: &Arc<Self>, request: HookRequest) -> HookOutcome {
        {
            let mut dispatch = self.dispatch();
            if dispatch.running {
                debug!(reason = ?request.reason, "hook in progress, request parked");
                dispatch.pending = Some(request);
                return HookOutcome::Queued;
            }
            dispatch.running = true;
        }

        let mut request = request;
        let mut restarts = 0u32;
        loop {
            let mut restart = None;
            let outcome = match self.attempt(&request).await {
                Ok(outcome) => outcome,
                Err(Error::Denied) => HookOutcome::Denied,
                Err(Error::NetworkFull) => HookOutcome::NetworkFull,
                Err(e) => {
                    restarts += 1;
                    if restarts > self.config.max_restarts {
                        error!(error = %e, restarts, "hook keeps failing, giving up");
                        self.status.set_hooking(false);
                        self.status.set_gonna_hook(true);
                        HookOutcome::GaveUp
                    } else {
                        info!(error = %e, "hook failed, retrying from start");
                        self.status.set_gonna_hook(true);
                        restart = Some(HookRequest::bootstrap());
                        HookOutcome::GaveUp
                    }
                }
            };

            let next = {
                let mut dispatch = self.dispatch();
                if let Some(pending) = dispatch.pending.take() {
                    Next::Run(pending, true)
                } else if let Some(restart) = restart {
                    Next::Run(restart, false)
                } else {
                    dispatch.running = false;
                    Next::Done
                }
            };
            match next {
                Next::Run(next, fresh) => {
                    if fresh {
                        restarts = 0;
                    }
                    request = next;
                }
                Next::Done => return outcome,
            }
        }
    }

    /// [`hook`](Self::hook) in a background task.
    pub fn spawn_hook(self: &Arc<Self>, request: HookRequest) -> tokio::task::JoinHandle<HookOutcome> {
        self.status.set_gonna_hook(true);
        let hook = Arc::clone(self);
        tokio::spawn(async move { hook.hook(request).await })
    }

    async fn announce(&self, old: NeighKey, new: NeighKey) {
        let neighs = self.table.neigh_list(NeighFilter::All);
        debug!(%old, %new, count = neighs.len(), "announcing ip/netid change");
        self.transport.ip_netid_change(&neighs, old, new).await;
    }

    async fn attempt(self: &Arc<Self>, req: &HookRequest) -> Result<HookOutcome> {
        info!(reason = ?req.reason, "hooking procedure started");
        self.status.set_hooking(true);

        let (topo, oldnip) = {
            let map = self.map.read().await;
            (*map.topology(), map.me().clone())
        };
        let oldip = topo.nip_to_ip(&oldnip);

        let neigh_list = if req.candidates.is_empty() {
            self.table.neigh_list(NeighFilter::InMyNetwork)
        } else {
            req.candidates.clone()
        };
        let alone = neigh_list.is_empty();
        let netid_to_join = neigh_list.first().map_or(NetId::NONE, |n| n.netid);

        let previous_netid = self.table.netid();
        self.table.change_netid(NetId::NONE);
        if !previous_netid.is_none() {
            info!(netid = %previous_netid, "dropping our network id");
            self.announce(
                NeighKey::new(oldip, previous_netid),
                NeighKey::new(oldip, NetId::NONE),
            )
            .await;
        }

        let joined = if alone && req.reason == HookReason::Bootstrap {
            None
        } else {
            match self.negotiate(req, &neigh_list, topo, &oldnip, previous_netid, netid_to_join).await {
                Ok(joined) => joined,
                Err(e @ (Error::Denied | Error::NetworkFull)) => {
                    info!(error = %e, netid = %previous_netid, "hook cancelled, previous network id is back");
                    self.table.change_netid(previous_netid);
                    if !previous_netid.is_none() {
                        self.announce(
                            NeighKey::new(oldip, NetId::NONE),
                            NeighKey::new(oldip, previous_netid),
                        )
                        .await;
                    }
                    self.status.set_hooking(false);
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        };

        match joined {
            Some(newnip) => self.commit(topo, oldnip, newnip, Some(netid_to_join)).await,
            None => {
                let netid = NetId::random(&mut rand::thread_rng());
                self.table.change_netid(netid);
                info!(netid = %netid, "we are alone, generated our network id");
                let me = oldnip.clone();
                self.commit(topo, oldnip, me, None).await
            }
        }
    }

    /// Steps 2 to 4. `Ok(None)` means nobody answered a bootstrap: go on
    /// alone.
    async fn negotiate(
        &self,
        req: &HookRequest,
        neigh_list: &[Neigh],
        topo: Topology,
        oldnip: &Nip,
        previous_netid: NetId,
        netid_to_join: NetId,
    ) -> Result<Option<Nip>> {
        let mut answers: Vec<(Nip, &Neigh, Hfn)> = Vec::new();
        for nr in neigh_list {
            let nrnip = match topo.ip_to_nip(nr.ip) {
                Ok(nip) => nip,
                Err(e) => {
                    debug!(neigh = %nr.ip, error = %e, "neighbour outside the address space");
                    continue;
                }
            };
            if is_forbidden(&topo, &nrnip, &req.forbidden) {
                continue;
            }
            match self.rpc(self.transport.highest_free_nodes(nr)).await {
                Ok(hfn) => {
                    info!(neigh = %nrnip, level = ?hfn.level, free = hfn.free.len(), "highest free nodes");
                    answers.push((nrnip, nr, hfn));
                }
                Err(e) => debug!(neigh = %nrnip, error = %e, "no hfn answer"),
            }
        }

        if answers.is_empty() {
            if req.reason != HookReason::Bootstrap {
                return Err(Error::Unreachable("no candidate answered".into()));
            }
            info!("nobody answered, hooking alone");
            return Ok(None);
        }

        let hfns: Vec<Hfn> = answers.iter().map(|(_, _, h)| h.clone()).collect();
        let best = select_hfn(&hfns).ok_or(Error::NetworkFull)?;
        let (nrnip, responder, hfn) = &answers[best];
        let lvl = hfn.level.ok_or(Error::NetworkFull)?;

        let newnip = {
            let mut rng = rand::thread_rng();
            let mut nip = nrnip.clone();
            let id = *hfn.free.choose(&mut rng).ok_or(Error::NetworkFull)?;
            nip.set(lvl, id);
            for l in (0..lvl).rev() {
                if let Some(&slot) = topo.valid_ids(l).choose(&mut rng) {
                    nip.set(l, slot);
                }
            }
            nip
        };
        debug!(lvl, tentative = %newnip, "tentative nip");

        let via = matches!(req.reason, HookReason::Bootstrap | HookReason::NetworkCollision)
            .then_some(responder.ip);
        let co2 = CoordTarget {
            level: lvl + 1,
            hip: topo.project(lvl + 1, &newnip),
            netid: netid_to_join,
            via,
        };

        // The optimistic checks only make sense between sibling gnodes
        let condition = if lvl == 0 { req.condition } else { None };
        let assigned = match condition {
            Some(gfree_new) => {
                let co = CoordTarget {
                    level: 1,
                    hip: topo.project(1, oldnip),
                    netid: previous_netid,
                    via: None,
                };
                debug!(gfree_new, "going_out");
                let gfree_old = self
                    .rpc(self.transport.going_out(&co, 0, oldnip.get(0), Some(gfree_new)))
                    .await?
                    .ok_or(Error::Denied)?;
                debug!(gfree_old, "going_in");
                let nip = self
                    .rpc(self.transport.going_in(&co2, lvl, Some(gfree_old)))
                    .await?
                    .ok_or(Error::NetworkFull)?;
                if let Err(e) = self.rpc(self.transport.going_out_ok(&co, 0, oldnip.get(0))).await {
                    warn!(error = %e, "going_out_ok not delivered");
                }
                nip
            }
            None => {
                info!(level = co2.level, "contacting coordinator");
                self.rpc(self.transport.going_in(&co2, lvl, None))
                    .await?
                    .ok_or(Error::NetworkFull)?
            }
        };
        topo.check(&assigned)?;
        info!(nip = %assigned, "coordinator assigned nip");
        Ok(Some(assigned))
    }

    /// Step 5. `netid_to_join` is `None` for a node that founded its own
    /// network.
    async fn commit(
        self: &Arc<Self>,
        topo: Topology,
        oldnip: Nip,
        newnip: Nip,
        netid_to_join: Option<NetId>,
    ) -> Result<HookOutcome> {
        self.transport.reset_sessions().await;
        let oldip = topo.nip_to_ip(&oldnip);
        let newip = topo.nip_to_ip(&newnip);
        self.transport.activate(newip).await?;

        let snapshot = {
            let mut map = self.map.write().await;
            map.me_change(newnip.clone());
            map.map_reset();
            map.clone()
        };
        self.coordinator.reset(MapCache::from_map(&snapshot)).await;

        self.announce(
            NeighKey::new(oldip, NetId::NONE),
            NeighKey::new(newip, self.table.netid()),
        )
        .await;

        match netid_to_join {
            Some(netid) => {
                let wait_id: u32 = rand::random();
                self.status.set_hooked_waiting_id(wait_id);
                self.spawn_hooked_after_delay(wait_id);

                tokio::time::sleep(self.config.netid_grace).await;
                self.table.change_netid(netid);
                info!(netid = %netid, "we now have a network id");
                self.announce(NeighKey::new(newip, NetId::NONE), NeighKey::new(newip, netid))
                    .await;
            }
            None => self.status.set_hooking(false),
        }

        self.coordinator.participate().await;
        info!(old = %oldnip, new = %newnip, "hooking procedure completed");
        self.emit(HookEvent::Hooked {
            old: oldnip.clone(),
            new: newnip.clone(),
        });
        Ok(HookOutcome::Hooked {
            old: oldnip,
            new: newnip,
        })
    }

    fn spawn_hooked_after_delay(self: &Arc<Self>, wait_id: u32) {
        let hook = Arc::clone(self);
        let delay = self.config.hooked2_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if hook.status.unset_hooked_waiting_id(wait_id) {
                info!("join settled");
                hook.emit(HookEvent::Hooked2);
            }
        });
    }
}
