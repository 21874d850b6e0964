//! The radar: periodic broadcast scans that feed the neighbour table.
//!
//! ```text
//!   Idle ──► Probing ──► Collecting ──► Reducing ──► Idle ...
//!     ╲          ╲            ╲
//!      ╰──────────┴────────────┴──► Stopping (round drained, loop exits)
//! ```
//!
//! A round broadcasts `max_bouquet` probes stamped with a fresh round id,
//! collects replies for `wait_time` plus whatever extra wait the table asked
//! for, then hands the averaged RTTs to [`NeighborTable::store`].

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use burrow_topology::NetId;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::RadarConfig;
use crate::error::{Error, Result};
use crate::neighbour::{DevRtt, NeighKey, Neigh, NeighborTable};
use crate::transport::{Probe, RadarTransport, Reply};

/// Phase of the radar loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadarState {
    Idle,
    Probing,
    Collecting,
    Reducing,
    Stopping,
}

/// Radar notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadarEvent {
    /// A round completed; the counter grows by one per stored round.
    ScanDone(u64),
}

#[derive(Debug)]
struct Arrival {
    key: NeighKey,
    devs: Vec<(String, Vec<Duration>)>,
}

#[derive(Debug)]
struct Round {
    id: u32,
    sent_at: Instant,
    arrivals: Vec<Arrival>,
}

/// Neighbour discovery loop.
pub struct Radar {
    config: RadarConfig,
    table: Arc<NeighborTable>,
    transport: Arc<dyn RadarTransport>,
    token: u64,
    round: Mutex<Round>,
    phase: Mutex<RadarState>,
    extra_wait: Mutex<Duration>,
    running: watch::Sender<bool>,
    stopping: AtomicBool,
    do_reply: AtomicBool,
    scans: AtomicU64,
    events: broadcast::Sender<RadarEvent>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Radar {
    pub fn new(
        config: RadarConfig,
        table: Arc<NeighborTable>,
        transport: Arc<dyn RadarTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let (running, _) = watch::channel(false);
        Self {
            config,
            table,
            transport,
            token: rand::random(),
            round: Mutex::new(Round {
                id: 0,
                sent_at: Instant::now(),
                arrivals: Vec::new(),
            }),
            phase: Mutex::new(RadarState::Idle),
            extra_wait: Mutex::new(Duration::ZERO),
            running,
            stopping: AtomicBool::new(false),
            do_reply: AtomicBool::new(true),
            scans: AtomicU64::new(0),
            events,
        }
    }

    pub fn table(&self) -> &Arc<NeighborTable> {
        &self.table
    }

    /// Token stamped on our probes.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn state(&self) -> RadarState {
        *lock(&self.phase)
    }

    /// Rounds stored so far.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Enable or disable answering other nodes' probes.
    pub fn set_reply(&self, enabled: bool) {
        self.do_reply.store(enabled, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RadarEvent> {
        self.events.subscribe()
    }

    fn set_phase(&self, state: RadarState) {
        let mut phase = lock(&self.phase);
        // Only the loop exit leaves Stopping
        if *phase == RadarState::Stopping && self.stopping.load(Ordering::SeqCst) {
            return;
        }
        *phase = state;
    }

    /// Start the scan loop.
    ///
    /// Only one loop may run per radar; a second call while the first is
    /// active fails with [`Error::AlreadyRunning`].
    pub fn run(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let started = self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !started {
            return Err(Error::AlreadyRunning);
        }
        info!(token = self.token, "radar started");

        let radar = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while !radar.stopping.load(Ordering::SeqCst) {
                radar.scan().await;
            }
            radar.stopping.store(false, Ordering::SeqCst);
            radar.set_phase(RadarState::Idle);
            radar.running.send_replace(false);
            info!("radar stopped");
        }))
    }

    /// Ask the loop to stop and wait until the in-flight round drained.
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }
        self.stopping.store(true, Ordering::SeqCst);
        self.set_phase(RadarState::Stopping);
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Run one round. Returns the scan counter if the round was stored.
    pub async fn scan(&self) -> Option<u64> {
        let round_id: u32 = rand::random();
        {
            let mut round = lock(&self.round);
            round.id = round_id;
            round.sent_at = Instant::now();
            round.arrivals.clear();
        }
        debug!(round_id, netid = %self.table.netid(), "radar scan");

        self.set_phase(RadarState::Probing);
        let probe = Probe {
            token: self.token,
            round_id,
        };
        for _ in 0..self.config.max_bouquet {
            if let Err(e) = self.transport.broadcast_probe(probe).await {
                warn!(error = %e, "probe broadcast failed");
            }
        }

        self.set_phase(RadarState::Collecting);
        let extra = *lock(&self.extra_wait);
        tokio::time::sleep(self.config.wait_time + extra).await;

        let mut stored = None;
        if !self.stopping.load(Ordering::SeqCst) {
            self.set_phase(RadarState::Reducing);
            let candidates = self.candidates();
            let extra = self.table.store(candidates);
            *lock(&self.extra_wait) = extra;

            let n = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.events.send(RadarEvent::ScanDone(n));
            stored = Some(n);
            self.set_phase(RadarState::Idle);
        }

        lock(&self.round).arrivals.clear();
        stored
    }

    /// Average RTT per device of every peer heard this round, best device
    /// first.
    fn candidates(&self) -> Vec<Neigh> {
        let round = lock(&self.round);
        round
            .arrivals
            .iter()
            .filter_map(|arrival| {
                let key = arrival.key;
                let devs = arrival
                    .devs
                    .iter()
                    .filter(|(_, samples)| !samples.is_empty())
                    .map(|(dev, samples)| DevRtt {
                        dev: dev.clone(),
                        rtt: samples.iter().sum::<Duration>() / samples.len() as u32,
                    })
                    .collect::<Vec<_>>();
                (!devs.is_empty()).then(|| Neigh::new(key.ip, key.netid, devs))
            })
            .collect()
    }

    /// Handle a probe received on `dev` from `from`.
    pub async fn reply(&self, dev: &str, from: IpAddr, probe: Probe) {
        if !self.do_reply.load(Ordering::SeqCst) || probe.token == self.token {
            return;
        }
        let reply = Reply {
            round_id: probe.round_id,
            netid: self.table.netid(),
        };
        if let Err(e) = self.transport.send_reply(dev, from, reply).await {
            trace!(error = %e, to = %from, "radar reply failed, ignored");
        }
    }

    /// Record a reply from `ip`, heard on `dev`.
    pub fn time_register(&self, ip: IpAddr, dev: &str, round_id: u32, netid: NetId) {
        let mut round = lock(&self.round);
        if round_id != round.id {
            trace!(round_id, current = round.id, "stale radar reply dropped");
            return;
        }
        let elapsed = round.sent_at.elapsed() / 2;
        let key = NeighKey::new(ip, netid);

        let idx = match round.arrivals.iter().position(|a| a.key == key) {
            Some(idx) => idx,
            None => {
                debug!(ip = %ip, netid = %netid, "radar: peer detected");
                round.arrivals.push(Arrival {
                    key,
                    devs: Vec::new(),
                });
                round.arrivals.len() - 1
            }
        };
        let devs = &mut round.arrivals[idx].devs;
        match devs.iter_mut().find(|(d, _)| d == dev) {
            Some((_, samples)) => samples.push(elapsed),
            None => devs.push((dev.to_string(), vec![elapsed])),
        }
    }

    /// A neighbour changed ip/netid: drop it from the current round and
    /// move its table record.
    pub async fn ip_netid_change(&self, old: NeighKey, new: NeighKey) {
        lock(&self.round).arrivals.retain(|a| a.key != old);
        self.table.ip_netid_change(old, new).await;
    }
}

impl std::fmt::Debug for Radar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Radar")
            .field("token", &self.token)
            .field("state", &self.state())
            .field("scans", &self.scans())
            .finish()
    }
}
