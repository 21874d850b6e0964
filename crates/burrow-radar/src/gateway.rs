//! Gateway rendezvous between the neighbour table and the route installer.
//!
//! When a neighbour appears the table *announces* it; whoever installs
//! forwarding state through it calls `announce_gw_added` once the leg is in
//! place, and anybody that must not forward through the gateway before that
//! point calls `waitfor_gw_added`. Removal mirrors this: the table announces
//! the gateway as *removing*, the route layer retracts every route through
//! it and calls `announce_gw_removable`, and the table waits for that before
//! re-using the handle.
//!
//! A waiter on a handle with no announced channel returns at once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::neighbour::NeighId;

/// Which half of the rendezvous a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Adding,
    Removing,
}

/// Per-handle one-shot release channels.
///
/// Add and removal channels are kept apart so a handle that is being
/// retracted never shares a channel with the neighbour that reuses it.
#[derive(Debug, Default)]
pub struct GatewaySync {
    adding: Mutex<HashMap<NeighId, watch::Sender<bool>>>,
    removing: Mutex<HashMap<NeighId, watch::Sender<bool>>>,
}

impl GatewaySync {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self, phase: Phase) -> MutexGuard<'_, HashMap<NeighId, watch::Sender<bool>>> {
        let map = match phase {
            Phase::Adding => &self.adding,
            Phase::Removing => &self.removing,
        };
        map.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a channel unless one is already outstanding; replacing a live
    /// sender would wake its waiters early.
    fn open(&self, phase: Phase, id: NeighId) {
        self.channels(phase)
            .entry(id)
            .or_insert_with(|| watch::channel(false).0);
    }

    fn release(&self, phase: Phase, id: NeighId) {
        let sender = self.channels(phase).remove(&id);
        if let Some(tx) = sender {
            tx.send_replace(true);
        }
    }

    async fn wait(&self, phase: Phase, id: NeighId) {
        let mut rx = match self.channels(phase).get(&id) {
            Some(tx) => tx.subscribe(),
            None => return,
        };
        // A dropped sender also counts as released
        let _ = rx.wait_for(|released| *released).await;
    }

    /// Is a rendezvous outstanding for `id`?
    pub fn is_pending(&self, id: NeighId) -> bool {
        self.channels(Phase::Adding).contains_key(&id) || self.is_removing(id)
    }

    /// Are routes through `id` still waiting to be retracted?
    ///
    /// Such a handle must not be given to another neighbour.
    pub fn is_removing(&self, id: NeighId) -> bool {
        self.channels(Phase::Removing).contains_key(&id)
    }

    /// A new gateway was detected.
    pub fn announce_gw(&self, id: NeighId) {
        trace!(gw = %id, "gateway detected");
        self.open(Phase::Adding, id);
    }

    /// Block until the forwarding leg through `id` is installed.
    pub async fn waitfor_gw_added(&self, id: NeighId) {
        self.wait(Phase::Adding, id).await;
    }

    /// The forwarding leg through `id` is installed.
    pub fn announce_gw_added(&self, id: NeighId) {
        debug!(gw = %id, "gateway added");
        self.release(Phase::Adding, id);
    }

    /// The gateway is going away; routes through it must be retracted.
    pub fn announce_gw_removing(&self, id: NeighId) {
        trace!(gw = %id, "gateway removing");
        // A leg that was never installed has nothing left to wait for
        self.release(Phase::Adding, id);
        self.open(Phase::Removing, id);
    }

    /// Block until every route through `id` is retracted.
    pub async fn waitfor_gw_removable(&self, id: NeighId) {
        self.wait(Phase::Removing, id).await;
    }

    /// Every route through `id` is retracted.
    pub fn announce_gw_removable(&self, id: NeighId) {
        debug!(gw = %id, "gateway removable");
        self.release(Phase::Removing, id);
    }

    /// [`waitfor_gw_removable`](Self::waitfor_gw_removable) bounded by `limit`.
    pub async fn waitfor_gw_removable_timeout(&self, id: NeighId, limit: Duration) -> Result<()> {
        tokio::time::timeout(limit, self.waitfor_gw_removable(id))
            .await
            .map_err(|_| Error::GatewayTimeout(id))
    }
}
