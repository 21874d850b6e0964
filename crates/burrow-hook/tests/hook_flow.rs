//! Join flows of a single node against a scripted transport.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use burrow_coord::{Coordinator, CoordinatorConfig, CoordinatorLink, MapCache, MapPacket, ParticipantResolver};
use burrow_hook::{
    CoordTarget, Error, Hfn, Hook, HookConfig, HookEvent, HookOutcome, HookRequest, HookTransport,
    NodeStatus, Result,
};
use burrow_radar::{DevRtt, Neigh, NeighKey, NeighbourConfig, NeighborTable};
use burrow_topology::{LevelMap, NetId, Nip, SlotId, Topology};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    GoingOut {
        target: CoordTarget,
        lvl: usize,
        id: SlotId,
        gfree_new: Option<usize>,
    },
    GoingIn {
        target: CoordTarget,
        lvl: usize,
        gfree_old: Option<usize>,
    },
    GoingOutOk,
    Vessels(IpAddr),
    Activate(IpAddr),
    Change(NeighKey, NeighKey),
}

#[derive(Default)]
struct Scripted {
    hfn: HashMap<IpAddr, Hfn>,
    free_nb: HashMap<IpAddr, usize>,
    going_out: Option<usize>,
    going_in: Option<Nip>,
    calls: Mutex<Vec<Call>>,
}

impl Scripted {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn going_in_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::GoingIn { .. }))
            .count()
    }
}

#[async_trait]
impl HookTransport for Scripted {
    async fn highest_free_nodes(&self, neigh: &Neigh) -> Result<Hfn> {
        self.hfn
            .get(&neigh.ip)
            .cloned()
            .ok_or_else(|| Error::Unreachable(neigh.ip.to_string()))
    }

    async fn free_nodes_nb(&self, neigh: &Neigh, _lvl: usize) -> Result<usize> {
        self.free_nb
            .get(&neigh.ip)
            .copied()
            .ok_or_else(|| Error::Unreachable(neigh.ip.to_string()))
    }

    async fn communicating_vessels(&self, neigh: &Neigh) -> Result<()> {
        self.record(Call::Vessels(neigh.ip));
        Ok(())
    }

    async fn network_size(&self, neigh: &Neigh) -> Result<usize> {
        Err(Error::Unreachable(neigh.ip.to_string()))
    }

    async fn ip_netid_change(&self, _neighs: &[Neigh], old: NeighKey, new: NeighKey) {
        self.record(Call::Change(old, new));
    }

    async fn going_out(
        &self,
        target: &CoordTarget,
        lvl: usize,
        id: SlotId,
        gfree_new: Option<usize>,
    ) -> Result<Option<usize>> {
        self.record(Call::GoingOut {
            target: target.clone(),
            lvl,
            id,
            gfree_new,
        });
        Ok(self.going_out)
    }

    async fn going_in(
        &self,
        target: &CoordTarget,
        lvl: usize,
        gfree_old: Option<usize>,
    ) -> Result<Option<Nip>> {
        self.record(Call::GoingIn {
            target: target.clone(),
            lvl,
            gfree_old,
        });
        Ok(self.going_in.clone())
    }

    async fn going_out_ok(&self, _target: &CoordTarget, _lvl: usize, _id: SlotId) -> Result<()> {
        self.record(Call::GoingOutOk);
        Ok(())
    }

    async fn reset_sessions(&self) {}

    async fn activate(&self, ip: IpAddr) -> Result<()> {
        self.record(Call::Activate(ip));
        Ok(())
    }
}

struct NoResolver;

#[async_trait]
impl ParticipantResolver for NoResolver {
    async fn nearest(&self, _hip: &Nip) -> Option<Nip> {
        None
    }
}

struct NoLink;

#[async_trait]
impl CoordinatorLink for NoLink {
    async fn send_mapcache(&self, _level: usize, _hip: &Nip, _packet: MapPacket) -> burrow_coord::Result<()> {
        Ok(())
    }
}

const NETID: NetId = NetId::new(42);

fn topo() -> Topology {
    Topology::new(2, 16).unwrap()
}

fn neigh(topo: &Topology, nip: &[SlotId], netid: NetId) -> Neigh {
    Neigh::new(
        topo.nip_to_ip(&Nip::new(nip.to_vec())),
        netid,
        vec![DevRtt {
            dev: "eth0".into(),
            rtt: Duration::from_millis(5),
        }],
    )
}

fn node(
    topo: Topology,
    me: &[SlotId],
    alive0: &[SlotId],
    netid: NetId,
    neighs: Vec<Neigh>,
    transport: Arc<Scripted>,
) -> Arc<Hook> {
    let mut map = LevelMap::new(topo, Nip::new(me.to_vec()));
    for &id in alive0 {
        map.node_add(0, id);
    }
    let table = Arc::new(NeighborTable::new(NeighbourConfig::default()));
    table.change_netid(netid);
    table.store(neighs);
    let coordinator = Arc::new(Coordinator::new(
        CoordinatorConfig::default(),
        MapCache::from_map(&map),
        Arc::new(NoResolver),
        Arc::new(NoLink),
    ));
    let status = Arc::new(NodeStatus::new());
    if !netid.is_none() {
        // Already part of a network
        status.set_hooking(true);
        status.set_hooking(false);
    }
    Arc::new(Hook::new(
        HookConfig::default(),
        status,
        table,
        Arc::new(RwLock::new(map)),
        coordinator,
        transport,
    ))
}

/// Local gnode [x, 0] with 2 free slots; neighbour [1, 1] in a gnode with 10.
fn imbalanced(going_out: Option<usize>, going_in: Option<Nip>) -> (Arc<Hook>, Arc<Scripted>) {
    let topo = topo();
    let nr = neigh(&topo, &[1, 1], NETID);
    let transport = Arc::new(Scripted {
        hfn: HashMap::from([(
            nr.ip,
            Hfn {
                level: Some(0),
                free: (2..12).collect(),
            },
        )]),
        free_nb: HashMap::from([(nr.ip, 10)]),
        going_out,
        going_in,
        ..Default::default()
    });
    let others: Vec<SlotId> = (2..15).collect();
    let hook = node(topo, &[1, 0], &others, NETID, vec![nr], transport.clone());
    (hook, transport)
}

#[tokio::test(start_paused = true)]
async fn isolated_node_founds_its_own_network() {
    let topo = topo();
    let transport = Arc::new(Scripted::default());
    let hook = node(topo, &[3, 5], &[], NetId::NONE, vec![], transport.clone());
    let mut events = hook.subscribe();

    let outcome = hook.hook(HookRequest::bootstrap()).await;

    let me = Nip::new(vec![3, 5]);
    assert_eq!(
        outcome,
        HookOutcome::Hooked {
            old: me.clone(),
            new: me.clone()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        HookEvent::Hooked {
            old: me.clone(),
            new: me.clone()
        }
    );
    assert!(hook.status().is_hooked());

    let ip = topo.nip_to_ip(&me);
    let calls = transport.calls();
    assert!(calls.contains(&Call::Activate(ip)));
    let netids: Vec<NetId> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Change(old, new) if old.netid.is_none() => Some(new.netid),
            _ => None,
        })
        .collect();
    assert_eq!(netids.len(), 1);
    assert!(!netids[0].is_none());
    assert_eq!(transport.going_in_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn split_minority_turns_zombie_then_rehooks() {
    let topo = Topology::new(1, 16).unwrap();
    let transport = Arc::new(Scripted::default());
    let hook = node(topo, &[4], &[5, 6, 7, 8], NETID, vec![], transport);

    hook.communicating_vessels(Some(&[5][..]), Some(&[2][..])).await.unwrap();
    assert!(hook.status().is_zombie());
    assert!(matches!(hook.highest_free_nodes().await, Err(Error::Zombie)));
    assert!(matches!(hook.free_nodes_nb(0).await, Err(Error::Zombie)));
    assert!(matches!(
        hook.communicating_vessels(None, None).await,
        Err(Error::Zombie)
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(hook.status().is_zombie());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!hook.status().is_zombie());
    assert!(hook.status().is_hooked());
    let hfn = hook.highest_free_nodes().await.unwrap();
    assert_eq!(hfn.level, Some(0));
}

#[tokio::test(start_paused = true)]
async fn small_loss_is_not_a_split() {
    let topo = Topology::new(1, 16).unwrap();
    let transport = Arc::new(Scripted::default());
    let hook = node(topo, &[4], &[5, 6, 7, 8], NETID, vec![], transport);

    hook.communicating_vessels(Some(&[5][..]), Some(&[4][..])).await.unwrap();
    assert!(!hook.status().is_zombie());
    assert!(hook.highest_free_nodes().await.is_ok());
}

#[tokio::test]
async fn free_slot_queries_beyond_the_topology_answer_zero() {
    let topo = topo();
    let transport = Arc::new(Scripted::default());
    let hook = node(topo, &[1, 0], &[2, 3], NETID, vec![], transport);
    assert_eq!(hook.free_nodes_nb(0).await.unwrap(), 13);
    assert_eq!(hook.free_nodes_nb(2).await.unwrap(), 0);
    assert_eq!(hook.free_nodes_nb(usize::MAX).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn imbalance_moves_node_into_the_emptier_gnode() {
    let (hook, transport) = imbalanced(Some(3), Some(Nip::new(vec![7, 1])));
    let mut events = hook.subscribe();

    hook.communicating_vessels(None, None).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        HookEvent::Hooked {
            old: Nip::new(vec![1, 0]),
            new: Nip::new(vec![7, 1])
        }
    );
    assert_eq!(hook.table().netid(), NETID);

    let calls = transport.calls();
    assert!(calls.contains(&Call::GoingOut {
        target: CoordTarget {
            level: 1,
            hip: Nip::new(vec![0, 0]),
            netid: NETID,
            via: None,
        },
        lvl: 0,
        id: 1,
        gfree_new: Some(10),
    }));
    assert!(calls.contains(&Call::GoingIn {
        target: CoordTarget {
            level: 1,
            hip: Nip::new(vec![0, 1]),
            netid: NETID,
            via: None,
        },
        lvl: 0,
        gfree_old: Some(3),
    }));
    assert!(calls.contains(&Call::GoingOutOk));
    assert!(calls.contains(&Call::Activate(topo().nip_to_ip(&Nip::new(vec![7, 1])))));

    // Still settling until the second notification
    assert!(!hook.status().is_hooked());
    assert_eq!(events.recv().await.unwrap(), HookEvent::Hooked2);
    assert!(hook.status().is_hooked());
}

#[tokio::test(start_paused = true)]
async fn denied_departure_keeps_address_and_netid() {
    let (hook, transport) = imbalanced(None, Some(Nip::new(vec![7, 1])));

    hook.communicating_vessels(None, None).await.unwrap();

    assert_eq!(hook.me().await, Nip::new(vec![1, 0]));
    assert_eq!(hook.table().netid(), NETID);
    assert!(hook.status().is_hooked());
    assert_eq!(transport.going_in_count(), 0);
    assert!(!transport
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Activate(_))));
}

#[tokio::test(start_paused = true)]
async fn denied_arrival_keeps_address_and_netid() {
    let (hook, transport) = imbalanced(Some(3), None);

    let outcome = hook
        .hook(HookRequest::communicating_vessels(
            vec![neigh(&topo(), &[1, 1], NETID)],
            10,
        ))
        .await;

    assert_eq!(outcome, HookOutcome::NetworkFull);
    assert_eq!(hook.me().await, Nip::new(vec![1, 0]));
    assert_eq!(hook.table().netid(), NETID);
    assert!(!transport.calls().contains(&Call::GoingOutOk));
}

#[tokio::test(start_paused = true)]
async fn balanced_gnodes_stay_put() {
    let topo = topo();
    let nr = neigh(&topo, &[1, 1], NETID);
    let transport = Arc::new(Scripted {
        free_nb: HashMap::from([(nr.ip, 3)]),
        ..Default::default()
    });
    let others: Vec<SlotId> = (2..15).collect();
    let hook = node(topo, &[1, 0], &others, NETID, vec![nr], transport.clone());

    hook.communicating_vessels(None, None).await.unwrap();
    assert!(transport.calls().is_empty());
    assert_eq!(hook.me().await, Nip::new(vec![1, 0]));
}

#[tokio::test(start_paused = true)]
async fn fuller_neighbour_is_asked_to_check_itself() {
    let topo = topo();
    let nr = neigh(&topo, &[1, 1], NETID);
    let transport = Arc::new(Scripted {
        free_nb: HashMap::from([(nr.ip, 0)]),
        ..Default::default()
    });
    // 8 free slots here
    let hook = node(topo, &[1, 0], &[2, 3, 4, 5, 6, 7, 8], NETID, vec![nr.clone()], transport.clone());

    hook.communicating_vessels(None, None).await.unwrap();
    assert_eq!(transport.calls(), vec![Call::Vessels(nr.ip)]);
}

#[tokio::test(start_paused = true)]
async fn request_during_an_attempt_is_parked() {
    let (hook, transport) = imbalanced(Some(3), Some(Nip::new(vec![7, 1])));
    let first = hook.spawn_hook(HookRequest::communicating_vessels(
        vec![neigh(&topo(), &[1, 1], NETID)],
        10,
    ));
    while !hook.is_running() {
        tokio::task::yield_now().await;
    }

    assert_eq!(hook.hook(HookRequest::bootstrap()).await, HookOutcome::Queued);

    let outcome = first.await.unwrap();
    assert!(matches!(outcome, HookOutcome::Hooked { .. }));
    assert!(!hook.is_running());
    assert_eq!(transport.going_in_count(), 2);
}
