//! End-to-end scenarios on the in-memory network.

use std::time::Duration;

use burrow_hook::{Error as HookError, HookEvent, HookOutcome};
use burrow_radar::{NeighFilter, NeighbourEvent};
use burrow_sim::{SimConfig, SimNet};
use burrow_topology::{NetId, Nip};

const NETID: NetId = NetId::new(7);

#[tokio::test(start_paused = true)]
async fn lone_node_founds_its_own_network() {
    let net = SimNet::new(SimConfig::default()).unwrap();
    let index = net.add_node().unwrap();
    let node = net.node(index).unwrap();
    let before = node.nip().await;

    let outcomes = net.bootstrap_all().await;

    assert_eq!(
        outcomes,
        vec![HookOutcome::Hooked {
            old: before.clone(),
            new: before.clone()
        }]
    );
    assert_eq!(node.nip().await, before);
    assert!(!node.netid().is_none());
    assert!(node.status().is_hooked());
}

#[tokio::test(start_paused = true)]
async fn two_neighbours_agree_on_one_netid() {
    let net = SimNet::new(SimConfig::default().with_seed(3)).unwrap();
    let a = net.add_node().unwrap();
    let b = net.add_node().unwrap();
    net.link(a, b);

    net.bootstrap_all().await;
    let (na, nb) = (net.node(a).unwrap(), net.node(b).unwrap());
    assert_ne!(na.netid(), nb.netid());

    // A completed scan runs the collision check on both sides
    net.scan_all().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(net.collision_rehooks(), 1);
    net.scan_all().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(net.collision_rehooks(), 1);

    let netid = na.netid();
    assert!(!netid.is_none());
    assert_eq!(nb.netid(), netid);
    assert!(na.status().is_hooked());
    assert!(nb.status().is_hooked());

    for (me, other) in [(&na, &nb), (&nb, &na)] {
        let neighs = me.table().neigh_list(NeighFilter::All);
        assert_eq!(neighs.len(), 1);
        assert_eq!(neighs[0].ip, other.ip());
        assert_eq!(neighs[0].netid, netid);
    }
    assert_eq!(net.summary().await.netids, vec![netid]);
}

#[tokio::test(start_paused = true)]
async fn split_minority_goes_zombie_and_rehooks() {
    let net = SimNet::new(SimConfig::default().with_topology(1, 8)).unwrap();
    for id in 0..5 {
        net.add_node_at(Nip::new(vec![id]), NETID).unwrap();
    }
    let changes = net.sync_maps().await;
    assert_eq!(changes.len(), 5);
    net.communicating_vessels(changes).await;

    for index in 2..5 {
        net.kill(index).unwrap();
    }
    let changes = net.sync_maps().await;
    assert_eq!(changes[0].old, vec![5]);
    assert_eq!(changes[0].cur, vec![2]);
    net.communicating_vessels(changes).await;

    let survivor = net.node(0).unwrap();
    assert!(survivor.status().is_zombie());
    assert!(matches!(
        survivor.hook().highest_free_nodes().await,
        Err(HookError::Zombie)
    ));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!survivor.status().is_zombie());
    assert!(survivor.status().is_hooked());
    assert!(survivor.hook().highest_free_nodes().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn crowded_node_moves_to_the_emptier_gnode() {
    let net = SimNet::new(SimConfig::default().with_topology(2, 3)).unwrap();
    // Gnode 0 is full; gnodes 1 and 2 hold one node each
    let nips = [[0, 0], [1, 0], [2, 0], [0, 1], [0, 2]];
    for nip in nips {
        net.add_node_at(Nip::new(nip.to_vec()), NETID).unwrap();
    }
    let (mover, target) = (1, 3);
    net.link(mover, target);
    net.sync_maps().await;
    net.scan_all().await;

    let node = net.node(mover).unwrap();
    let mut events = node.hook().subscribe();
    node.hook().communicating_vessels(None, None).await.unwrap();

    let new = node.nip().await;
    assert_ne!(new, Nip::new(vec![1, 0]));
    assert_eq!(new.get(1), 1);
    assert_eq!(node.netid(), NETID);
    assert!(matches!(events.recv().await.unwrap(), HookEvent::Hooked { .. }));

    // Neighbours are advertised again once the move settled
    let mut table_events = node.table().subscribe();
    assert_eq!(events.recv().await.unwrap(), HookEvent::Hooked2);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let target_ip = net.node(target).unwrap().ip();
    assert!(matches!(
        table_events.try_recv().unwrap(),
        NeighbourEvent::New(neigh) if neigh.ip == target_ip
    ));

    // The old coordinator saw the departure acknowledged
    let old_coord = net.node(0).unwrap();
    assert!(!old_coord.coordinator().mapcache().await.is_pending(0, 1));

    net.settle().await;
    net.sync_maps().await;
    let neighbour = net.node(target).unwrap();
    assert_eq!(neighbour.hook().free_nodes_nb(0).await.unwrap(), 1);
}
