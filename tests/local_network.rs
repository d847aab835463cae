//! Multi-node scenarios simulated in a single process.

use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use pastry::rpc::{Config, LocalNetwork, Rpc};
use pastry::{Bytes, Id, IdSpace, Peer};

fn address(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new([127, 0, 0, 1].into(), port)
}

/// The five node ring `{10, 40, 70, 100, 130}` in a 256 Id ring, with 2 leaves on each side.
fn small_ring() -> (LocalNetwork, Vec<Arc<Rpc>>) {
    let network = LocalNetwork::new();
    let config = Config {
        id_space: IdSpace::new(8, 4).unwrap(),
        leaf_set_size: 4,
        ..Default::default()
    };

    let nodes: Vec<Arc<Rpc>> = [10, 40, 70, 100, 130]
        .into_iter()
        .map(|id| network.spawn(Peer::new(Id(id), address(6000 + id as u16)), config.clone()))
        .collect();

    for node in &nodes[1..] {
        node.join(nodes[0].local_addr()).unwrap();
    }

    (network, nodes)
}

fn node(nodes: &[Arc<Rpc>], id: u64) -> &Arc<Rpc> {
    nodes.iter().find(|node| node.id() == &Id(id)).unwrap()
}

/// Nodes with Ids hashed from their addresses in the default 16 bit space.
fn hashed_ring(count: u16) -> (LocalNetwork, Vec<Arc<Rpc>>) {
    let network = LocalNetwork::new();
    let config = Config::default();

    let nodes: Vec<Arc<Rpc>> = (0..count)
        .map(|i| {
            let peer = Peer::from_address(&config.id_space, address(7000 + i));
            network.spawn(peer, config.clone())
        })
        .collect();

    for node in &nodes[1..] {
        node.join(nodes[0].local_addr()).unwrap();
    }

    (network, nodes)
}

#[test]
fn nearest_leaves_and_owner() {
    let (_network, nodes) = small_ring();

    let leaf_set = node(&nodes, 70).leaf_set();
    assert_eq!(leaf_set.counter_clockwise()[0].id, Id(40));
    assert_eq!(leaf_set.clockwise()[0].id, Id(100));

    let owner = node(&nodes, 130)
        .put_target(Id(95), Bytes::from_static(b"red"))
        .unwrap();
    assert_eq!(owner.id, Id(100));

    let response = node(&nodes, 10).get_target(Id(95)).unwrap();
    assert_eq!(response.owner.id, Id(100));
    assert_eq!(response.value, Some(Bytes::from_static(b"red")));
}

#[test]
fn routes_around_a_timed_out_peer() {
    let (network, nodes) = small_ring();
    let node_70 = node(&nodes, 70);

    network.set_unreachable(address(6040), true);

    // 40 and 70 are equally close to 55, 40 wins the tie as the lower Id.
    let response = node_70.get_target(Id(55)).unwrap();

    assert_eq!(response.owner.id, Id(70));
    assert_eq!(response.value, None);
    assert!(!node_70.known_peers().iter().any(|peer| peer.id == Id(40)));
}

#[test]
fn missing_key_is_not_an_error() {
    let (_network, nodes) = small_ring();

    assert_eq!(node(&nodes, 10).get(b"durian").unwrap(), None);
}

#[test]
fn exactly_one_node_is_responsible() {
    let (_network, nodes) = hashed_ring(12);
    let space = IdSpace::default();

    for _ in 0..300 {
        let key = Id::random(&space);

        let responsible = nodes
            .iter()
            .filter(|node| node.is_responsible_for(&key))
            .count();

        assert_eq!(responsible, 1, "key {key}");
    }
}

#[test]
fn put_then_get_from_every_node() {
    let (_network, nodes) = hashed_ring(12);

    let fruits = [
        ("apple", "red"),
        ("banana", "yellow"),
        ("cherry", "red"),
        ("date", "brown"),
        ("elderberry", "purple"),
    ];

    for (i, &(key, value)) in fruits.iter().enumerate() {
        let owner = nodes[i % nodes.len()]
            .put(key.as_bytes(), Bytes::from_static(value.as_bytes()))
            .unwrap();

        let target = nodes[0].space().hash_key(key.as_bytes());

        for node in &nodes {
            let response = node.get_target(target).unwrap();

            assert_eq!(response.owner, owner);
            assert_eq!(response.value, Some(Bytes::from_static(value.as_bytes())));
        }

        let owners: Vec<_> = nodes
            .iter()
            .filter(|node| node.stored(&target).is_some())
            .collect();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].peer(), owner);
    }
}

#[test]
fn rejoining_the_same_address_keeps_one_entry() {
    let (network, nodes) = hashed_ring(8);
    let space = IdSpace::default();

    let rejoining = nodes[5].local_addr();
    let id = *nodes[5].id();

    network.remove(&rejoining);
    let restarted = network.spawn(Peer::from_address(&space, rejoining), Config::default());

    assert_eq!(restarted.id(), &id);

    restarted.join(nodes[0].local_addr()).unwrap();
    restarted.join(nodes[2].local_addr()).unwrap();

    for node in nodes.iter().filter(|node| node.id() != &id) {
        let known = node.known_peers();
        let unique: HashSet<Id> = known.iter().map(|peer| peer.id).collect();

        assert_eq!(unique.len(), known.len());
        assert!(known
            .iter()
            .filter(|peer| peer.id == id)
            .all(|peer| peer.address == rejoining));
    }
}

#[test]
fn maintenance_evicts_failed_leaves() {
    let network = LocalNetwork::new();
    let config = Config {
        id_space: IdSpace::new(8, 4).unwrap(),
        leaf_set_size: 4,
        maintenance_interval: Duration::ZERO,
        ..Default::default()
    };

    let nodes: Vec<Arc<Rpc>> = [10, 40, 70, 100, 130]
        .into_iter()
        .map(|id| network.spawn(Peer::new(Id(id), address(6000 + id as u16)), config.clone()))
        .collect();

    for node in &nodes[1..] {
        node.join(nodes[0].local_addr()).unwrap();
    }

    let node_100 = node(&nodes, 100);
    assert!(node_100.leaf_set().contains(&Id(130)));

    network.set_unreachable(address(6130), true);

    assert!(node_100.maintain() >= 1);
    assert!(!node_100.leaf_set().contains(&Id(130)));

    // The rest of the ring is still reachable.
    assert_eq!(node_100.maintain(), 0);
}

#[test]
fn relaying_hop_answers_before_its_sender_times_out() {
    let network = LocalNetwork::with_timeouts();
    let config = Config {
        id_space: IdSpace::new(8, 4).unwrap(),
        leaf_set_size: 4,
        request_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    let spawn = |id: u64| network.spawn(Peer::new(Id(id), address(9000 + id as u16)), config.clone());
    let a = spawn(10);
    let b = spawn(70);
    let c = spawn(100);

    // 10 only knows 70, which only knows 100.
    a.on_message_received(&b.peer());
    b.on_message_received(&c.peer());

    network.set_unreachable(c.local_addr(), true);

    let response = a.get_target(Id(95)).unwrap();

    // 70 gave up on 100 in time to answer as the closest live node.
    assert_eq!(response.owner, b.peer());
    assert!(a.known_peers().contains(&b.peer()));
    assert!(!b.known_peers().contains(&c.peer()));
}
