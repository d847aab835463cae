//! Micro-benchmarks for routing state operations: consider, lookup, and next_hop
//! at varying numbers of known peers. Reports nanoseconds-per-operation.
//!
//! Catches regressions in the data structures consulted on every hop.
//!
//! Run: `cargo bench --bench routing_table`

use pastry::rpc::RoutingState;
use pastry::{Id, IdSpace, Peer, RoutingTable, DEFAULT_LEAF_SET_SIZE};
use std::net::SocketAddrV4;
use std::str::FromStr;
use std::time::Instant;

fn main() {
    println!("routing_table\n");

    for space in [IdSpace::default(), IdSpace::new(64, 4).unwrap()] {
        println!("=== {} bit Ids, {} bit digits ===\n", space.bits(), space.digit_bits());

        bench_consider(space);
        bench_lookup(space);
        bench_next_hop(space);
    }
}

fn peers(space: &IdSpace, count: usize) -> Vec<Peer> {
    let addr = SocketAddrV4::from_str("127.0.0.1:5000").unwrap();

    (0..count).map(|_| Peer::new(Id::random(space), addr)).collect()
}

fn bench_consider(space: IdSpace) {
    println!("consider");

    // Pre-generate random peers outside the timed section
    let fresh = peers(&space, 10_000);

    for known in [0, 100, 1000] {
        let mut state = RoutingState::new(Id::random(&space), space, DEFAULT_LEAF_SET_SIZE);
        for peer in peers(&space, known) {
            state.consider(peer);
        }

        let start = Instant::now();
        for peer in fresh.iter().copied() {
            state.consider(peer);
        }
        let per_op = start.elapsed().as_nanos() / fresh.len() as u128;

        println!(
            "{known:>5} known: {per_op}ns/op (final routing table size: {})",
            state.routing_table().size()
        );
    }

    println!();
}

fn bench_lookup(space: IdSpace) {
    println!("lookup");

    let mut table = RoutingTable::new(Id::random(&space), space);
    for peer in peers(&space, 1000) {
        table.consider(peer);
    }

    let targets: Vec<Id> = (0..10_000).map(|_| Id::random(&space)).collect();

    let start = Instant::now();
    let mut found = 0;
    for target in &targets {
        if table.lookup(target).is_some() {
            found += 1;
        }
    }
    let per_op = start.elapsed().as_nanos() / targets.len() as u128;

    println!("{per_op}ns/op ({found} of {} targets had a next hop)", targets.len());
    println!();
}

fn bench_next_hop(space: IdSpace) {
    println!("next_hop");

    for known in [10, 100, 1000] {
        let mut state = RoutingState::new(Id::random(&space), space, DEFAULT_LEAF_SET_SIZE);
        for peer in peers(&space, known) {
            state.consider(peer);
        }

        let targets: Vec<Id> = (0..10_000).map(|_| Id::random(&space)).collect();

        let start = Instant::now();
        for target in &targets {
            std::hint::black_box(state.next_hop(target));
        }
        let per_op = start.elapsed().as_nanos() / targets.len() as u128;

        println!("{known:>5} known: {per_op}ns/op");
    }

    println!();
}
