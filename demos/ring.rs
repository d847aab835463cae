//! Start a small ring on localhost, store a few values from some nodes,
//! and look them up from others.

use std::net::SocketAddrV4;

use pastry::Node;

use clap::Parser;

use tracing::Level;
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of nodes in the ring
    #[arg(short, long, default_value_t = 5)]
    nodes: usize,

    /// Port of the first node, the others use the following ports
    #[arg(short, long, default_value_t = 5000)]
    port: u16,
}

const FRUITS: [(&str, &str); 5] = [
    ("apple", "red"),
    ("banana", "yellow"),
    ("cherry", "red"),
    ("date", "brown"),
    ("elderberry", "purple"),
];

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let bootstrap = Node::builder()
        .port(cli.port)
        .build()
        .expect("failed to start the bootstrap node");
    println!("Bootstrap node created with Id: {}", bootstrap.id());

    let mut nodes = vec![bootstrap.clone()];

    for i in 1..cli.nodes {
        let node = Node::builder()
            .port(cli.port + i as u16)
            .bootstrap(SocketAddrV4::new([127, 0, 0, 1].into(), cli.port))
            .build()
            .expect("failed to join the ring");

        println!("Node {i} created with Id: {}", node.id());
        nodes.push(node);
    }

    println!("\nStoring key-value pairs...");
    for (i, (key, value)) in FRUITS.iter().enumerate() {
        let node = &nodes[i % nodes.len()];

        match node.put(key.as_bytes(), *value) {
            Ok(owner) => println!("Node {} stored {key}={value} at {:?}", node.id(), owner),
            Err(error) => println!("Node {} failed to store {key}: {error}", node.id()),
        }
    }

    println!("\nLooking up values...");
    for (i, (key, _)) in FRUITS.iter().enumerate() {
        // A different node than the one that stored the key
        let node = &nodes[(i + 2) % nodes.len()];

        match node.get(key.as_bytes()) {
            Ok(Some(value)) => println!(
                "Node {} found {key}={}",
                node.id(),
                String::from_utf8_lossy(&value)
            ),
            Ok(None) => println!("Node {} found no value for {key}", node.id()),
            Err(error) => println!("Node {} failed to look up {key}: {error}", node.id()),
        }
    }

    println!("\nShutting down nodes...");
    for node in &nodes {
        let info = node.info();
        println!(
            "Node {} at {}: {} leaves, {} routing table entries, {} stored keys",
            info.id(),
            info.local_addr(),
            info.leaf_set_size(),
            info.routing_table_size(),
            info.stored_keys()
        );

        node.shutdown();
    }
}
