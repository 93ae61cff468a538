//! Four-replica cluster over real TCP.
//!
//! Spins up a root with three leaves, submits commands at the root, and
//! waits for the two-chain rule to hand decisions back on the root's
//! decision stream. Exercises the full production path: codec, transport
//! handshake, verification pool, timers, and the engine.

use arbor_node::{init_telemetry, NetworkConfig, NodeRunner, PeerNetwork};
use arbor_types::{Hash, KeyPair, ReplicaId, ReplicaInfo, ReplicaSet};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn keypair(i: u16) -> KeyPair {
    KeyPair::from_seed(&[i as u8 + 41; 32])
}

fn replica_set(n: u16) -> Arc<ReplicaSet> {
    Arc::new(ReplicaSet::new(
        (0..n)
            .map(|i| {
                let key = keypair(i);
                ReplicaInfo {
                    id: ReplicaId(i),
                    public_key: key.public_key(),
                    // Placeholder; the test wires connections explicitly.
                    address: "127.0.0.1:0".parse().unwrap(),
                    cert_hash: Hash::digest(&key.public_key().to_bytes()),
                }
            })
            .collect(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_replicas_commit_commands_over_tcp() {
    init_telemetry();

    let n = 4u16;
    let replicas = replica_set(n);

    // Bind all transports first, then wire the tree edges by hand (the
    // membership table carries placeholder addresses in this test).
    let mut networks = Vec::new();
    let mut addrs = Vec::new();
    for i in 0..n {
        let (network, inbound_rx, addr) = PeerNetwork::spawn(
            NetworkConfig::default(),
            ReplicaId(i),
            keypair(i),
            replicas.clone(),
        )
        .await
        .unwrap();
        networks.push(Some((network, inbound_rx)));
        addrs.push(addr);
    }

    for i in 1..n as usize {
        let (network, _) = networks[i].as_ref().unwrap();
        let network = network.clone();
        network.connect(ReplicaId(0), addrs[0]).await.unwrap();
    }

    let mut root_commands = None;
    let mut root_decisions = None;
    let mut shutdowns = Vec::new();

    for i in 0..n {
        let (network, inbound_rx) = networks[i as usize].take().unwrap();
        let mut runner = NodeRunner::builder()
            .id(ReplicaId(i))
            .key(keypair(i))
            .replicas(replicas.clone())
            .fanout(3)
            .nworker(2)
            .network(network, inbound_rx)
            .build()
            .await
            .unwrap();

        if i == 0 {
            root_commands = Some(runner.command_sender());
            root_decisions = runner.take_decision_stream();
        }
        shutdowns.push(runner.shutdown_handle().unwrap());
        tokio::spawn(runner.run());
    }

    let commands = root_commands.unwrap();
    let mut decisions = root_decisions.unwrap();

    // Three commands: with the two-chain rule, the certificates on blocks
    // two and three finalise commands one and two.
    for i in 1..=3u64 {
        commands
            .send((Hash::digest(&i.to_le_bytes()), arbor_core::RequestId(i)))
            .await
            .unwrap();
    }

    let mut decided = HashSet::new();
    for _ in 0..2 {
        let (request_id, finality) = tokio::time::timeout(Duration::from_secs(30), decisions.recv())
            .await
            .expect("decision timed out")
            .expect("decision stream open");
        assert!(finality.height > 0);
        decided.insert(request_id.0);
    }
    assert_eq!(decided, HashSet::from([1, 2]));

    for shutdown in shutdowns {
        shutdown.shutdown();
    }
}
