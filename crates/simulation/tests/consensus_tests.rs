//! Scenario tests for the tree-overlay consensus flow.
//!
//! Block content hashes depend only on header fields, not signatures, so
//! the tests reconstruct the proposer's expected blocks locally and probe
//! the cluster by hash.

use arbor_core::RequestId;
use arbor_simulation::{sim_keypair, SimulationConfig, SimulationRunner};
use arbor_types::{Block, Hash, QuorumCert, ReplicaId};
use std::time::Duration;

fn config(n: u16, fanout: usize) -> SimulationConfig {
    SimulationConfig {
        n,
        fanout,
        ..Default::default()
    }
}

/// The proposer's first block for a given command, reconstructed for its
/// content hash.
fn expected_b1(seed: u64, cmd: Hash) -> Block {
    let genesis = Block::genesis();
    Block::new(
        1,
        vec![genesis.hash()],
        QuorumCert::new(genesis.hash()),
        vec![cmd],
        ReplicaId(0),
        &sim_keypair(seed, 0),
    )
}

fn expected_child(seed: u64, parent: &Block, cmd: Hash) -> Block {
    Block::new(
        parent.height() + 1,
        vec![parent.hash()],
        QuorumCert::new(parent.hash()),
        vec![cmd],
        ReplicaId(0),
        &sim_keypair(seed, 0),
    )
}

/// Straight-line delivery: four replicas, one proposal, every replica
/// delivers and votes, the root finalises exactly once with no fetches.
#[test]
fn straight_line_delivery_and_quorum() {
    let seed = 42;
    let mut sim = SimulationRunner::new(config(4, 3), seed);
    let cmd = Hash::digest(b"cmd-1");
    sim.submit_command(ReplicaId(0), cmd, RequestId(1));
    sim.run_until(Duration::from_secs(5));

    let b1 = expected_b1(seed, cmd);
    for i in 0..4 {
        assert!(
            sim.node(ReplicaId(i)).is_delivered(&b1.hash()),
            "replica {i} delivered the proposal"
        );
    }

    assert!(sim.node(ReplicaId(0)).is_qc_finished(&b1.hash()));
    assert_eq!(sim.node(ReplicaId(0)).stats().qc_finished, 1);
    // Quorum is three of four; the straggler vote is dropped at the door.
    assert_eq!(
        sim.node(ReplicaId(0)).self_qc_contributors(&b1.hash()),
        sim.replicas().quorum_threshold()
    );

    // One proposal to each leaf, one vote from each leaf, no block
    // requests and no relays in a depth-one tree.
    assert_eq!(sim.message_count(ReplicaId(0), "Propose"), 3);
    for i in 1..4 {
        assert_eq!(sim.message_count(ReplicaId(i), "Vote"), 1);
        assert_eq!(sim.message_count(ReplicaId(i), "VoteRelay"), 0);
    }
    for i in 0..4 {
        assert_eq!(sim.message_count(ReplicaId(i), "ReqBlock"), 0);
    }
    assert!(sim.fatals().is_empty());
    // A single block cannot commit under the two-chain rule.
    assert!(sim.decisions().is_empty());
}

/// Tree fan-in: thirteen replicas at fanout three. Each interior node
/// sends exactly one relay covering its subtree of four; the root
/// finalises at the quorum threshold.
#[test]
fn thirteen_replica_fan_in() {
    let seed = 1337;
    let mut sim = SimulationRunner::new(config(13, 3), seed);
    let cmd = Hash::digest(b"cmd-1");
    sim.submit_command(ReplicaId(0), cmd, RequestId(1));
    sim.run_until(Duration::from_secs(10));

    let b1 = expected_b1(seed, cmd);
    for i in 0..13 {
        assert!(
            sim.node(ReplicaId(i)).is_delivered(&b1.hash()),
            "replica {i} delivered the proposal"
        );
    }

    // Interior nodes 1..3 each relay once, carrying self plus three
    // grandchildren; they never send direct votes.
    let mut relays = sim.relay_log().to_vec();
    relays.sort();
    assert_eq!(
        relays,
        vec![
            (ReplicaId(1), 4),
            (ReplicaId(2), 4),
            (ReplicaId(3), 4),
        ]
    );
    for i in 1..4 {
        assert_eq!(sim.message_count(ReplicaId(i), "Vote"), 0);
        assert_eq!(sim.message_count(ReplicaId(i), "VoteRelay"), 1);
    }
    for i in 4..13 {
        assert_eq!(sim.message_count(ReplicaId(i), "Vote"), 1);
    }

    // The root reaches quorum (9 of 13) from itself plus two full
    // subtrees; the last relay arrives after quorum and is dropped by the
    // early exit.
    assert!(sim.node(ReplicaId(0)).is_qc_finished(&b1.hash()));
    assert_eq!(sim.node(ReplicaId(0)).stats().qc_finished, 1);
    assert_eq!(
        sim.node(ReplicaId(0)).self_qc_contributors(&b1.hash()),
        sim.replicas().quorum_threshold()
    );
    assert!(sim.fatals().is_empty());
}

/// A replica cut off from its parent misses a proposal, yet quorum forms
/// without its subtree. After healing, the next proposal makes it fetch
/// the missed ancestor exactly once and catch up.
#[test]
fn partitioned_replica_catches_up_via_fetch() {
    let seed = 7;
    let mut sim = SimulationRunner::new(config(13, 3), seed);

    // Cut the proposal path from interior 1 to its leaf 4.
    sim.network_mut()
        .partition_unidirectional(ReplicaId(1), ReplicaId(4));

    let cmd1 = Hash::digest(b"cmd-1");
    sim.submit_command(ReplicaId(0), cmd1, RequestId(1));
    sim.run_until(Duration::from_secs(5));

    let b1 = expected_b1(seed, cmd1);
    assert!(
        !sim.node(ReplicaId(4)).is_delivered(&b1.hash()),
        "partitioned replica missed the proposal"
    );
    // Replica 1's subtree stalls at three of four, so it never relays...
    assert_eq!(sim.message_count(ReplicaId(1), "VoteRelay"), 0);
    // ...but the root still finalises from the other two subtrees.
    assert!(sim.node(ReplicaId(0)).is_qc_finished(&b1.hash()));

    // Heal and propose again: the follow-up block references the missed
    // ancestry.
    sim.network_mut().heal_all();
    let cmd2 = Hash::digest(b"cmd-2");
    sim.submit_command(ReplicaId(0), cmd2, RequestId(2));
    sim.run_until(Duration::from_secs(10));

    let b2 = expected_child(seed, &b1, cmd2);
    assert!(sim.node(ReplicaId(4)).is_delivered(&b1.hash()));
    assert!(sim.node(ReplicaId(4)).is_delivered(&b2.hash()));
    // Exactly one fetch round-trip for the missed block.
    assert_eq!(sim.message_count(ReplicaId(4), "ReqBlock"), 1);
    assert!(sim.node(ReplicaId(0)).is_qc_finished(&b2.hash()));

    // The certificate on the second block commits the first: the root
    // holds the decision callback for command one.
    assert!(sim
        .decisions()
        .iter()
        .any(|(node, req, fin)| *node == ReplicaId(0)
            && *req == RequestId(1)
            && fin.block_hash == b1.hash()));
    assert!(sim.fatals().is_empty());
}

/// Decisions flow to every replica that registered the command, not just
/// the proposer: followers commit through the justify chain carried by
/// later proposals.
#[test]
fn decisions_reach_registered_replicas() {
    let seed = 9;
    let mut sim = SimulationRunner::new(config(7, 3), seed);

    let cmds: Vec<Hash> = (1..=4u8)
        .map(|i| Hash::digest(&[i, b'c', b'm', b'd']))
        .collect();

    for (i, cmd) in cmds.iter().enumerate() {
        // Register at the proposer and at one follower leaf.
        sim.submit_command(ReplicaId(0), *cmd, RequestId(i as u64 + 1));
        sim.submit_command(ReplicaId(5), *cmd, RequestId(i as u64 + 101));
        let deadline = sim.now() + Duration::from_secs(2);
        sim.run_until(deadline);
    }
    let deadline = sim.now() + Duration::from_secs(5);
    sim.run_until(deadline);

    let root_decided: Vec<u64> = sim
        .decisions()
        .iter()
        .filter(|(node, _, _)| *node == ReplicaId(0))
        .map(|(_, req, _)| req.0)
        .collect();
    assert_eq!(root_decided, vec![1, 2, 3]);

    let follower_decided: Vec<u64> = sim
        .decisions()
        .iter()
        .filter(|(node, _, _)| *node == ReplicaId(5))
        .map(|(_, req, _)| req.0)
        .collect();
    assert_eq!(follower_decided, vec![101, 102]);

    assert!(sim.fatals().is_empty());
}
