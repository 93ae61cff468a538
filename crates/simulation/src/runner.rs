//! Deterministic simulation runner.
//!
//! Every replica's engine runs in-process; a single ordered event queue
//! replaces the network and the timers, and verification runs inline
//! instead of on a worker pool. Given the same seed the run is
//! bit-for-bit reproducible, which is what lets the scenario tests make
//! exact assertions about message counts and aggregation state.

use crate::event_queue::EventKey;
use crate::network::{NetworkModel, SimulatedNetwork};
use arbor_consensus::{BasicSafetyCore, EngineConfig, EngineState, RootPacemaker};
use arbor_core::{Action, Event, Finality, PeerMessage, RequestId, StateMachine, TimerId};
use arbor_types::{Hash, KeyPair, ReplicaId, ReplicaInfo, ReplicaSet};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub n: u16,
    pub fanout: usize,
    pub network: NetworkModel,
    pub engine: EngineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            n: 4,
            fanout: 3,
            network: NetworkModel::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Counters collected while the simulation runs.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    pub events_processed: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::FetchTick => Event::FetchTick,
        TimerId::Stats => Event::StatsTick,
    }
}

/// Deterministic keypair for replica `i` of a seeded simulation.
pub fn sim_keypair(seed: u64, i: u16) -> KeyPair {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).to_le_bytes());
    bytes[8..10].copy_from_slice(&i.to_le_bytes());
    bytes[31] = 0x5a;
    KeyPair::from_seed(&bytes)
}

/// Membership table of a seeded simulation. Addresses are placeholders;
/// nothing dials in a simulation.
pub fn sim_replica_set(seed: u64, n: u16) -> Arc<ReplicaSet> {
    Arc::new(ReplicaSet::new(
        (0..n)
            .map(|i| {
                let key = sim_keypair(seed, i);
                ReplicaInfo {
                    id: ReplicaId(i),
                    public_key: key.public_key(),
                    address: "127.0.0.1:0".parse().expect("static address"),
                    cert_hash: Hash::digest(&key.public_key().to_bytes()),
                }
            })
            .collect(),
    ))
}

/// The whole cluster, driven one event at a time.
pub struct SimulationRunner {
    nodes: Vec<EngineState>,
    replicas: Arc<ReplicaSet>,
    queue: BTreeMap<EventKey, (ReplicaId, Event)>,
    seq: u64,
    now: Duration,
    network: SimulatedNetwork,
    rng: ChaCha8Rng,
    timers: HashMap<(ReplicaId, TimerId), EventKey>,
    decisions: Vec<(ReplicaId, RequestId, Finality)>,
    fatals: Vec<(ReplicaId, String)>,
    /// Messages sent, by sender and message kind.
    message_counts: HashMap<(ReplicaId, &'static str), u64>,
    /// Contributor count of every relayed aggregate, by sender.
    relay_log: Vec<(ReplicaId, usize)>,
    stats: SimulationStats,
}

impl SimulationRunner {
    pub fn new(config: SimulationConfig, seed: u64) -> Self {
        let replicas = sim_replica_set(seed, config.n);
        let nodes: Vec<EngineState> = (0..config.n)
            .map(|i| {
                let id = ReplicaId(i);
                let key = sim_keypair(seed, i);
                EngineState::new(
                    id,
                    key.clone(),
                    replicas.clone(),
                    config.fanout,
                    config.engine.clone(),
                    Box::new(BasicSafetyCore::new(id, key)),
                    Box::new(RootPacemaker::new(ReplicaId(0), arbor_types::Block::genesis().hash())),
                )
                .expect("valid simulation topology")
            })
            .collect();

        let mut runner = SimulationRunner {
            nodes,
            replicas,
            queue: BTreeMap::new(),
            seq: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(config.network),
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: HashMap::new(),
            decisions: Vec::new(),
            fatals: Vec::new(),
            message_counts: HashMap::new(),
            relay_log: Vec::new(),
            stats: SimulationStats::default(),
        };

        for i in 0..runner.nodes.len() {
            let actions = runner.nodes[i].startup_actions();
            runner.process_actions(ReplicaId(i as u16), actions);
        }
        runner
    }

    // ── Probes ──────────────────────────────────────────────────────────

    pub fn node(&self, id: ReplicaId) -> &EngineState {
        &self.nodes[id.0 as usize]
    }

    pub fn replicas(&self) -> &Arc<ReplicaSet> {
        &self.replicas
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn decisions(&self) -> &[(ReplicaId, RequestId, Finality)] {
        &self.decisions
    }

    pub fn fatals(&self) -> &[(ReplicaId, String)] {
        &self.fatals
    }

    pub fn message_count(&self, sender: ReplicaId, kind: &'static str) -> u64 {
        self.message_counts
            .get(&(sender, kind))
            .copied()
            .unwrap_or(0)
    }

    /// `(sender, contributors)` of every VoteRelay sent so far.
    pub fn relay_log(&self) -> &[(ReplicaId, usize)] {
        &self.relay_log
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    // ── Driving ─────────────────────────────────────────────────────────

    /// Submit a client command to one replica at the current time.
    pub fn submit_command(&mut self, node: ReplicaId, cmd_hash: Hash, request_id: RequestId) {
        self.schedule(
            node,
            Event::CommandSubmitted {
                cmd_hash,
                request_id,
            },
            self.now,
        );
    }

    /// Inject an arbitrary event (test hook, e.g. duplicate votes).
    pub fn inject(&mut self, node: ReplicaId, event: Event) {
        self.schedule(node, event, self.now);
    }

    /// Process events until the queue's next event is past `deadline`.
    pub fn run_until(&mut self, deadline: Duration) {
        while let Some(time) = self.queue.keys().next().map(|k| k.time) {
            if time > deadline {
                break;
            }
            self.step();
        }
        self.now = self.now.max(deadline);
    }

    /// Process one event.
    pub fn step(&mut self) -> bool {
        let Some((&key, _)) = self.queue.iter().next() else {
            return false;
        };
        let (node, event) = self.queue.remove(&key).expect("peeked key exists");
        self.now = self.now.max(key.time);
        self.stats.events_processed += 1;

        trace!(replica = %node, kind = event.type_name(), at = ?self.now, "sim event");

        let engine = &mut self.nodes[node.0 as usize];
        engine.set_time(self.now);
        let actions = engine.handle(event);
        self.process_actions(node, actions);
        true
    }

    fn schedule(&mut self, node: ReplicaId, event: Event, time: Duration) -> EventKey {
        let key = EventKey {
            time,
            priority: event.priority(),
            seq: self.seq,
        };
        self.seq += 1;
        self.queue.insert(key, (node, event));
        key
    }

    fn process_actions(&mut self, from: ReplicaId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    *self
                        .message_counts
                        .entry((from, message.type_name()))
                        .or_insert(0) += 1;
                    if let PeerMessage::VoteRelay(relay) = &message {
                        self.relay_log.push((from, relay.cert.contributor_count()));
                    }
                    match self.network.should_deliver(from, to, &mut self.rng) {
                        Some(latency) => {
                            self.stats.messages_sent += 1;
                            self.schedule(to, message.into_event(from), self.now + latency);
                        }
                        None => {
                            self.stats.messages_dropped += 1;
                        }
                    }
                }

                // Verification is instant and inline; the callback lands
                // at the same timestamp with internal priority, ahead of
                // any external event.
                Action::VerifyBlock { block, public_key } => {
                    let valid = block.verify_signature(&public_key);
                    self.schedule(
                        from,
                        Event::BlockVerified {
                            block_hash: block.hash(),
                            valid,
                        },
                        self.now,
                    );
                }
                Action::VerifyVote { vote, public_key } => {
                    let valid = vote.cert.verify(&public_key);
                    self.schedule(from, Event::VoteVerified { vote, valid }, self.now);
                }
                Action::VerifyQuorum { qc, purpose } => {
                    let valid = qc.verify(&self.replicas);
                    self.schedule(from, Event::QuorumVerified { qc, purpose, valid }, self.now);
                }

                Action::SetTimer { id, duration } => {
                    if let Some(key) = self.timers.remove(&(from, id)) {
                        self.queue.remove(&key);
                    }
                    let key = self.schedule(from, timer_event(id), self.now + duration);
                    self.timers.insert((from, id), key);
                }
                Action::CancelTimer { id } => {
                    if let Some(key) = self.timers.remove(&(from, id)) {
                        self.queue.remove(&key);
                    }
                }

                Action::NotifyDecision {
                    request_id,
                    finality,
                } => {
                    self.decisions.push((from, request_id, finality));
                }
                Action::Fatal { reason } => {
                    // Recorded, not panicking: scenario tests assert on
                    // fatality instead of unwinding through the runner.
                    self.fatals.push((from, reason));
                }
            }
        }
    }
}
