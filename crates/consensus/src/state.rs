//! The coordination engine state machine.
//!
//! One [`EngineState`] per replica owns the block store, the pending maps,
//! and the collaborator handles. Everything it does is a synchronous
//! reaction to one event; all suspensions are encoded as pending contexts
//! (see [`crate::pending`]) resumed by later events.

use crate::config::EngineConfig;
use crate::pacemaker::Pacemaker;
use crate::pending::{
    BlockDeliveryContext, BlockFetchContext, DeliveryWaiter, PendingContribution, PendingResponse,
};
use crate::safety::SafetyCore;
use crate::store::BlockStore;
use arbor_core::{
    Action, Event, Finality, PeerMessage, Proposal, RequestId, StateMachine, TimerId, Vote,
};
use arbor_types::{Hash, KeyPair, OverlayError, ReplicaId, ReplicaSet, TreeOverlay, TreeView};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cumulative and windowed counters, logged on the stats timer.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub fetched: u64,
    pub delivered: u64,
    pub qc_finished: u64,
    pub decided: u64,
    pub part_fetched: u64,
    pub part_delivered: u64,
    pub part_decided: u64,
}

/// Per-replica coordination engine: block fetch/delivery plus tree vote
/// aggregation, driving the external safety core and pacemaker.
pub struct EngineState {
    pub(crate) id: ReplicaId,
    pub(crate) key: KeyPair,
    pub(crate) replicas: Arc<ReplicaSet>,
    pub(crate) view: TreeView,
    pub(crate) nmajority: usize,
    pub(crate) config: EngineConfig,
    pub(crate) safety: Box<dyn SafetyCore>,
    pub(crate) pacemaker: Box<dyn Pacemaker>,
    pub(crate) store: BlockStore,
    /// Ordered so the retry sweep walks hashes deterministically.
    pub(crate) fetch_waiting: BTreeMap<Hash, BlockFetchContext>,
    pub(crate) delivery_waiting: HashMap<Hash, BlockDeliveryContext>,
    pub(crate) pending_contributions: HashMap<Hash, Vec<PendingContribution>>,
    pub(crate) pending_responses: HashMap<u64, PendingResponse>,
    pub(crate) next_response_seq: u64,
    pub(crate) decision_waiting: HashMap<Hash, RequestId>,
    pub(crate) cmd_buffer: VecDeque<Hash>,
    pub(crate) now: Duration,
    pub(crate) stats: EngineStats,
}

impl EngineState {
    pub fn new(
        id: ReplicaId,
        key: KeyPair,
        replicas: Arc<ReplicaSet>,
        fanout: usize,
        config: EngineConfig,
        safety: Box<dyn SafetyCore>,
        pacemaker: Box<dyn Pacemaker>,
    ) -> Result<Self, OverlayError> {
        let overlay = TreeOverlay::build(replicas.len(), fanout)?;
        let view = overlay.view(id);
        let nmajority = replicas.quorum_threshold();

        let genesis = safety.genesis();
        let genesis_hash = genesis.hash();
        let mut store = BlockStore::new();
        // Genesis is always delivered; every ancestry walk bottoms out on
        // it.
        store.add_fetched(genesis);
        store.mark_delivered(genesis_hash);
        store.mark_committed(genesis_hash);

        info!(
            replica = %id,
            n = replicas.len(),
            nmajority,
            fanout,
            parent = ?view.parent,
            children = view.children.len(),
            subtree = view.descendants + 1,
            "engine initialised"
        );

        Ok(EngineState {
            id,
            key,
            replicas,
            view,
            nmajority,
            config,
            safety,
            pacemaker,
            store,
            fetch_waiting: BTreeMap::new(),
            delivery_waiting: HashMap::new(),
            pending_contributions: HashMap::new(),
            pending_responses: HashMap::new(),
            next_response_seq: 0,
            decision_waiting: HashMap::new(),
            cmd_buffer: VecDeque::new(),
            now: Duration::ZERO,
            stats: EngineStats::default(),
        })
    }

    /// Actions to execute once at startup: arm the periodic timers.
    pub fn startup_actions(&self) -> Vec<Action> {
        vec![
            Action::SetTimer {
                id: TimerId::FetchTick,
                duration: self.config.fetch_tick,
            },
            Action::SetTimer {
                id: TimerId::Stats,
                duration: self.config.stats_interval,
            },
        ]
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn view(&self) -> &TreeView {
        &self.view
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    // ── Test and monitoring probes ──────────────────────────────────────

    pub fn is_delivered(&self, hash: &Hash) -> bool {
        self.store.is_delivered(hash)
    }

    /// Contributors currently in the aggregate being built for a block.
    pub fn self_qc_contributors(&self, hash: &Hash) -> usize {
        self.store
            .get(hash)
            .and_then(|e| e.self_qc.as_ref())
            .map(|qc| qc.contributor_count())
            .unwrap_or(0)
    }

    pub fn is_qc_finished(&self, hash: &Hash) -> bool {
        self.store.get(hash).map(|e| e.qc_finished).unwrap_or(false)
    }

    pub fn fetch_waiting_len(&self) -> usize {
        self.fetch_waiting.len()
    }

    pub fn delivery_waiting_len(&self) -> usize {
        self.delivery_waiting.len()
    }

    // ── Command ingress ─────────────────────────────────────────────────

    /// `exec_command`: register the decision callback; the proposer also
    /// buffers the command and cuts a proposal at every `blk_size`
    /// boundary.
    fn on_command_submitted(&mut self, cmd_hash: Hash, request_id: RequestId, actions: &mut Vec<Action>) {
        if self.decision_waiting.contains_key(&cmd_hash) {
            debug!(cmd = %cmd_hash, "duplicate command submission ignored");
            return;
        }
        self.decision_waiting.insert(cmd_hash, request_id);

        if self.pacemaker.proposer() != self.id {
            return;
        }
        self.cmd_buffer.push_back(cmd_hash);
        if self.cmd_buffer.len() < self.config.blk_size {
            return;
        }

        let cmds: Vec<Hash> = self.cmd_buffer.drain(..self.config.blk_size).collect();
        let proposer = self.pacemaker.beat();
        if proposer != self.id {
            // Rotated away between batching and the beat; the new proposer
            // will pick the commands up from its own queue.
            debug!(proposer = %proposer, "not the proposer after beat");
            return;
        }
        self.propose(cmds, actions);
    }

    /// Build a proposal, self-deliver it, and push it down the tree.
    fn propose(&mut self, cmds: Vec<Hash>, actions: &mut Vec<Action>) {
        let parents = self.pacemaker.parents();
        let block = self.safety.on_propose(cmds, parents);
        let hash = block.hash();

        debug!(block = %hash, height = block.height(), "proposing");

        self.store.add_fetched(block.clone());
        self.stats.fetched += 1;
        self.stats.part_fetched += 1;
        if !self.safety.on_deliver_blk(&block) {
            warn!(block = %hash, "safety core rejected own proposal");
            return;
        }
        self.pacemaker.on_propose(&block);
        self.resolve_fetched(hash, actions);
        self.finish_delivery(hash, actions);

        // The proposer's own endorsement seeds the aggregate.
        self.ensure_self_qc(hash);

        let proposal = Proposal {
            proposer: self.id,
            block,
        };
        for child in self.view.children.clone() {
            actions.push(Action::Send {
                to: child,
                message: PeerMessage::Propose(proposal.clone()),
            });
        }

        // Degenerate overlays (n = 1) reach quorum on the proposer alone.
        self.check_thresholds(hash, actions);
    }

    // ── Proposal receipt ────────────────────────────────────────────────

    fn on_proposal_received(&mut self, proposal: Proposal, from: ReplicaId, actions: &mut Vec<Action>) {
        if !self.replicas.contains(from) || !self.replicas.contains(proposal.proposer) {
            warn!(%from, "proposal from unknown peer dropped");
            return;
        }
        if proposal.block.is_genesis() {
            warn!(%from, "peer proposed genesis");
            return;
        }
        let hash = proposal.block.hash();
        debug!(block = %hash, %from, "proposal received");

        // Relay down the subtree before delivering; descendants fetch any
        // missing ancestry from us via the request path.
        for child in self.view.children.clone() {
            actions.push(Action::Send {
                to: child,
                message: PeerMessage::Propose(proposal.clone()),
            });
        }

        if self.store.add_fetched(proposal.block.clone()) {
            self.stats.fetched += 1;
            self.stats.part_fetched += 1;
            self.resolve_fetched(hash, actions);
        }

        let delivered = self.ensure_delivered(
            hash,
            Some(from),
            Some(DeliveryWaiter::Proposal(proposal.clone())),
            actions,
        );
        if delivered {
            self.proposal_delivered(proposal, actions);
        }
    }

    /// `on_receive_proposal` continuation: runs once the proposed block is
    /// delivered. Votes travel to the parent from leaves; interior nodes
    /// hold their endorsement inside `self_qc` until the subtree fills.
    pub(crate) fn proposal_delivered(&mut self, proposal: Proposal, actions: &mut Vec<Action>) {
        let hash = proposal.block.hash();
        let verdict = self.safety.on_receive_proposal(&proposal);
        self.process_finalities(verdict.finalities, actions);
        self.pacemaker.on_propose(&proposal.block);

        let Some(part) = verdict.vote else {
            debug!(block = %hash, "safety core declined to vote");
            return;
        };

        let next = self.pacemaker.beat_resp(proposal.proposer);
        if next == self.id {
            warn!(block = %hash, "pacemaker routed the vote back to its proposer");
        }

        self.ensure_self_qc(hash);

        if self.view.is_leaf() {
            if let Some(parent) = self.view.parent {
                actions.push(Action::Send {
                    to: parent,
                    message: PeerMessage::Vote(Vote {
                        voter: self.id,
                        block_hash: hash,
                        cert: part,
                    }),
                });
            }
        } else {
            // Interior: the own part may already complete a one-child
            // subtree that voted ahead of us.
            self.check_thresholds(hash, actions);
        }
    }

    // ── Decisions ───────────────────────────────────────────────────────

    pub(crate) fn process_finalities(&mut self, finalities: Vec<Finality>, actions: &mut Vec<Action>) {
        for finality in finalities {
            self.store.mark_committed(finality.block_hash);
            self.stats.decided += 1;
            self.stats.part_decided += 1;
            if let Some(request_id) = self.decision_waiting.remove(&finality.cmd_hash) {
                actions.push(Action::NotifyDecision {
                    request_id,
                    finality,
                });
            }
        }
    }

    // ── Timers ──────────────────────────────────────────────────────────

    fn on_stats_tick(&mut self, actions: &mut Vec<Action>) {
        info!(
            fetch_waiting = self.fetch_waiting.len(),
            delivery_waiting = self.delivery_waiting.len(),
            decision_waiting = self.decision_waiting.len(),
            blk_cache = self.store.len(),
            fetched = self.stats.fetched,
            delivered = self.stats.delivered,
            qc_finished = self.stats.qc_finished,
            window_fetched = self.stats.part_fetched,
            window_delivered = self.stats.part_delivered,
            window_decided = self.stats.part_decided,
            "stats"
        );
        self.stats.part_fetched = 0;
        self.stats.part_delivered = 0;
        self.stats.part_decided = 0;
        actions.push(Action::SetTimer {
            id: TimerId::Stats,
            duration: self.config.stats_interval,
        });
    }
}

impl StateMachine for EngineState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::FetchTick => self.on_fetch_tick(&mut actions),
            Event::StatsTick => self.on_stats_tick(&mut actions),
            Event::ProposalReceived { proposal, from } => {
                self.on_proposal_received(proposal, from, &mut actions)
            }
            Event::VoteReceived { vote, from } => self.on_vote(vote, from, &mut actions),
            Event::VoteRelayReceived { relay, from } => {
                self.on_vote_relay(relay, from, &mut actions)
            }
            Event::BlockRequestReceived { hashes, from } => {
                self.on_block_request(hashes, from, &mut actions)
            }
            Event::BlockResponseReceived { blocks, from } => {
                self.on_block_response(blocks, from, &mut actions)
            }
            Event::BlockVerified { block_hash, valid } => {
                self.on_block_verified(block_hash, valid, &mut actions)
            }
            Event::VoteVerified { vote, valid } => self.on_vote_verified(vote, valid, &mut actions),
            Event::QuorumVerified { qc, purpose, valid } => {
                self.on_quorum_verified(qc, purpose, valid, &mut actions)
            }
            Event::CommandSubmitted {
                cmd_hash,
                request_id,
            } => self.on_command_submitted(cmd_hash, request_id, &mut actions),
        }
        actions
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }
}
