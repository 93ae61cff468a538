//! Event types for the deterministic state machine.

use crate::message::{Proposal, Vote, VoteRelay};
use crate::VerifyPurpose;
use arbor_types::{Block, Hash, QuorumCert, ReplicaId};

/// Handle correlating a submitted command with its eventual decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Priority levels for event ordering at the same timestamp.
///
/// Lower values are processed first. Internal events are consequences of
/// prior processing (worker-pool callbacks) and must land before new
/// external inputs to preserve causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    Internal = 0,
    Timer = 1,
    Network = 2,
    Client = 3,
}

/// All inputs the engine state machine can receive.
///
/// Events are passive data; the state machine processes them and returns
/// [`crate::Action`]s for the runner to execute.
#[derive(Debug, Clone)]
pub enum Event {
    // ── Timers ──────────────────────────────────────────────────────────
    /// Periodic fetch retry sweep.
    FetchTick,

    /// Periodic statistics log line.
    StatsTick,

    // ── Network messages ────────────────────────────────────────────────
    /// A proposal arrived from the parent (or, at the root, from itself).
    ProposalReceived { proposal: Proposal, from: ReplicaId },

    /// A direct vote arrived from a child.
    VoteReceived { vote: Vote, from: ReplicaId },

    /// An aggregated subtree certificate arrived from a child.
    VoteRelayReceived { relay: VoteRelay, from: ReplicaId },

    /// A peer asked for full blocks by hash.
    BlockRequestReceived { hashes: Vec<Hash>, from: ReplicaId },

    /// A peer answered a block request.
    BlockResponseReceived { blocks: Vec<Block>, from: ReplicaId },

    // ── Worker-pool callbacks ───────────────────────────────────────────
    /// Result of `Action::VerifyBlock`.
    BlockVerified { block_hash: Hash, valid: bool },

    /// Result of `Action::VerifyVote`. Carries the vote back so the engine
    /// can match it against the pending contribution.
    VoteVerified { vote: Vote, valid: bool },

    /// Result of `Action::VerifyQuorum`. Carries the exact certificate
    /// that was checked; the live aggregate may have grown since.
    QuorumVerified {
        qc: QuorumCert,
        purpose: VerifyPurpose,
        valid: bool,
    },

    // ── Client requests ─────────────────────────────────────────────────
    /// A client submitted a command for replication.
    CommandSubmitted { cmd_hash: Hash, request_id: RequestId },
}

impl Event {
    /// Ordering priority of this event at a given timestamp.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::BlockVerified { .. }
            | Event::VoteVerified { .. }
            | Event::QuorumVerified { .. } => EventPriority::Internal,

            Event::FetchTick | Event::StatsTick => EventPriority::Timer,

            Event::ProposalReceived { .. }
            | Event::VoteReceived { .. }
            | Event::VoteRelayReceived { .. }
            | Event::BlockRequestReceived { .. }
            | Event::BlockResponseReceived { .. } => EventPriority::Network,

            Event::CommandSubmitted { .. } => EventPriority::Client,
        }
    }

    /// Event type name for logs and simulation statistics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::FetchTick => "FetchTick",
            Event::StatsTick => "StatsTick",
            Event::ProposalReceived { .. } => "ProposalReceived",
            Event::VoteReceived { .. } => "VoteReceived",
            Event::VoteRelayReceived { .. } => "VoteRelayReceived",
            Event::BlockRequestReceived { .. } => "BlockRequestReceived",
            Event::BlockResponseReceived { .. } => "BlockResponseReceived",
            Event::BlockVerified { .. } => "BlockVerified",
            Event::VoteVerified { .. } => "VoteVerified",
            Event::QuorumVerified { .. } => "QuorumVerified",
            Event::CommandSubmitted { .. } => "CommandSubmitted",
        }
    }
}
