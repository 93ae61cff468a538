//! Action types for the deterministic state machine.

use crate::message::PeerMessage;
use crate::{RequestId, TimerId};
use arbor_types::{Block, Hash, PublicKey, QuorumCert, ReplicaId};
use std::time::Duration;

/// Why an aggregated certificate is being verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyPurpose {
    /// An interior node crossed its subtree threshold and wants to relay
    /// the aggregate to its parent.
    Forward,
    /// The root reached the quorum threshold and wants to finalise.
    Finalize,
}

/// Outcome of a committed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finality {
    pub cmd_hash: Hash,
    pub block_hash: Hash,
    pub height: u64,
}

/// Commands the state machine asks the runner to perform.
#[derive(Debug, Clone)]
pub enum Action {
    // ── Network ─────────────────────────────────────────────────────────
    /// Send a protocol message to one peer over its tree edge.
    Send { to: ReplicaId, message: PeerMessage },

    // ── Delegated verification (returns a callback event) ───────────────
    /// Check a block's proposer signature on the worker pool.
    /// Returns [`crate::Event::BlockVerified`].
    VerifyBlock { block: Block, public_key: PublicKey },

    /// Check a single vote's endorsement signature on the worker pool.
    /// Returns [`crate::Event::VoteVerified`].
    VerifyVote {
        vote: crate::message::Vote,
        public_key: PublicKey,
    },

    /// Check an aggregated certificate against the membership table on the
    /// worker pool. Returns [`crate::Event::QuorumVerified`].
    VerifyQuorum { qc: QuorumCert, purpose: VerifyPurpose },

    // ── Timers ──────────────────────────────────────────────────────────
    SetTimer { id: TimerId, duration: Duration },

    CancelTimer { id: TimerId },

    // ── Client surface ──────────────────────────────────────────────────
    /// Resolve a submitted command with its decision.
    NotifyDecision {
        request_id: RequestId,
        finality: Finality,
    },

    // ── Failure ─────────────────────────────────────────────────────────
    /// Unrecoverable protocol violation, e.g. an aggregated certificate
    /// from the local subtree that fails cryptographic verification. The
    /// runner must abort the replica.
    Fatal { reason: String },
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "Send",
            Action::VerifyBlock { .. } => "VerifyBlock",
            Action::VerifyVote { .. } => "VerifyVote",
            Action::VerifyQuorum { .. } => "VerifyQuorum",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::NotifyDecision { .. } => "NotifyDecision",
            Action::Fatal { .. } => "Fatal",
        }
    }
}
