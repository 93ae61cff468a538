//! Pending contexts for in-flight fetches, deliveries, and contributions.
//!
//! These are the decrement-to-zero continuations of the engine: each maps a
//! block hash to the set of computations suspended on it. The waiting maps
//! also enforce the single-flight invariant: at most one fetch context and
//! one delivery context exist per hash, and every caller awaiting the same
//! hash shares the same resolution.

use arbor_core::{Proposal, Vote};
use arbor_types::{Hash, QuorumCert, ReplicaId};
use std::collections::HashSet;
use std::time::Duration;

/// What resumes when a block's bytes arrive (or the fetch is abandoned).
#[derive(Debug)]
pub enum FetchWaiter {
    /// The delivery context for this same hash starts its prerequisites.
    Delivery(Hash),
    /// A pending block-request response joins on this hash.
    Respond { seq: u64 },
}

/// Outstanding fetch for one block hash.
///
/// Owns the candidate source peers. The first candidate is asked eagerly
/// when the context is created; the retry sweep walks the remaining
/// candidates, one per timeout, until the block arrives or the candidates
/// are exhausted.
#[derive(Debug)]
pub struct BlockFetchContext {
    pub candidates: Vec<ReplicaId>,
    pub asked: HashSet<ReplicaId>,
    pub last_request: Duration,
    pub waiters: Vec<FetchWaiter>,
}

impl BlockFetchContext {
    pub fn new(now: Duration) -> Self {
        BlockFetchContext {
            candidates: Vec::new(),
            asked: HashSet::new(),
            last_request: now,
            waiters: Vec::new(),
        }
    }

    /// Next candidate that has not been asked yet.
    pub fn next_unasked(&self) -> Option<ReplicaId> {
        self.candidates
            .iter()
            .copied()
            .find(|c| !self.asked.contains(c))
    }
}

/// What resumes when a block's delivery completes or is rejected.
#[derive(Debug)]
pub enum DeliveryWaiter {
    /// The named block's delivery context counts this block among its
    /// prerequisites (as a parent or as the justify-QC target).
    PrereqOf(Hash),
    /// A proposal whose `on_receive_proposal` continuation runs once the
    /// proposed block is delivered.
    Proposal(Proposal),
}

/// Outstanding delivery for one block hash.
#[derive(Debug)]
pub struct BlockDeliveryContext {
    /// Prerequisites not yet complete: the signature check plus one per
    /// undelivered parent and justify target.
    pub outstanding: usize,
    /// Result of the proposer-signature check, once it lands.
    pub signature_valid: Option<bool>,
    /// Prerequisites have been spawned (the block's bytes are present).
    pub prereqs_started: bool,
    /// Peer the ancestry may be fetched from.
    pub hint: Option<ReplicaId>,
    pub waiters: Vec<DeliveryWaiter>,
}

impl BlockDeliveryContext {
    pub fn new(hint: Option<ReplicaId>) -> Self {
        BlockDeliveryContext {
            outstanding: 0,
            signature_valid: None,
            prereqs_started: false,
            hint,
            waiters: Vec::new(),
        }
    }
}

/// A vote or relayed aggregate waiting for its block to deliver and, at
/// the root, for its signature verdict.
#[derive(Debug)]
pub struct PendingContribution {
    pub contribution: Contribution,
    pub awaiting_delivery: bool,
    pub awaiting_verdict: bool,
}

impl PendingContribution {
    pub fn ready(&self) -> bool {
        !self.awaiting_delivery && !self.awaiting_verdict
    }
}

/// The two shapes a subtree contribution takes.
#[derive(Debug)]
pub enum Contribution {
    /// One replica's direct vote.
    Part(Vote),
    /// An already-aggregated subtree certificate.
    Aggregate(QuorumCert),
}

/// A block request being answered; resolves when every requested hash is
/// locally available.
#[derive(Debug)]
pub struct PendingResponse {
    pub peer: ReplicaId,
    pub hashes: Vec<Hash>,
    pub remaining: usize,
}
