//! The HotStuff safety core, seen from the coordination engine.
//!
//! The pure safety/liveness state machine is an external collaborator; the
//! engine drives it through [`SafetyCore`] and never second-guesses its
//! verdicts. [`BasicSafetyCore`] is the reference collaborator shipped with
//! the crate: a monotonic voting rule with high-QC tracking and a two-chain
//! commit, enough to run the engine end to end. Replace it to plug in a
//! full HotStuff implementation.

use arbor_core::{Finality, Proposal};
use arbor_types::{Block, Hash, KeyPair, PartialCert, QuorumCert, ReplicaId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of handing a delivered proposal to the safety core.
#[derive(Debug)]
pub struct ProposalVerdict {
    /// The replica's endorsement, absent when voting would violate the
    /// safety rule (stale height, equivocation).
    pub vote: Option<PartialCert>,
    /// Commands finalised by the certificates this proposal carried.
    pub finalities: Vec<Finality>,
}

/// Collaborator surface of the HotStuff safety state machine.
pub trait SafetyCore: Send {
    /// The well-known genesis block.
    fn genesis(&self) -> Block;

    /// Build and sign a new proposal extending `parents`, justified by the
    /// current high QC. Proposer only.
    fn on_propose(&mut self, cmds: Vec<Hash>, parents: Vec<Hash>) -> Block;

    /// A delivered proposal; decide whether to vote and surface any
    /// commits unlocked by its justify certificate.
    fn on_receive_proposal(&mut self, proposal: &Proposal) -> ProposalVerdict;

    /// Acceptance hook run as the last step of block delivery. A `false`
    /// keeps the block from ever being marked delivered.
    fn on_deliver_blk(&mut self, block: &Block) -> bool;

    /// A verified quorum certificate for `block_hash` (root only).
    fn update_hqc(&mut self, block_hash: &Hash, qc: &QuorumCert);

    /// Quorum reached on `block` at the root; returns the commands this
    /// finalises under the commit rule.
    fn on_qc_finish(&mut self, block: &Block) -> Vec<Finality>;
}

#[derive(Debug)]
struct BlockRecord {
    height: u64,
    parent: Option<Hash>,
    cmds: Vec<Hash>,
}

/// Reference safety core: votes at most once per height, tracks the
/// highest certified block, and commits with the two-chain rule (a
/// certified block finalises its parent once their heights are
/// consecutive).
pub struct BasicSafetyCore {
    id: ReplicaId,
    key: KeyPair,
    genesis: Block,
    records: HashMap<Hash, BlockRecord>,
    hqc: QuorumCert,
    hqc_height: u64,
    voted_height: u64,
    committed_height: u64,
}

impl BasicSafetyCore {
    pub fn new(id: ReplicaId, key: KeyPair) -> Self {
        let genesis = Block::genesis();
        let mut records = HashMap::new();
        records.insert(
            genesis.hash(),
            BlockRecord {
                height: 0,
                parent: None,
                cmds: Vec::new(),
            },
        );
        let hqc = QuorumCert::new(genesis.hash());
        BasicSafetyCore {
            id,
            key,
            genesis,
            records,
            hqc,
            hqc_height: 0,
            voted_height: 0,
            committed_height: 0,
        }
    }

    /// Absorb a certificate; on a new high QC, run the commit rule from
    /// its target.
    fn process_qc(&mut self, qc: &QuorumCert) -> Vec<Finality> {
        let target = *qc.block_hash();
        if target.is_zero() {
            return Vec::new();
        }
        let Some(record) = self.records.get(&target) else {
            // Certificate for a block we have not delivered; the engine's
            // delivery recursion makes this unreachable for honest input.
            debug!(block = %target, "certificate targets unknown block");
            return Vec::new();
        };
        if record.height <= self.hqc_height {
            return Vec::new();
        }
        self.hqc = qc.clone();
        self.hqc_height = record.height;
        self.commit_two_chain(target)
    }

    /// Two-chain rule: a QC on `certified` finalises its parent when the
    /// two heights are consecutive; everything below the parent commits
    /// with it, oldest first.
    fn commit_two_chain(&mut self, certified: Hash) -> Vec<Finality> {
        let Some(record) = self.records.get(&certified) else {
            return Vec::new();
        };
        let Some(parent_hash) = record.parent else {
            return Vec::new();
        };
        let certified_height = record.height;
        let Some(parent) = self.records.get(&parent_hash) else {
            return Vec::new();
        };
        if parent.height + 1 != certified_height || parent.height <= self.committed_height {
            return Vec::new();
        }

        let mut chain = Vec::new();
        let mut cursor = Some(parent_hash);
        while let Some(hash) = cursor {
            let rec = &self.records[&hash];
            if rec.height <= self.committed_height {
                break;
            }
            chain.push(hash);
            cursor = rec.parent;
        }
        chain.reverse();

        let mut finalities = Vec::new();
        for hash in chain {
            let rec = &self.records[&hash];
            self.committed_height = rec.height;
            debug!(block = %hash, height = rec.height, "committed");
            for cmd in &rec.cmds {
                finalities.push(Finality {
                    cmd_hash: *cmd,
                    block_hash: hash,
                    height: rec.height,
                });
            }
        }
        finalities
    }
}

impl SafetyCore for BasicSafetyCore {
    fn genesis(&self) -> Block {
        self.genesis.clone()
    }

    fn on_propose(&mut self, cmds: Vec<Hash>, parents: Vec<Hash>) -> Block {
        let parent = parents.first().copied().unwrap_or(self.genesis.hash());
        let height = self
            .records
            .get(&parent)
            .map(|r| r.height + 1)
            .unwrap_or(1);
        // Proposing implicitly endorses the block.
        self.voted_height = self.voted_height.max(height);
        Block::new(height, parents, self.hqc.clone(), cmds, self.id, &self.key)
    }

    fn on_receive_proposal(&mut self, proposal: &Proposal) -> ProposalVerdict {
        let finalities = self.process_qc(proposal.block.justify());
        let block = &proposal.block;

        let vote = if block.height() > self.voted_height {
            self.voted_height = block.height();
            Some(PartialCert::sign(&self.key, self.id, block.hash()))
        } else {
            debug!(
                block = %block.hash(),
                height = block.height(),
                voted_height = self.voted_height,
                "refusing to vote below voted height"
            );
            None
        };

        ProposalVerdict { vote, finalities }
    }

    fn on_deliver_blk(&mut self, block: &Block) -> bool {
        if block.is_genesis() {
            return true;
        }
        let Some(parent_hash) = block.parent().copied() else {
            return false;
        };
        let Some(parent) = self.records.get(&parent_hash) else {
            warn!(block = %block.hash(), "delivered block has unrecorded parent");
            return false;
        };
        if parent.height + 1 != block.height() {
            warn!(
                block = %block.hash(),
                height = block.height(),
                parent_height = parent.height,
                "delivered block breaks the height chain"
            );
            return false;
        }
        self.records.entry(block.hash()).or_insert(BlockRecord {
            height: block.height(),
            parent: Some(parent_hash),
            cmds: block.cmds().to_vec(),
        });
        true
    }

    fn update_hqc(&mut self, block_hash: &Hash, qc: &QuorumCert) {
        if let Some(record) = self.records.get(block_hash) {
            if record.height > self.hqc_height {
                self.hqc = qc.clone();
                self.hqc_height = record.height;
            }
        }
    }

    fn on_qc_finish(&mut self, block: &Block) -> Vec<Finality> {
        self.commit_two_chain(block.hash())
    }
}
