//! The pacemaker collaborator surface.
//!
//! View and leader rotation are out of the engine's hands; it only asks
//! the pacemaker who proposes and which parents a new proposal extends.
//! [`RootPacemaker`] is the reference implementation for the tree overlay,
//! where the overlay root is the fixed proposer and final QC assembler.

use arbor_types::{Block, Hash, ReplicaId};

/// Collaborator surface of the view/leader rotation heuristic.
pub trait Pacemaker: Send {
    /// Proposer for the next proposal. Called when a command batch fills.
    fn beat(&mut self) -> ReplicaId;

    /// Proposer to route a vote response toward, given who proposed.
    fn beat_resp(&mut self, proposer: ReplicaId) -> ReplicaId;

    /// The current proposer.
    fn proposer(&self) -> ReplicaId;

    /// Parent hashes a new proposal should extend; the first entry is the
    /// direct parent.
    fn parents(&self) -> Vec<Hash>;

    /// A proposal was accepted locally.
    fn on_propose(&mut self, _block: &Block) {}

    /// A block reached consensus.
    fn on_consensus(&mut self, _block: &Block) {}
}

/// Fixed-proposer pacemaker: the overlay root proposes every block and
/// each proposal extends the previous one.
#[derive(Debug)]
pub struct RootPacemaker {
    root: ReplicaId,
    head: Hash,
}

impl RootPacemaker {
    pub fn new(root: ReplicaId, genesis_hash: Hash) -> Self {
        RootPacemaker {
            root,
            head: genesis_hash,
        }
    }
}

impl Pacemaker for RootPacemaker {
    fn beat(&mut self) -> ReplicaId {
        self.root
    }

    fn beat_resp(&mut self, _proposer: ReplicaId) -> ReplicaId {
        self.root
    }

    fn proposer(&self) -> ReplicaId {
        self.root
    }

    fn parents(&self) -> Vec<Hash> {
        vec![self.head]
    }

    fn on_propose(&mut self, block: &Block) {
        self.head = block.hash();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::{KeyPair, QuorumCert};

    #[test]
    fn chains_proposals() {
        let genesis = Block::genesis();
        let mut pm = RootPacemaker::new(ReplicaId(0), genesis.hash());
        assert_eq!(pm.proposer(), ReplicaId(0));
        assert_eq!(pm.parents(), vec![genesis.hash()]);

        let key = KeyPair::from_seed(&[1; 32]);
        let b1 = Block::new(
            1,
            vec![genesis.hash()],
            QuorumCert::new(genesis.hash()),
            vec![],
            ReplicaId(0),
            &key,
        );
        pm.on_propose(&b1);
        assert_eq!(pm.parents(), vec![b1.hash()]);
    }
}
