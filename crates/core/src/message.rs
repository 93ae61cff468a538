//! Protocol messages exchanged between replicas.

use crate::Event;
use arbor_types::{Block, Hash, PartialCert, QuorumCert, ReplicaId};

/// A proposal pushed down the tree overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub proposer: ReplicaId,
    pub block: Block,
}

/// A single replica's vote, sent up one tree edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub voter: ReplicaId,
    pub block_hash: Hash,
    pub cert: PartialCert,
}

/// A subtree's aggregated certificate, relayed up one tree edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRelay {
    pub block_hash: Hash,
    pub cert: QuorumCert,
}

/// The five message kinds of the replica protocol. Used symmetrically: the
/// state machine emits them in [`crate::Action::Send`] and the codec parses
/// inbound frames into them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Propose(Proposal),
    Vote(Vote),
    VoteRelay(VoteRelay),
    /// Request full blocks by hash.
    RequestBlocks(Vec<Hash>),
    /// Answer to a [`PeerMessage::RequestBlocks`].
    RespondBlocks(Vec<Block>),
}

impl PeerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerMessage::Propose(_) => "Propose",
            PeerMessage::Vote(_) => "Vote",
            PeerMessage::VoteRelay(_) => "VoteRelay",
            PeerMessage::RequestBlocks(_) => "ReqBlock",
            PeerMessage::RespondBlocks(_) => "RespBlock",
        }
    }

    /// Wrap an inbound message as the event the engine consumes.
    pub fn into_event(self, from: ReplicaId) -> Event {
        match self {
            PeerMessage::Propose(proposal) => Event::ProposalReceived { proposal, from },
            PeerMessage::Vote(vote) => Event::VoteReceived { vote, from },
            PeerMessage::VoteRelay(relay) => Event::VoteRelayReceived { relay, from },
            PeerMessage::RequestBlocks(hashes) => Event::BlockRequestReceived { hashes, from },
            PeerMessage::RespondBlocks(blocks) => Event::BlockResponseReceived { blocks, from },
        }
    }
}
