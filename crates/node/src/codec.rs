//! Wire codec for the replica protocol.
//!
//! Framing on the socket is `u32` little-endian length, one opcode byte,
//! then the payload. Parsing is two-phase: the transport's reader task
//! splits frames and reads nothing but the opcode; the payload is parsed
//! by [`Frame::parse`] on the consumer thread, after the consensus context
//! exists, so decoded blocks flow straight into the shared store there.

use arbor_core::{PeerMessage, Proposal, Vote, VoteRelay};
use arbor_types::wire::{Reader, WireError, Writer};
use arbor_types::{Block, PartialCert, QuorumCert, HASH_LENGTH};
use thiserror::Error;

/// Opcodes of the five message kinds.
pub const OP_PROPOSE: u8 = 0x00;
pub const OP_VOTE: u8 = 0x01;
pub const OP_REQ_BLOCK: u8 = 0x02;
pub const OP_RESP_BLOCK: u8 = 0x03;
pub const OP_VOTE_RELAY: u8 = 0x04;

/// Frames larger than this are rejected before allocation.
pub const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("frame of {0} bytes exceeds the limit")]
    Oversized(u32),

    #[error("trailing {0} bytes after payload")]
    TrailingBytes(usize),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// An opcode-tagged payload, not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Encode a protocol message into a frame.
    pub fn from_message(message: &PeerMessage) -> Frame {
        let mut payload = Vec::new();
        let opcode = match message {
            PeerMessage::Propose(proposal) => {
                payload.put_replica_id(proposal.proposer);
                proposal.block.encode(&mut payload);
                OP_PROPOSE
            }
            PeerMessage::Vote(vote) => {
                payload.put_replica_id(vote.voter);
                payload.put_hash(&vote.block_hash);
                vote.cert.encode(&mut payload);
                OP_VOTE
            }
            PeerMessage::VoteRelay(relay) => {
                payload.put_hash(&relay.block_hash);
                relay.cert.encode(&mut payload);
                OP_VOTE_RELAY
            }
            PeerMessage::RequestBlocks(hashes) => {
                payload.put_u32(hashes.len() as u32);
                for hash in hashes {
                    payload.put_hash(hash);
                }
                OP_REQ_BLOCK
            }
            PeerMessage::RespondBlocks(blocks) => {
                payload.put_u32(blocks.len() as u32);
                for block in blocks {
                    block.encode(&mut payload);
                }
                OP_RESP_BLOCK
            }
        };
        Frame { opcode, payload }
    }

    /// The postponed parse: interpret the payload on the consumer thread.
    pub fn parse(&self) -> Result<PeerMessage, CodecError> {
        let mut r = Reader::new(&self.payload);
        let message = match self.opcode {
            OP_PROPOSE => {
                let proposer = r.replica_id()?;
                let block = Block::decode(&mut r)?;
                PeerMessage::Propose(Proposal { proposer, block })
            }
            OP_VOTE => {
                let voter = r.replica_id()?;
                let block_hash = r.hash()?;
                let cert = PartialCert::decode(&mut r)?;
                PeerMessage::Vote(Vote {
                    voter,
                    block_hash,
                    cert,
                })
            }
            OP_VOTE_RELAY => {
                let block_hash = r.hash()?;
                let cert = QuorumCert::decode(&mut r)?;
                PeerMessage::VoteRelay(VoteRelay { block_hash, cert })
            }
            OP_REQ_BLOCK => {
                let count = r.length(HASH_LENGTH)?;
                let mut hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    hashes.push(r.hash()?);
                }
                PeerMessage::RequestBlocks(hashes)
            }
            OP_RESP_BLOCK => {
                // Blocks are self-delimiting; the count is bounded by the
                // minimum possible block encoding.
                let count = r.length(8 + 4 + HASH_LENGTH + 4 + 2 + 64)?;
                let mut blocks = Vec::with_capacity(count);
                for _ in 0..count {
                    blocks.push(Block::decode(&mut r)?);
                }
                PeerMessage::RespondBlocks(blocks)
            }
            other => return Err(CodecError::UnknownOpcode(other)),
        };
        if !r.is_empty() {
            return Err(CodecError::TrailingBytes(r.remaining()));
        }
        Ok(message)
    }

    /// Serialise with the socket-level length prefix.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 1 + self.payload.len());
        buf.put_u32(1 + self.payload.len() as u32);
        buf.put_u8(self.opcode);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::{Hash, KeyPair, ReplicaId};

    fn key(i: u8) -> KeyPair {
        KeyPair::from_seed(&[i + 1; 32])
    }

    fn sample_block() -> Block {
        let genesis = Block::genesis();
        Block::new(
            1,
            vec![genesis.hash()],
            QuorumCert::new(genesis.hash()),
            vec![Hash::digest(b"cmd")],
            ReplicaId(0),
            &key(0),
        )
    }

    fn round_trip(message: PeerMessage) {
        let frame = Frame::from_message(&message);
        assert_eq!(frame.parse().unwrap(), message);
    }

    #[test]
    fn all_kinds_round_trip() {
        let block = sample_block();
        let hash = block.hash();

        round_trip(PeerMessage::Propose(Proposal {
            proposer: ReplicaId(0),
            block: block.clone(),
        }));
        round_trip(PeerMessage::Vote(Vote {
            voter: ReplicaId(2),
            block_hash: hash,
            cert: PartialCert::sign(&key(2), ReplicaId(2), hash),
        }));
        let mut qc = QuorumCert::new(hash);
        qc.add_part(&PartialCert::sign(&key(1), ReplicaId(1), hash));
        round_trip(PeerMessage::VoteRelay(VoteRelay {
            block_hash: hash,
            cert: qc,
        }));
        round_trip(PeerMessage::RequestBlocks(vec![hash, Hash::ZERO]));
        round_trip(PeerMessage::RespondBlocks(vec![block, Block::genesis()]));
    }

    #[test]
    fn unknown_opcode_rejected() {
        let frame = Frame {
            opcode: 0x7f,
            payload: vec![],
        };
        assert!(matches!(frame.parse(), Err(CodecError::UnknownOpcode(0x7f))));
    }

    #[test]
    fn truncated_payload_rejected() {
        let message = PeerMessage::RequestBlocks(vec![Hash::digest(b"x")]);
        let mut frame = Frame::from_message(&message);
        frame.payload.truncate(frame.payload.len() - 3);
        assert!(frame.parse().is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let message = PeerMessage::RequestBlocks(vec![Hash::digest(b"x")]);
        let mut frame = Frame::from_message(&message);
        frame.payload.push(0);
        assert!(matches!(frame.parse(), Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    fn wire_prefix_matches_length() {
        let frame = Frame::from_message(&PeerMessage::RequestBlocks(vec![Hash::ZERO]));
        let wire = frame.to_wire();
        let len = u32::from_le_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        assert_eq!(len, wire.len() - 4);
        assert_eq!(wire[4], OP_REQ_BLOCK);
    }
}
