//! Blocks of the consensus DAG.

use crate::signing::block_message;
use crate::wire::{Reader, WireError, Writer};
use crate::{Hash, KeyPair, PublicKey, QuorumCert, ReplicaId, Signature, HASH_LENGTH};

/// A content-addressed node in the consensus DAG.
///
/// The first parent is the direct chain parent; further entries are the QC
/// ancestry chain supplied by the pacemaker. `justify` is the quorum
/// certificate the proposer carried over from an earlier block; its target
/// must be delivered before this block is.
///
/// A block is immutable once constructed. The aggregation state a replica
/// builds *for* a block (`self_qc`) lives in the block store, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    height: u64,
    parents: Vec<Hash>,
    justify: QuorumCert,
    cmds: Vec<Hash>,
    proposer: ReplicaId,
    signature: Signature,
    /// Content digest, derived from the fields above.
    hash: Hash,
}

impl Block {
    /// Build and sign a block.
    pub fn new(
        height: u64,
        parents: Vec<Hash>,
        justify: QuorumCert,
        cmds: Vec<Hash>,
        proposer: ReplicaId,
        key: &KeyPair,
    ) -> Self {
        let hash = Self::content_hash(height, &parents, &justify, &cmds, proposer);
        let signature = key.sign(&block_message(&hash));
        Block {
            height,
            parents,
            justify,
            cmds,
            proposer,
            signature,
            hash,
        }
    }

    /// The genesis block: height 0, no parents, an empty justify over the
    /// zero hash, and a null signature. Exempt from verification; always
    /// delivered.
    pub fn genesis() -> Self {
        let parents = Vec::new();
        let justify = QuorumCert::genesis();
        let cmds = Vec::new();
        let proposer = ReplicaId(0);
        let hash = Self::content_hash(0, &parents, &justify, &cmds, proposer);
        Block {
            height: 0,
            parents,
            justify,
            cmds,
            proposer,
            signature: Signature::null(),
            hash,
        }
    }

    fn content_hash(
        height: u64,
        parents: &[Hash],
        justify: &QuorumCert,
        cmds: &[Hash],
        proposer: ReplicaId,
    ) -> Hash {
        // The digest covers the justify *target*, not its signature set, so
        // the hash does not depend on how many contributions the proposer
        // happened to hold when it sealed the certificate.
        let mut buf = Vec::with_capacity(
            8 + 4 + parents.len() * HASH_LENGTH + HASH_LENGTH + 4 + cmds.len() * HASH_LENGTH + 2,
        );
        buf.put_u64(height);
        buf.put_u32(parents.len() as u32);
        for p in parents {
            buf.put_hash(p);
        }
        buf.put_hash(justify.block_hash());
        buf.put_u32(cmds.len() as u32);
        for c in cmds {
            buf.put_hash(c);
        }
        buf.put_replica_id(proposer);
        Hash::digest(&buf)
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn parents(&self) -> &[Hash] {
        &self.parents
    }

    /// The direct chain parent, absent only for genesis.
    pub fn parent(&self) -> Option<&Hash> {
        self.parents.first()
    }

    pub fn justify(&self) -> &QuorumCert {
        &self.justify
    }

    pub fn cmds(&self) -> &[Hash] {
        &self.cmds
    }

    pub fn proposer(&self) -> ReplicaId {
        self.proposer
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    /// Check the proposer's signature over the content digest.
    pub fn verify_signature(&self, public_key: &PublicKey) -> bool {
        public_key.verify(&block_message(&self.hash), &self.signature)
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u64(self.height);
        buf.put_u32(self.parents.len() as u32);
        for p in &self.parents {
            buf.put_hash(p);
        }
        self.justify.encode(buf);
        buf.put_u32(self.cmds.len() as u32);
        for c in &self.cmds {
            buf.put_hash(c);
        }
        buf.put_replica_id(self.proposer);
        buf.put_signature(&self.signature);
    }

    /// Decode a block, recomputing its content hash from the decoded
    /// fields; a peer cannot claim a hash its bytes do not produce.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let height = r.u64()?;
        let parent_count = r.length(HASH_LENGTH)?;
        let mut parents = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            parents.push(r.hash()?);
        }
        let justify = QuorumCert::decode(r)?;
        let cmd_count = r.length(HASH_LENGTH)?;
        let mut cmds = Vec::with_capacity(cmd_count);
        for _ in 0..cmd_count {
            cmds.push(r.hash()?);
        }
        let proposer = r.replica_id()?;
        let signature = r.signature()?;
        let hash = Self::content_hash(height, &parents, &justify, &cmds, proposer);
        Ok(Block {
            height,
            parents,
            justify,
            cmds,
            proposer,
            signature,
            hash,
        })
    }
}
