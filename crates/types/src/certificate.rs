//! Vote certificates.
//!
//! A [`PartialCert`] is one replica's signed endorsement of a block hash.
//! A [`QuorumCert`] aggregates partial certs over the same hash; it becomes
//! evidence of consensus once the contributor count reaches the quorum
//! threshold. Aggregation is a union of per-replica signatures: adding a
//! contributor twice is a no-op and merging is commutative, which is what
//! lets partial certificates flow up the tree overlay in any order.

use crate::signing::vote_message;
use crate::wire::{Reader, WireError, Writer};
use crate::{Hash, KeyPair, PublicKey, ReplicaId, ReplicaSet, Signature};
use std::collections::BTreeMap;

/// A single replica's signed endorsement of a block hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCert {
    pub replica: ReplicaId,
    pub block_hash: Hash,
    pub signature: Signature,
}

impl PartialCert {
    /// Sign an endorsement of `block_hash` with this replica's key.
    pub fn sign(key: &KeyPair, replica: ReplicaId, block_hash: Hash) -> Self {
        let signature = key.sign(&vote_message(&block_hash));
        PartialCert {
            replica,
            block_hash,
            signature,
        }
    }

    pub fn verify(&self, public_key: &PublicKey) -> bool {
        public_key.verify(&vote_message(&self.block_hash), &self.signature)
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_replica_id(self.replica);
        buf.put_hash(&self.block_hash);
        buf.put_signature(&self.signature);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(PartialCert {
            replica: r.replica_id()?,
            block_hash: r.hash()?,
            signature: r.signature()?,
        })
    }
}

/// An aggregation of partial certificates over one block hash.
///
/// The contributor set only grows. Signatures are kept ordered by replica
/// id, so two certificates assembled from the same contributions in any
/// interleaving are identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumCert {
    block_hash: Hash,
    parts: BTreeMap<ReplicaId, Signature>,
}

impl QuorumCert {
    /// An empty certificate over `block_hash`.
    pub fn new(block_hash: Hash) -> Self {
        QuorumCert {
            block_hash,
            parts: BTreeMap::new(),
        }
    }

    /// The certificate carried by the genesis block. Its target is the
    /// zero hash; genesis is exempt from certificate checks.
    pub fn genesis() -> Self {
        QuorumCert::new(Hash::ZERO)
    }

    pub fn block_hash(&self) -> &Hash {
        &self.block_hash
    }

    /// Add one partial certificate. Returns `false` (and changes nothing)
    /// if the part targets a different hash or the contributor is already
    /// represented.
    pub fn add_part(&mut self, part: &PartialCert) -> bool {
        if part.block_hash != self.block_hash {
            return false;
        }
        if self.parts.contains_key(&part.replica) {
            return false;
        }
        self.parts.insert(part.replica, part.signature);
        true
    }

    /// Union-merge another certificate over the same hash. Contributions
    /// already present are left untouched.
    pub fn merge(&mut self, other: &QuorumCert) {
        if other.block_hash != self.block_hash {
            return;
        }
        for (replica, signature) in &other.parts {
            self.parts.entry(*replica).or_insert(*signature);
        }
    }

    pub fn has_n(&self, threshold: usize) -> bool {
        self.parts.len() >= threshold
    }

    pub fn contributor_count(&self) -> usize {
        self.parts.len()
    }

    pub fn contributors(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.parts.keys().copied()
    }

    pub fn contains(&self, replica: ReplicaId) -> bool {
        self.parts.contains_key(&replica)
    }

    /// Finalise the aggregate form. With per-replica ed25519 signatures the
    /// canonical form is the id-ordered signature set, which this
    /// representation maintains at all times; an aggregating scheme would
    /// fold the parts here.
    pub fn compute(&mut self) {}

    /// Cryptographically check every contribution against the membership
    /// table. False if any contributor is unknown or any signature fails.
    pub fn verify(&self, replicas: &ReplicaSet) -> bool {
        if self.parts.is_empty() {
            return false;
        }
        let message = vote_message(&self.block_hash);
        self.parts.iter().all(|(replica, signature)| {
            replicas
                .public_key(*replica)
                .is_some_and(|key| key.verify(&message, signature))
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_hash(&self.block_hash);
        buf.put_u32(self.parts.len() as u32);
        for (replica, signature) in &self.parts {
            buf.put_replica_id(*replica);
            buf.put_signature(signature);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let block_hash = r.hash()?;
        let count = r.length(2 + 64)?;
        let mut parts = BTreeMap::new();
        for _ in 0..count {
            let replica = r.replica_id()?;
            let signature = r.signature()?;
            if parts.insert(replica, signature).is_some() {
                return Err(WireError::Malformed("duplicate quorum contributor"));
            }
        }
        Ok(QuorumCert { block_hash, parts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReplicaInfo, ReplicaSet};

    fn key(i: u16) -> KeyPair {
        KeyPair::from_seed(&[i as u8 + 1; 32])
    }

    fn replica_set(n: u16) -> ReplicaSet {
        ReplicaSet::new(
            (0..n)
                .map(|i| ReplicaInfo {
                    id: ReplicaId(i),
                    public_key: key(i).public_key(),
                    address: format!("127.0.0.1:{}", 7100 + i).parse().unwrap(),
                    cert_hash: Hash::digest(&key(i).public_key().to_bytes()),
                })
                .collect(),
        )
    }

    fn part(i: u16, hash: Hash) -> PartialCert {
        PartialCert::sign(&key(i), ReplicaId(i), hash)
    }

    #[test]
    fn add_part_is_idempotent() {
        let hash = Hash::digest(b"blk");
        let mut qc = QuorumCert::new(hash);
        assert!(qc.add_part(&part(0, hash)));
        assert!(!qc.add_part(&part(0, hash)));
        assert_eq!(qc.contributor_count(), 1);
    }

    #[test]
    fn mismatched_hash_rejected() {
        let mut qc = QuorumCert::new(Hash::digest(b"a"));
        assert!(!qc.add_part(&part(0, Hash::digest(b"b"))));
        assert_eq!(qc.contributor_count(), 0);
    }

    #[test]
    fn merge_is_union() {
        let hash = Hash::digest(b"blk");
        let mut left = QuorumCert::new(hash);
        left.add_part(&part(0, hash));
        left.add_part(&part(1, hash));

        let mut right = QuorumCert::new(hash);
        right.add_part(&part(1, hash));
        right.add_part(&part(2, hash));

        left.merge(&right);
        assert_eq!(left.contributor_count(), 3);
        assert!(left.has_n(3));
        assert!(!left.has_n(4));
    }

    /// Any permutation of the same add/merge inputs yields the identical
    /// certificate.
    #[test]
    fn aggregation_is_commutative() {
        let hash = Hash::digest(b"blk");
        let parts: Vec<_> = (0..4).map(|i| part(i, hash)).collect();

        let mut sub = QuorumCert::new(hash);
        sub.add_part(&parts[2]);
        sub.add_part(&parts[3]);

        let mut forward = QuorumCert::new(hash);
        forward.add_part(&parts[0]);
        forward.add_part(&parts[1]);
        forward.merge(&sub);

        let mut backward = QuorumCert::new(hash);
        backward.merge(&sub);
        backward.add_part(&parts[1]);
        backward.add_part(&parts[0]);
        // Duplicates along the way change nothing.
        backward.merge(&sub);
        backward.add_part(&parts[1]);

        assert_eq!(forward, backward);

        let replicas = replica_set(4);
        assert_eq!(forward.verify(&replicas), backward.verify(&replicas));
    }

    #[test]
    fn verify_accepts_good_and_rejects_forged() {
        let replicas = replica_set(4);
        let hash = Hash::digest(b"blk");

        let mut qc = QuorumCert::new(hash);
        for i in 0..3 {
            qc.add_part(&part(i, hash));
        }
        assert!(qc.verify(&replicas));

        // A contribution signed with the wrong key fails the whole check.
        let mut forged = qc.clone();
        let bad = PartialCert {
            replica: ReplicaId(3),
            block_hash: hash,
            signature: key(0).sign(b"garbage"),
        };
        forged.add_part(&bad);
        assert!(!forged.verify(&replicas));

        // Unknown contributor fails too.
        let mut stranger = qc.clone();
        stranger.add_part(&part(9, hash));
        assert!(!stranger.verify(&replicas));
    }

    #[test]
    fn empty_certificate_does_not_verify() {
        let replicas = replica_set(4);
        let qc = QuorumCert::new(Hash::digest(b"blk"));
        assert!(!qc.verify(&replicas));
    }

    #[test]
    fn wire_round_trip() {
        let hash = Hash::digest(b"blk");
        let mut qc = QuorumCert::new(hash);
        for i in 0..3 {
            qc.add_part(&part(i, hash));
        }

        let mut buf = Vec::new();
        qc.encode(&mut buf);
        let decoded = QuorumCert::decode(&mut Reader::new(&buf)).unwrap();
        assert_eq!(decoded, qc);
    }

    #[test]
    fn wire_duplicate_contributor_rejected() {
        let hash = Hash::digest(b"blk");
        let mut buf = Vec::new();
        buf.put_hash(&hash);
        buf.put_u32(2);
        let p = part(1, hash);
        for _ in 0..2 {
            buf.put_replica_id(p.replica);
            buf.put_signature(&p.signature);
        }
        assert!(QuorumCert::decode(&mut Reader::new(&buf)).is_err());
    }
}
