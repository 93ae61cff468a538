//! Replica identities and the static membership table.

use crate::{Hash, PublicKey};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

/// Identifier of a replica: its index in the ordered membership list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaId(pub u16);

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Static description of one replica.
#[derive(Debug, Clone)]
pub struct ReplicaInfo {
    pub id: ReplicaId,
    pub public_key: PublicKey,
    /// Listen address, used by the transport to dial tree neighbors.
    pub address: SocketAddr,
    /// Hash of the replica's transport certificate; membership in the
    /// allow-list gates connection acceptance.
    pub cert_hash: Hash,
}

/// The ordered, immutable replica membership for a run.
///
/// Index position equals [`ReplicaId`]; replica 0 is the overlay root.
#[derive(Debug, Clone)]
pub struct ReplicaSet {
    replicas: Vec<ReplicaInfo>,
}

impl ReplicaSet {
    /// Build from a list ordered by id. Panics if ids are not the
    /// contiguous range `0..n` (a misconfigured membership table is a
    /// startup error, not a runtime condition).
    pub fn new(replicas: Vec<ReplicaInfo>) -> Self {
        assert!(!replicas.is_empty(), "replica set must not be empty");
        for (i, info) in replicas.iter().enumerate() {
            assert_eq!(
                info.id,
                ReplicaId(i as u16),
                "replica ids must be contiguous from 0"
            );
        }
        ReplicaSet { replicas }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn contains(&self, id: ReplicaId) -> bool {
        (id.0 as usize) < self.replicas.len()
    }

    pub fn get(&self, id: ReplicaId) -> Option<&ReplicaInfo> {
        self.replicas.get(id.0 as usize)
    }

    pub fn public_key(&self, id: ReplicaId) -> Option<&PublicKey> {
        self.get(id).map(|info| &info.public_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicaInfo> {
        self.replicas.iter()
    }

    /// Quorum threshold: `n - floor((n - 1) / 3)`, i.e. all replicas minus
    /// the tolerated faulty count.
    pub fn quorum_threshold(&self) -> usize {
        let n = self.replicas.len();
        n - (n - 1) / 3
    }

    /// Certificate hashes accepted at connection establishment.
    pub fn cert_allow_list(&self) -> HashSet<Hash> {
        self.replicas.iter().map(|info| info.cert_hash).collect()
    }

    /// Resolve a presented certificate hash to a replica.
    pub fn replica_by_cert(&self, cert_hash: &Hash) -> Option<&ReplicaInfo> {
        self.replicas.iter().find(|info| info.cert_hash == *cert_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn replica(i: u16) -> ReplicaInfo {
        let key = KeyPair::from_seed(&[i as u8 + 1; 32]);
        ReplicaInfo {
            id: ReplicaId(i),
            public_key: key.public_key(),
            address: format!("127.0.0.1:{}", 7000 + i).parse().unwrap(),
            cert_hash: Hash::digest(&key.public_key().to_bytes()),
        }
    }

    fn set(n: u16) -> ReplicaSet {
        ReplicaSet::new((0..n).map(replica).collect())
    }

    #[test]
    fn quorum_thresholds() {
        assert_eq!(set(1).quorum_threshold(), 1);
        assert_eq!(set(4).quorum_threshold(), 3);
        assert_eq!(set(7).quorum_threshold(), 5);
        assert_eq!(set(13).quorum_threshold(), 9);
    }

    #[test]
    fn cert_lookup() {
        let s = set(4);
        let cert = s.get(ReplicaId(2)).unwrap().cert_hash;
        assert_eq!(s.replica_by_cert(&cert).unwrap().id, ReplicaId(2));
        assert!(s.replica_by_cert(&Hash::digest(b"stranger")).is_none());
    }

    #[test]
    #[should_panic(expected = "contiguous")]
    fn non_contiguous_ids_rejected() {
        let mut replicas = vec![replica(0), replica(2)];
        replicas[1].id = ReplicaId(2);
        ReplicaSet::new(replicas);
    }
}
