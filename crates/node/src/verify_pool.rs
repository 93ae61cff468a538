//! Worker pool for cryptographic verification.
//!
//! Signature checks are the engine's only CPU-heavy work; they run on a
//! dedicated rayon pool of `nworker` threads and return to the event loop
//! as callback events on an unbounded channel, so a worker can never block
//! on result delivery.

use arbor_core::{Action, Event, VerifyPurpose, Vote};
use arbor_types::{Block, PublicKey, QuorumCert, ReplicaSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Rayon-backed verification pool.
pub struct VerifyPool {
    pool: rayon::ThreadPool,
    replicas: Arc<ReplicaSet>,
    callback_tx: mpsc::UnboundedSender<Event>,
}

impl VerifyPool {
    pub fn new(
        nworker: usize,
        replicas: Arc<ReplicaSet>,
        callback_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nworker.max(1))
            .thread_name(|i| format!("verify-{i}"))
            .build()?;
        Ok(VerifyPool {
            pool,
            replicas,
            callback_tx,
        })
    }

    /// Dispatch a verification action; other action kinds are a caller
    /// bug.
    pub fn dispatch(&self, action: Action) {
        match action {
            Action::VerifyBlock { block, public_key } => self.verify_block(block, public_key),
            Action::VerifyVote { vote, public_key } => self.verify_vote(vote, public_key),
            Action::VerifyQuorum { qc, purpose } => self.verify_quorum(qc, purpose),
            other => debug!(kind = other.type_name(), "non-verification action ignored"),
        }
    }

    pub fn verify_block(&self, block: Block, public_key: PublicKey) {
        let tx = self.callback_tx.clone();
        self.pool.spawn(move || {
            let valid = block.verify_signature(&public_key);
            let _ = tx.send(Event::BlockVerified {
                block_hash: block.hash(),
                valid,
            });
        });
    }

    pub fn verify_vote(&self, vote: Vote, public_key: PublicKey) {
        let tx = self.callback_tx.clone();
        self.pool.spawn(move || {
            let valid = vote.cert.verify(&public_key);
            let _ = tx.send(Event::VoteVerified { vote, valid });
        });
    }

    pub fn verify_quorum(&self, qc: QuorumCert, purpose: VerifyPurpose) {
        let tx = self.callback_tx.clone();
        let replicas = self.replicas.clone();
        self.pool.spawn(move || {
            let valid = qc.verify(&replicas);
            let _ = tx.send(Event::QuorumVerified { qc, purpose, valid });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::{Hash, KeyPair, PartialCert, ReplicaId, ReplicaInfo};

    fn keypair(i: u16) -> KeyPair {
        KeyPair::from_seed(&[i as u8 + 1; 32])
    }

    fn replica_set(n: u16) -> Arc<ReplicaSet> {
        Arc::new(ReplicaSet::new(
            (0..n)
                .map(|i| {
                    let key = keypair(i);
                    ReplicaInfo {
                        id: ReplicaId(i),
                        public_key: key.public_key(),
                        address: "127.0.0.1:0".parse().unwrap(),
                        cert_hash: Hash::digest(&key.public_key().to_bytes()),
                    }
                })
                .collect(),
        ))
    }

    #[tokio::test]
    async fn quorum_verdicts_come_back_on_the_callback_channel() {
        let replicas = replica_set(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = VerifyPool::new(2, replicas, tx).unwrap();

        let hash = Hash::digest(b"blk");
        let mut good = QuorumCert::new(hash);
        for i in 0..3u16 {
            good.add_part(&PartialCert::sign(&keypair(i), ReplicaId(i), hash));
        }
        pool.verify_quorum(good, VerifyPurpose::Finalize);

        let mut forged = QuorumCert::new(hash);
        forged.add_part(&PartialCert {
            replica: ReplicaId(1),
            block_hash: hash,
            signature: keypair(0).sign(b"junk"),
        });
        pool.verify_quorum(forged, VerifyPurpose::Forward);

        let mut verdicts = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.expect("callback") {
                Event::QuorumVerified { purpose, valid, .. } => verdicts.push((purpose, valid)),
                other => panic!("unexpected event {}", other.type_name()),
            }
        }
        verdicts.sort_by_key(|(p, _)| *p == VerifyPurpose::Forward);
        assert_eq!(
            verdicts,
            vec![
                (VerifyPurpose::Finalize, true),
                (VerifyPurpose::Forward, false)
            ]
        );
    }
}
