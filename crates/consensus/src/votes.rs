//! Vote aggregation along the tree overlay.
//!
//! Leaves vote straight to their parent. Every interior node folds its
//! children's contributions (direct votes and relayed subtree aggregates)
//! into the block's `self_qc`; when the aggregate covers the node's full
//! subtree it is verified and relayed one edge up. The root finalises at
//! the quorum threshold and hands the certificate to the safety core.
//!
//! Contributions are commutative and idempotent: the certificate is a set
//! union, so duplicates and reorderings cannot change the outcome, and a
//! late contribution after quorum is dropped at the door.

use crate::pending::{Contribution, PendingContribution};
use crate::state::EngineState;
use arbor_core::{Action, PeerMessage, Vote, VoteRelay, VerifyPurpose};
use arbor_types::{Hash, PartialCert, QuorumCert, ReplicaId};
use tracing::{debug, warn};

impl EngineState {
    /// Lazily create the block's aggregate, seeded with our own
    /// endorsement.
    pub(crate) fn ensure_self_qc(&mut self, hash: Hash) {
        let exists = self
            .store
            .get(&hash)
            .map(|e| e.self_qc.is_some())
            .unwrap_or(false);
        if exists {
            return;
        }
        let part = PartialCert::sign(&self.key, self.id, hash);
        let mut qc = QuorumCert::new(hash);
        qc.add_part(&part);
        self.store.entry_mut(hash).self_qc = Some(qc);
    }

    fn self_qc_has_quorum(&self, hash: &Hash) -> bool {
        self.store
            .get(hash)
            .and_then(|e| e.self_qc.as_ref())
            .map(|qc| qc.has_n(self.nmajority))
            .unwrap_or(false)
    }

    /// `vote_handler`: a direct vote from a (possibly indirect) child.
    pub(crate) fn on_vote(&mut self, vote: Vote, from: ReplicaId, actions: &mut Vec<Action>) {
        if !self.replicas.contains(from) || !self.replicas.contains(vote.voter) {
            warn!(%from, "vote from unknown peer dropped");
            return;
        }
        if vote.cert.replica != vote.voter || vote.cert.block_hash != vote.block_hash {
            warn!(%from, voter = %vote.voter, "malformed vote dropped");
            return;
        }
        let hash = vote.block_hash;
        debug!(block = %hash, voter = %vote.voter, %from, "vote received");

        self.ensure_self_qc(hash);
        if self.self_qc_has_quorum(&hash) {
            // Quorum already reached; duplicates and stragglers are noise.
            debug!(block = %hash, "vote after quorum ignored");
            return;
        }

        // Deliver the referenced block in parallel with verification; the
        // contribution is merged once both are in.
        let awaiting_delivery = !self.ensure_delivered(hash, Some(from), None, actions);

        // Only the root pays for per-vote signature checks; an interior
        // node's forward is covered by the aggregate verification, and the
        // root's final verify is the authoritative check either way.
        let awaiting_verdict = if self.view.is_root() {
            match self.replicas.public_key(vote.voter).cloned() {
                Some(public_key) => {
                    actions.push(Action::VerifyVote {
                        vote: vote.clone(),
                        public_key,
                    });
                    true
                }
                None => {
                    warn!(voter = %vote.voter, "vote from unknown voter dropped");
                    return;
                }
            }
        } else {
            false
        };

        let pending = PendingContribution {
            contribution: Contribution::Part(vote),
            awaiting_delivery,
            awaiting_verdict,
        };
        if pending.ready() {
            self.apply_contribution(hash, pending.contribution, actions);
        } else {
            self.pending_contributions
                .entry(hash)
                .or_default()
                .push(pending);
        }
    }

    /// `vote_relay_handler`: an aggregated subtree certificate from a
    /// child. The relayed aggregate is not re-verified on the incoming
    /// edge; the merged certificate is verified before this node forwards
    /// or finalises.
    pub(crate) fn on_vote_relay(
        &mut self,
        relay: VoteRelay,
        from: ReplicaId,
        actions: &mut Vec<Action>,
    ) {
        if !self.replicas.contains(from) {
            warn!(%from, "vote relay from unknown peer dropped");
            return;
        }
        if *relay.cert.block_hash() != relay.block_hash {
            warn!(%from, "vote relay certificate targets a different block");
            return;
        }
        let hash = relay.block_hash;
        debug!(
            block = %hash,
            %from,
            contributors = relay.cert.contributor_count(),
            "vote relay received"
        );

        self.ensure_self_qc(hash);
        if self.self_qc_has_quorum(&hash) {
            debug!(block = %hash, "vote relay after quorum ignored");
            return;
        }

        let awaiting_delivery = !self.ensure_delivered(hash, Some(from), None, actions);
        let pending = PendingContribution {
            contribution: Contribution::Aggregate(relay.cert),
            awaiting_delivery,
            awaiting_verdict: false,
        };
        if pending.ready() {
            self.apply_contribution(hash, pending.contribution, actions);
        } else {
            self.pending_contributions
                .entry(hash)
                .or_default()
                .push(pending);
        }
    }

    /// Verdict for a root-side individual vote check.
    pub(crate) fn on_vote_verified(&mut self, vote: Vote, valid: bool, actions: &mut Vec<Action>) {
        let hash = vote.block_hash;
        let (applied, now_empty) = {
            let Some(list) = self.pending_contributions.get_mut(&hash) else {
                return;
            };
            let Some(index) = list.iter().position(|p| {
                p.awaiting_verdict
                    && matches!(&p.contribution, Contribution::Part(v) if v.voter == vote.voter)
            }) else {
                return;
            };

            if !valid {
                warn!(voter = %vote.voter, block = %hash, "invalid vote signature, contribution dropped");
                list.swap_remove(index);
                (None, list.is_empty())
            } else {
                list[index].awaiting_verdict = false;
                if list[index].ready() {
                    let pending = list.swap_remove(index);
                    (Some(pending.contribution), list.is_empty())
                } else {
                    (None, false)
                }
            }
        };

        if now_empty {
            self.pending_contributions.remove(&hash);
        }
        if let Some(contribution) = applied {
            self.apply_contribution(hash, contribution, actions);
        }
    }

    /// The block delivered; merge every contribution that was only waiting
    /// on it.
    pub(crate) fn contributions_unblocked(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        let Some(list) = self.pending_contributions.remove(&hash) else {
            return;
        };
        let mut ready = Vec::new();
        let mut still_pending = Vec::new();
        for mut pending in list {
            pending.awaiting_delivery = false;
            if pending.ready() {
                ready.push(pending.contribution);
            } else {
                still_pending.push(pending);
            }
        }
        if !still_pending.is_empty() {
            self.pending_contributions.insert(hash, still_pending);
        }
        for contribution in ready {
            self.apply_contribution(hash, contribution, actions);
        }
    }

    /// Merge one contribution into the aggregate and re-check the
    /// position-dependent threshold.
    fn apply_contribution(
        &mut self,
        hash: Hash,
        contribution: Contribution,
        actions: &mut Vec<Action>,
    ) {
        {
            let nmajority = self.nmajority;
            let entry = self.store.entry_mut(hash);
            let Some(qc) = entry.self_qc.as_mut() else {
                return;
            };
            if qc.has_n(nmajority) {
                return;
            }
            match &contribution {
                Contribution::Part(vote) => {
                    qc.add_part(&vote.cert);
                }
                Contribution::Aggregate(aggregate) => {
                    qc.merge(aggregate);
                }
            }
        }
        self.check_thresholds(hash, actions);
    }

    /// Position-dependent thresholds: an interior node forwards at
    /// `subtree size + 1`, the root finalises at `nmajority`, leaves never
    /// aggregate. The aggregate is verified on the worker pool before
    /// either step; `relayed`/`qc_finished` guarantee at most one forward
    /// and one finalisation per block.
    pub(crate) fn check_thresholds(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        let is_root = self.view.is_root();
        let interior = !is_root && !self.view.is_leaf();
        let threshold = if is_root {
            self.nmajority
        } else {
            self.view.descendants + 1
        };

        let entry = self.store.entry_mut(hash);
        let Some(qc) = entry.self_qc.as_mut() else {
            return;
        };

        if is_root {
            if qc.has_n(threshold) && !entry.qc_finished && !entry.verify_inflight {
                qc.compute();
                entry.verify_inflight = true;
                actions.push(Action::VerifyQuorum {
                    qc: qc.clone(),
                    purpose: VerifyPurpose::Finalize,
                });
            }
        } else if interior && qc.has_n(threshold) && !entry.relayed && !entry.verify_inflight {
            qc.compute();
            entry.verify_inflight = true;
            actions.push(Action::VerifyQuorum {
                qc: qc.clone(),
                purpose: VerifyPurpose::Forward,
            });
        }
    }

    /// Verdict for an aggregate verification. A failure here means a
    /// Byzantine child or a corrupted merge in our own subtree; there is
    /// no safe way to continue, so the run aborts.
    pub(crate) fn on_quorum_verified(
        &mut self,
        qc: QuorumCert,
        purpose: VerifyPurpose,
        valid: bool,
        actions: &mut Vec<Action>,
    ) {
        let hash = *qc.block_hash();
        let entry = self.store.entry_mut(hash);
        entry.verify_inflight = false;

        if !valid {
            actions.push(Action::Fatal {
                reason: format!("invalid aggregate signature for block {hash}"),
            });
            return;
        }

        match purpose {
            VerifyPurpose::Forward => {
                if entry.relayed {
                    return;
                }
                entry.relayed = true;
                let Some(parent) = self.view.parent else {
                    return;
                };
                debug!(
                    block = %hash,
                    contributors = qc.contributor_count(),
                    "relaying subtree aggregate"
                );
                actions.push(Action::Send {
                    to: parent,
                    message: PeerMessage::VoteRelay(VoteRelay {
                        block_hash: hash,
                        cert: qc,
                    }),
                });
            }
            VerifyPurpose::Finalize => {
                if entry.qc_finished {
                    return;
                }
                entry.qc_finished = true;
                self.stats.qc_finished += 1;

                let Some(block) = self.store.find(&hash).cloned() else {
                    warn!(block = %hash, "quorum reached on unfetched block");
                    return;
                };
                debug!(
                    block = %hash,
                    contributors = qc.contributor_count(),
                    "quorum certificate finalised"
                );
                self.safety.update_hqc(&hash, &qc);
                let finalities = self.safety.on_qc_finish(&block);
                self.pacemaker.on_consensus(&block);
                self.process_finalities(finalities, actions);
            }
        }
    }
}
