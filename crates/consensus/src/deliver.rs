//! Block delivery: the recursive ancestry walk.
//!
//! `ensure_delivered` is the engine's `async_deliver_blk`. A block is
//! delivered once its proposer signature verifies, every parent is
//! delivered, the justify-QC target is delivered, and the safety core's
//! acceptance hook agrees. The parent graph is a DAG rooted at genesis
//! (always delivered), so the recursion terminates; memoisation through
//! `delivery_waiting` keeps a block that is already pending from being
//! walked twice.

use crate::pending::{BlockDeliveryContext, DeliveryWaiter, FetchWaiter};
use crate::state::EngineState;
use arbor_core::Action;
use arbor_types::Hash;
use tracing::{debug, warn};

impl EngineState {
    /// Ensure the block reaches the delivered state.
    ///
    /// Returns `true` when it already has; the waiter is *not*
    /// registered and the caller continues inline. Otherwise the waiter
    /// joins the hash's unique delivery context, creating it (and the
    /// underlying fetch) on first contact.
    pub(crate) fn ensure_delivered(
        &mut self,
        hash: Hash,
        hint: Option<arbor_types::ReplicaId>,
        waiter: Option<DeliveryWaiter>,
        actions: &mut Vec<Action>,
    ) -> bool {
        if self.store.is_delivered(&hash) {
            return true;
        }

        if let Some(ctx) = self.delivery_waiting.get_mut(&hash) {
            if let Some(w) = waiter {
                ctx.waiters.push(w);
            }
            if let (Some(peer), None) = (hint, ctx.hint) {
                ctx.hint = Some(peer);
            }
            return false;
        }

        let mut ctx = BlockDeliveryContext::new(hint);
        if let Some(w) = waiter {
            ctx.waiters.push(w);
        }
        self.delivery_waiting.insert(hash, ctx);

        if self.ensure_fetched(hash, hint, FetchWaiter::Delivery(hash), actions) {
            self.start_prereqs(hash, actions);
        }
        false
    }

    /// The block's bytes are present: spawn its delivery prerequisites.
    /// Those are the signature check on the worker pool plus recursive
    /// delivery of each parent and of the justify-QC target.
    pub(crate) fn start_prereqs(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        let Some(block) = self.store.find(&hash).cloned() else {
            warn!(block = %hash, "prerequisites requested before fetch");
            return;
        };
        let hint = match self.delivery_waiting.get_mut(&hash) {
            Some(ctx) => {
                if ctx.prereqs_started {
                    return;
                }
                ctx.prereqs_started = true;
                ctx.hint
            }
            // Context already resolved or rejected.
            None => return,
        };

        let mut outstanding = 0;

        // Signature check. Genesis never gets here (delivered at init), so
        // every block entering has a proposer to hold accountable.
        match self.replicas.public_key(block.proposer()).cloned() {
            Some(public_key) => {
                outstanding += 1;
                actions.push(Action::VerifyBlock {
                    block: block.clone(),
                    public_key,
                });
            }
            None => {
                warn!(block = %hash, proposer = %block.proposer(), "unknown proposer");
                self.reject_delivery(hash, actions);
                return;
            }
        }

        // Justify-QC target. A block claiming itself as an ancestor can
        // never deliver; do not register a self-waiter for it.
        let justify_target = *block.justify().block_hash();
        if !justify_target.is_zero()
            && justify_target != hash
            && !self.ensure_delivered(
                justify_target,
                hint,
                Some(DeliveryWaiter::PrereqOf(hash)),
                actions,
            )
        {
            outstanding += 1;
        }

        // Parents, recursively.
        for parent in block.parents().to_vec() {
            if parent == justify_target || parent == hash {
                // Either already counted, or a degenerate self-reference.
                continue;
            }
            if !self.ensure_delivered(parent, hint, Some(DeliveryWaiter::PrereqOf(hash)), actions) {
                outstanding += 1;
            }
        }

        if let Some(ctx) = self.delivery_waiting.get_mut(&hash) {
            ctx.outstanding = outstanding;
        }
    }

    /// Signature verdict from the worker pool.
    pub(crate) fn on_block_verified(&mut self, hash: Hash, valid: bool, actions: &mut Vec<Action>) {
        let Some(ctx) = self.delivery_waiting.get_mut(&hash) else {
            return;
        };
        ctx.signature_valid = Some(valid);
        ctx.outstanding = ctx.outstanding.saturating_sub(1);
        self.maybe_complete(hash, actions);
    }

    /// A prerequisite delivery of `hash` finished.
    fn on_prereq_done(&mut self, hash: Hash, ok: bool, actions: &mut Vec<Action>) {
        if !ok {
            // Missing or invalid ancestry poisons the dependent block.
            self.reject_delivery(hash, actions);
            return;
        }
        let Some(ctx) = self.delivery_waiting.get_mut(&hash) else {
            return;
        };
        ctx.outstanding = ctx.outstanding.saturating_sub(1);
        self.maybe_complete(hash, actions);
    }

    fn maybe_complete(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        let ready = self
            .delivery_waiting
            .get(&hash)
            .map(|ctx| ctx.prereqs_started && ctx.outstanding == 0)
            .unwrap_or(false);
        if !ready {
            return;
        }

        let signature_ok = self
            .delivery_waiting
            .get(&hash)
            .and_then(|ctx| ctx.signature_valid)
            .unwrap_or(false);

        let accepted = signature_ok && {
            let block = self
                .store
                .find(&hash)
                .cloned()
                .expect("prereqs ran, block is fetched");
            self.safety.on_deliver_blk(&block)
        };

        if accepted {
            self.finish_delivery(hash, actions);
        } else {
            warn!(block = %hash, signature_ok, "verification failed during delivery");
            self.reject_delivery(hash, actions);
        }
    }

    /// Mark delivered and resume everything suspended on this block:
    /// dependent deliveries, proposal continuations, and pending vote
    /// contributions.
    pub(crate) fn finish_delivery(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        if !self.store.mark_delivered(hash) {
            return;
        }
        self.stats.delivered += 1;
        self.stats.part_delivered += 1;
        debug!(block = %hash, "delivered");

        if let Some(ctx) = self.delivery_waiting.remove(&hash) {
            for waiter in ctx.waiters {
                match waiter {
                    DeliveryWaiter::PrereqOf(dependent) => {
                        self.on_prereq_done(dependent, true, actions)
                    }
                    DeliveryWaiter::Proposal(proposal) => {
                        self.proposal_delivered(proposal, actions)
                    }
                }
            }
        }
        self.contributions_unblocked(hash, actions);
    }

    /// Reject the delivery and cascade the failure to dependents. The
    /// block stays fetched but is never promoted.
    pub(crate) fn reject_delivery(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        let Some(ctx) = self.delivery_waiting.remove(&hash) else {
            return;
        };
        warn!(block = %hash, waiters = ctx.waiters.len(), "delivery rejected");
        for waiter in ctx.waiters {
            match waiter {
                DeliveryWaiter::PrereqOf(dependent) => {
                    self.on_prereq_done(dependent, false, actions)
                }
                DeliveryWaiter::Proposal(proposal) => {
                    warn!(block = %proposal.block.hash(), "dropping proposal for undeliverable block");
                }
            }
        }
        if self.pending_contributions.remove(&hash).is_some() {
            warn!(block = %hash, "dropping vote contributions for undeliverable block");
        }
    }
}
