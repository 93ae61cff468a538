//! Block fetching: single-flight request contexts and the retry sweep.
//!
//! `ensure_fetched` is the engine's `async_fetch_blk`: callers name a hash
//! and a continuation; at most one request context exists per hash and all
//! callers share its resolution. Candidate source peers accumulate from
//! delivery hints; the periodic sweep walks them one timeout apart until
//! the block arrives or the candidates are exhausted.

use crate::pending::{BlockFetchContext, FetchWaiter};
use crate::state::EngineState;
use arbor_core::{Action, PeerMessage, TimerId};
use arbor_types::{Hash, ReplicaId};
use tracing::{debug, warn};

impl EngineState {
    /// Ensure the block's bytes are (or become) locally available.
    ///
    /// Returns `true` when the block is already fetched; the waiter is
    /// *not* registered and the caller continues inline. Otherwise the
    /// waiter joins the hash's unique fetch context; a `hint` peer is
    /// added as a candidate source and asked eagerly.
    pub(crate) fn ensure_fetched(
        &mut self,
        hash: Hash,
        hint: Option<ReplicaId>,
        waiter: FetchWaiter,
        actions: &mut Vec<Action>,
    ) -> bool {
        if self.store.is_fetched(&hash) {
            return true;
        }

        let now = self.now;
        let ctx = self
            .fetch_waiting
            .entry(hash)
            .or_insert_with(|| BlockFetchContext::new(now));
        ctx.waiters.push(waiter);

        if let Some(peer) = hint {
            if !ctx.candidates.contains(&peer) {
                ctx.candidates.push(peer);
                // fetch_now: a fresh candidate is asked immediately rather
                // than waiting for the sweep.
                if ctx.asked.insert(peer) {
                    ctx.last_request = now;
                    actions.push(Action::Send {
                        to: peer,
                        message: PeerMessage::RequestBlocks(vec![hash]),
                    });
                }
            }
        }
        false
    }

    /// A block became locally available; resolve its fetch context.
    pub(crate) fn resolve_fetched(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        let Some(ctx) = self.fetch_waiting.remove(&hash) else {
            return;
        };
        debug!(block = %hash, waiters = ctx.waiters.len(), "fetch resolved");
        for waiter in ctx.waiters {
            match waiter {
                FetchWaiter::Delivery(block_hash) => self.start_prereqs(block_hash, actions),
                FetchWaiter::Respond { seq } => self.response_part_ready(seq, actions),
            }
        }
    }

    /// Abandon a fetch whose candidates are exhausted. Dependent delivery
    /// contexts reject; the upper layer retries on a later proposal
    /// referencing the same ancestry.
    fn reject_fetch(&mut self, hash: Hash, actions: &mut Vec<Action>) {
        let Some(ctx) = self.fetch_waiting.remove(&hash) else {
            return;
        };
        warn!(
            block = %hash,
            tried = ctx.asked.len(),
            "fetch abandoned, all candidate peers exhausted"
        );
        for waiter in ctx.waiters {
            match waiter {
                FetchWaiter::Delivery(block_hash) => self.reject_delivery(block_hash, actions),
                FetchWaiter::Respond { seq } => {
                    if self.pending_responses.remove(&seq).is_some() {
                        warn!(seq, "block request unanswerable, response dropped");
                    }
                }
            }
        }
    }

    /// Periodic sweep: retry stale requests against the next candidate,
    /// reject contexts with nothing left to try. Contexts that never had a
    /// candidate keep waiting for the block to arrive some other way.
    pub(crate) fn on_fetch_tick(&mut self, actions: &mut Vec<Action>) {
        let timeout = self.config.fetch_timeout;
        let now = self.now;

        let mut exhausted = Vec::new();
        for (hash, ctx) in self.fetch_waiting.iter_mut() {
            if ctx.candidates.is_empty() {
                continue;
            }
            if now.saturating_sub(ctx.last_request) < timeout {
                continue;
            }
            match ctx.next_unasked() {
                Some(peer) => {
                    debug!(block = %hash, %peer, "retrying fetch against next candidate");
                    ctx.asked.insert(peer);
                    ctx.last_request = now;
                    actions.push(Action::Send {
                        to: peer,
                        message: PeerMessage::RequestBlocks(vec![*hash]),
                    });
                }
                None => exhausted.push(*hash),
            }
        }
        for hash in exhausted {
            self.reject_fetch(hash, actions);
        }

        actions.push(Action::SetTimer {
            id: TimerId::FetchTick,
            duration: self.config.fetch_tick,
        });
    }

    // ── Serving block requests ──────────────────────────────────────────

    /// `req_blk_handler`: answer with full blocks once every requested
    /// hash is locally available, joining on fetches for those that are
    /// not yet.
    pub(crate) fn on_block_request(
        &mut self,
        hashes: Vec<Hash>,
        from: ReplicaId,
        actions: &mut Vec<Action>,
    ) {
        if !self.replicas.contains(from) {
            warn!(%from, "block request from unknown peer dropped");
            return;
        }
        if hashes.is_empty() {
            return;
        }

        let seq = self.next_response_seq;
        self.next_response_seq += 1;

        let mut remaining = 0;
        for hash in &hashes {
            if !self.ensure_fetched(*hash, None, FetchWaiter::Respond { seq }, actions) {
                remaining += 1;
            }
        }

        if remaining == 0 {
            self.send_block_response(from, &hashes, actions);
        } else {
            debug!(%from, seq, remaining, "block response pending fetches");
            self.pending_responses.insert(
                seq,
                crate::pending::PendingResponse {
                    peer: from,
                    hashes,
                    remaining,
                },
            );
        }
    }

    /// One hash of a pending response became available.
    fn response_part_ready(&mut self, seq: u64, actions: &mut Vec<Action>) {
        let done = match self.pending_responses.get_mut(&seq) {
            Some(pending) => {
                pending.remaining -= 1;
                pending.remaining == 0
            }
            None => false,
        };
        if done {
            let pending = self
                .pending_responses
                .remove(&seq)
                .expect("pending response checked above");
            self.send_block_response(pending.peer, &pending.hashes, actions);
        }
    }

    fn send_block_response(&mut self, peer: ReplicaId, hashes: &[Hash], actions: &mut Vec<Action>) {
        let blocks: Vec<_> = hashes
            .iter()
            .filter_map(|h| self.store.find(h).cloned())
            .collect();
        if blocks.len() < hashes.len() {
            // A hash resolved and was then lost; cannot happen with the
            // in-memory store, but do not send a partial answer silently.
            warn!(%peer, "block response missing entries, dropped");
            return;
        }
        actions.push(Action::Send {
            to: peer,
            message: PeerMessage::RespondBlocks(blocks),
        });
    }

    /// `resp_blk_handler`: absorb answered blocks and resume whatever was
    /// waiting on them.
    pub(crate) fn on_block_response(
        &mut self,
        blocks: Vec<arbor_types::Block>,
        from: ReplicaId,
        actions: &mut Vec<Action>,
    ) {
        if !self.replicas.contains(from) {
            warn!(%from, "block response from unknown peer dropped");
            return;
        }
        for block in blocks {
            let hash = block.hash();
            if self.store.add_fetched(block) {
                self.stats.fetched += 1;
                self.stats.part_fetched += 1;
                debug!(block = %hash, %from, "fetched");
                self.resolve_fetched(hash, actions);
            }
        }
    }
}
