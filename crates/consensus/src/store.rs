//! In-memory block store.
//!
//! The store is the one piece of state shared between the fetch engine,
//! the delivery engine, and the vote aggregator. Each block moves through
//! `Unknown -> Fetched -> Delivered -> Committed`, one way only. The entry
//! also owns the per-block aggregation state (`self_qc` and its flags):
//! the block itself is immutable once delivered, only the attached
//! aggregator state mutates, and all mutation happens through the engine
//! on its event thread.

use arbor_types::{Block, Hash, QuorumCert};
use std::collections::HashMap;

/// Lifecycle of a block inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockState {
    /// Referenced by hash only; no bytes yet.
    Unknown,
    /// Full block bytes are present.
    Fetched,
    /// Ancestry complete and signature verified.
    Delivered,
    /// Finalised by the safety core.
    Committed,
}

/// Store entry for one block hash.
#[derive(Debug)]
pub struct BlockEntry {
    pub block: Option<Block>,
    pub state: BlockState,
    /// The aggregating certificate this replica is building for the block.
    /// Created lazily on first vote contact.
    pub self_qc: Option<QuorumCert>,
    /// An interior node has forwarded its subtree aggregate upward.
    pub relayed: bool,
    /// The root has finalised a quorum certificate for this block.
    pub qc_finished: bool,
    /// A worker-pool verification of `self_qc` is outstanding.
    pub verify_inflight: bool,
}

impl BlockEntry {
    fn unknown() -> Self {
        BlockEntry {
            block: None,
            state: BlockState::Unknown,
            self_qc: None,
            relayed: false,
            qc_finished: false,
            verify_inflight: false,
        }
    }
}

/// Hash-indexed block storage.
#[derive(Debug, Default)]
pub struct BlockStore {
    entries: HashMap<Hash, BlockEntry>,
}

impl BlockStore {
    pub fn new() -> Self {
        BlockStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a hash, created as `Unknown` if absent.
    pub fn entry_mut(&mut self, hash: Hash) -> &mut BlockEntry {
        self.entries.entry(hash).or_insert_with(BlockEntry::unknown)
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockEntry> {
        self.entries.get(hash)
    }

    /// Insert full block bytes. Returns `true` if this transitioned the
    /// entry to `Fetched`; re-adding a known block changes nothing.
    pub fn add_fetched(&mut self, block: Block) -> bool {
        let entry = self.entry_mut(block.hash());
        if entry.state >= BlockState::Fetched {
            return false;
        }
        entry.block = Some(block);
        entry.state = BlockState::Fetched;
        true
    }

    /// Promote a fetched block to delivered. Never demotes.
    pub fn mark_delivered(&mut self, hash: Hash) -> bool {
        let entry = self.entry_mut(hash);
        if entry.state >= BlockState::Delivered || entry.block.is_none() {
            return false;
        }
        entry.state = BlockState::Delivered;
        true
    }

    pub fn mark_committed(&mut self, hash: Hash) {
        let entry = self.entry_mut(hash);
        if entry.state >= BlockState::Delivered {
            entry.state = BlockState::Committed;
        }
    }

    pub fn is_fetched(&self, hash: &Hash) -> bool {
        self.entries
            .get(hash)
            .map(|e| e.state >= BlockState::Fetched)
            .unwrap_or(false)
    }

    pub fn is_delivered(&self, hash: &Hash) -> bool {
        self.entries
            .get(hash)
            .map(|e| e.state >= BlockState::Delivered)
            .unwrap_or(false)
    }

    pub fn find(&self, hash: &Hash) -> Option<&Block> {
        self.entries.get(hash).and_then(|e| e.block.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_way() {
        let mut store = BlockStore::new();
        let genesis = Block::genesis();
        let hash = genesis.hash();

        assert!(!store.is_fetched(&hash));
        assert!(store.add_fetched(genesis.clone()));
        assert!(!store.add_fetched(genesis));
        assert!(store.is_fetched(&hash));
        assert!(!store.is_delivered(&hash));

        assert!(store.mark_delivered(hash));
        assert!(!store.mark_delivered(hash));
        assert!(store.is_delivered(&hash));

        store.mark_committed(hash);
        assert_eq!(store.get(&hash).unwrap().state, BlockState::Committed);
        // Still delivered and fetched from the callers' point of view.
        assert!(store.is_delivered(&hash));
        assert!(store.is_fetched(&hash));
    }

    #[test]
    fn unknown_entry_cannot_be_delivered() {
        let mut store = BlockStore::new();
        let hash = Hash::digest(b"nope");
        store.entry_mut(hash);
        assert!(!store.mark_delivered(hash));
        assert!(!store.is_delivered(&hash));
    }
}
