//! Domain-separated signing messages.
//!
//! Block signatures and vote endorsements both cover a block hash; the
//! domain tag keeps one from being replayed as the other.

use crate::Hash;

/// Domain tag for a proposer's signature over a block.
pub const DOMAIN_BLOCK: &[u8] = b"arbor/block:";

/// Domain tag for a replica's vote endorsement of a block.
pub const DOMAIN_VOTE: &[u8] = b"arbor/vote:";

/// Message a proposer signs when creating a block.
pub fn block_message(block_hash: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_BLOCK.len() + 32);
    message.extend_from_slice(DOMAIN_BLOCK);
    message.extend_from_slice(block_hash.as_bytes());
    message
}

/// Message a replica signs when voting for a block.
pub fn vote_message(block_hash: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_VOTE.len() + 32);
    message.extend_from_slice(DOMAIN_VOTE);
    message.extend_from_slice(block_hash.as_bytes());
    message
}

/// Domain tag for the connection handshake challenge.
pub const DOMAIN_CHANNEL: &[u8] = b"arbor/chan:";

/// Message a replica signs to answer a connection challenge.
pub fn channel_message(challenge: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_CHANNEL.len() + 32);
    message.extend_from_slice(DOMAIN_CHANNEL);
    message.extend_from_slice(challenge);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_differ() {
        let h = Hash::digest(b"blk");
        assert_ne!(block_message(&h), vote_message(&h));
    }
}
