//! Foundational types for the arbor consensus engine.
//!
//! This crate is the dependency floor of the workspace:
//!
//! - **Primitives**: [`Hash`], key and signature wrappers
//! - **Consensus data**: [`Block`], [`PartialCert`], [`QuorumCert`]
//! - **Membership**: [`ReplicaId`], [`ReplicaSet`], the [`TreeOverlay`]
//! - **Wire plumbing**: little-endian [`wire`] primitives and the signing
//!   domain tags in [`signing`]
//!
//! It depends on no other workspace crate.

mod block;
mod certificate;
mod crypto;
mod hash;
mod overlay;
mod replica;
pub mod signing;
pub mod wire;

pub use block::Block;
pub use certificate::{PartialCert, QuorumCert};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::{Hash, HASH_LENGTH};
pub use overlay::{OverlayError, TreeOverlay, TreeView};
pub use replica::{ReplicaId, ReplicaInfo, ReplicaSet};
