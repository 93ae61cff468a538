//! The arbor coordination engine.
//!
//! This crate implements the networked coordination core of the
//! replication protocol as a deterministic state machine:
//!
//! - **Block fetch**: single-flight block requests with candidate-peer
//!   rotation
//! - **Block delivery**: recursive ancestry completion and signature
//!   verification
//! - **Vote aggregation**: partial certificates folded up the tree
//!   overlay into a quorum certificate at the root
//! - **Command ingress**: batching at the proposer, decision callbacks
//!   everywhere
//!
//! The pure HotStuff safety machine and the pacemaker are external
//! collaborators behind the [`SafetyCore`] and [`Pacemaker`] traits;
//! reference implementations ship for tests and simple deployments.

mod config;
mod deliver;
mod fetch;
mod pacemaker;
mod pending;
mod safety;
mod state;
mod store;
mod votes;

pub use config::EngineConfig;
pub use pacemaker::{Pacemaker, RootPacemaker};
pub use safety::{BasicSafetyCore, ProposalVerdict, SafetyCore};
pub use state::{EngineState, EngineStats};
pub use store::{BlockState, BlockStore};
