//! Core event model for the arbor consensus engine.
//!
//! The coordination core is a synchronous, deterministic state machine:
//!
//! ```text
//! Events -> StateMachine::handle() -> Actions
//! ```
//!
//! The state machine performs no I/O and holds no locks. A runner,
//! production (tokio) or simulation (deterministic queue), delivers
//! events, executes the returned actions, and feeds results of delegated
//! work (signature checks on the worker pool, network round-trips) back in
//! as events.

mod action;
mod event;
mod message;
mod traits;

pub use action::{Action, Finality, VerifyPurpose};
pub use event::{Event, EventPriority, RequestId};
pub use message::{PeerMessage, Proposal, Vote, VoteRelay};
pub use traits::StateMachine;

/// Identifies a timer the state machine can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Periodic fetch retry sweep: rotates candidate peers for stale
    /// outstanding block requests.
    FetchTick,
    /// Periodic statistics log line.
    Stats,
}
