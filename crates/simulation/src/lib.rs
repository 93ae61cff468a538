//! Deterministic simulation harness for arbor clusters.
//!
//! Runs any number of replica engines against a simulated network with
//! seeded latency, loss, and partitions. Used by the scenario and
//! invariant tests; also handy for protocol debugging, since a failing
//! seed replays identically.

mod event_queue;
mod network;
mod runner;

pub use event_queue::EventKey;
pub use network::{NetworkModel, SimulatedNetwork};
pub use runner::{
    sim_keypair, sim_replica_set, SimulationConfig, SimulationRunner, SimulationStats,
};
