//! Production runner for an arbor replica.
//!
//! Wraps the deterministic coordination engine with real I/O:
//!
//! - [`codec`]: the wire format of the five protocol messages
//! - [`transport`]: authenticated TCP links along the tree edges
//! - A rayon verification pool for signature and certificate checks
//! - tokio timers and the biased-priority event loop
//!
//! ```no_run
//! use arbor_node::{NodeRunner, NetworkConfig};
//! use arbor_types::{KeyPair, ReplicaId, ReplicaSet};
//! use std::sync::Arc;
//!
//! # async fn example(replicas: Arc<ReplicaSet>) -> Result<(), Box<dyn std::error::Error>> {
//! let key = KeyPair::generate();
//! let mut runner = NodeRunner::builder()
//!     .id(ReplicaId(1))
//!     .key(key)
//!     .replicas(replicas)
//!     .fanout(3)
//!     .nworker(4)
//!     .network_config(NetworkConfig::default())
//!     .build()
//!     .await?;
//! let commands = runner.command_sender();
//! let decisions = runner.take_decision_stream();
//! tokio::spawn(runner.run());
//! # let _ = (commands, decisions);
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod runner;
mod telemetry;
mod timers;
mod transport;
mod verify_pool;

pub use codec::{CodecError, Frame};
pub use runner::{NodeRunner, NodeRunnerBuilder, RunnerError, ShutdownHandle};
pub use telemetry::init_telemetry;
pub use timers::TimerManager;
pub use transport::{NetworkConfig, NetworkError, PeerNetwork};
pub use verify_pool::VerifyPool;
