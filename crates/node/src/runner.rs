//! Production runner: the event loop around one replica's engine.
//!
//! Owns the state machine and drives it from priority-ordered channels
//! with a biased select: timers first (liveness), then verification
//! callbacks (they unblock in-flight consensus work), then network
//! frames, then client commands. Frames are parsed here, on the consumer
//! thread, after the consensus context exists.

use crate::codec::Frame;
use crate::transport::{NetworkConfig, NetworkError, PeerNetwork};
use crate::verify_pool::VerifyPool;
use crate::timers::TimerManager;
use arbor_consensus::{
    BasicSafetyCore, EngineConfig, EngineState, Pacemaker, RootPacemaker, SafetyCore,
};
use arbor_core::{Action, Event, Finality, RequestId, StateMachine};
use arbor_types::{Block, Hash, KeyPair, ReplicaId, ReplicaSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("missing builder field: {0}")]
    Config(&'static str),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("overlay error: {0}")]
    Overlay(#[from] arbor_types::OverlayError),

    #[error("verification pool failed to start: {0}")]
    VerifyPool(#[from] rayon::ThreadPoolBuildError),

    #[error("fatal protocol violation: {0}")]
    Fatal(String),
}

/// Handle that aborts the runner when dropped or shut down.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Builder for a [`NodeRunner`].
pub struct NodeRunnerBuilder {
    id: Option<ReplicaId>,
    key: Option<KeyPair>,
    replicas: Option<Arc<ReplicaSet>>,
    fanout: usize,
    nworker: usize,
    engine_config: EngineConfig,
    network_config: NetworkConfig,
    network: Option<(Arc<PeerNetwork>, mpsc::Receiver<(ReplicaId, Frame)>)>,
    safety: Option<Box<dyn SafetyCore>>,
    pacemaker: Option<Box<dyn Pacemaker>>,
}

impl Default for NodeRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRunnerBuilder {
    pub fn new() -> Self {
        NodeRunnerBuilder {
            id: None,
            key: None,
            replicas: None,
            fanout: 3,
            nworker: 2,
            engine_config: EngineConfig::default(),
            network_config: NetworkConfig::default(),
            network: None,
            safety: None,
            pacemaker: None,
        }
    }

    pub fn id(mut self, id: ReplicaId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn key(mut self, key: KeyPair) -> Self {
        self.key = Some(key);
        self
    }

    pub fn replicas(mut self, replicas: Arc<ReplicaSet>) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Size of the verification worker pool.
    pub fn nworker(mut self, nworker: usize) -> Self {
        self.nworker = nworker;
        self
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn network_config(mut self, config: NetworkConfig) -> Self {
        self.network_config = config;
        self
    }

    /// Use an already-spawned transport instead of binding a new one.
    pub fn network(
        mut self,
        network: Arc<PeerNetwork>,
        inbound_rx: mpsc::Receiver<(ReplicaId, Frame)>,
    ) -> Self {
        self.network = Some((network, inbound_rx));
        self
    }

    /// Plug in a full safety core; defaults to [`BasicSafetyCore`].
    pub fn safety(mut self, safety: Box<dyn SafetyCore>) -> Self {
        self.safety = Some(safety);
        self
    }

    /// Plug in a pacemaker; defaults to [`RootPacemaker`].
    pub fn pacemaker(mut self, pacemaker: Box<dyn Pacemaker>) -> Self {
        self.pacemaker = Some(pacemaker);
        self
    }

    pub async fn build(self) -> Result<NodeRunner, RunnerError> {
        let id = self.id.ok_or(RunnerError::Config("id"))?;
        let key = self.key.ok_or(RunnerError::Config("key"))?;
        let replicas = self.replicas.ok_or(RunnerError::Config("replicas"))?;

        let (network, inbound_rx) = match self.network {
            Some(pair) => pair,
            None => {
                let (network, inbound_rx, _) = PeerNetwork::spawn(
                    self.network_config.clone(),
                    id,
                    key.clone(),
                    replicas.clone(),
                )
                .await?;
                (network, inbound_rx)
            }
        };

        let safety = self
            .safety
            .unwrap_or_else(|| Box::new(BasicSafetyCore::new(id, key.clone())));
        let pacemaker = self.pacemaker.unwrap_or_else(|| {
            Box::new(RootPacemaker::new(ReplicaId(0), Block::genesis().hash()))
        });

        let engine = EngineState::new(
            id,
            key,
            replicas.clone(),
            self.fanout,
            self.engine_config,
            safety,
            pacemaker,
        )?;

        let (timer_tx, timer_rx) = mpsc::channel(16);
        // Unbounded so the verification workers never block on results.
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(10_000);
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let verify_pool = VerifyPool::new(self.nworker, replicas, callback_tx.clone())?;
        let timer_manager = TimerManager::new(timer_tx);

        Ok(NodeRunner {
            engine,
            network,
            inbound_rx,
            timer_rx,
            callback_rx,
            command_tx,
            command_rx,
            decision_tx,
            decision_rx: Some(decision_rx),
            verify_pool,
            timer_manager,
            shutdown_rx,
            shutdown_tx: Some(shutdown_tx),
            start: Instant::now(),
        })
    }
}

/// One replica's production event loop.
pub struct NodeRunner {
    engine: EngineState,
    network: Arc<PeerNetwork>,
    inbound_rx: mpsc::Receiver<(ReplicaId, Frame)>,
    timer_rx: mpsc::Receiver<Event>,
    callback_rx: mpsc::UnboundedReceiver<Event>,
    command_tx: mpsc::Sender<(Hash, RequestId)>,
    command_rx: mpsc::Receiver<(Hash, RequestId)>,
    decision_tx: mpsc::UnboundedSender<(RequestId, Finality)>,
    decision_rx: Option<mpsc::UnboundedReceiver<(RequestId, Finality)>>,
    verify_pool: VerifyPool,
    timer_manager: TimerManager,
    shutdown_rx: oneshot::Receiver<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    start: Instant,
}

impl NodeRunner {
    pub fn builder() -> NodeRunnerBuilder {
        NodeRunnerBuilder::new()
    }

    /// `exec_command` surface: submit a command hash with a correlation
    /// id; the decision arrives on the decision stream.
    pub fn command_sender(&self) -> mpsc::Sender<(Hash, RequestId)> {
        self.command_tx.clone()
    }

    /// Stream of command decisions. Can be taken once.
    pub fn take_decision_stream(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<(RequestId, Finality)>> {
        self.decision_rx.take()
    }

    /// Take the shutdown handle. Can be taken once.
    pub fn shutdown_handle(&mut self) -> Option<ShutdownHandle> {
        self.shutdown_tx.take().map(|tx| ShutdownHandle { tx: Some(tx) })
    }

    pub fn network(&self) -> &Arc<PeerNetwork> {
        &self.network
    }

    /// `start`: connect the tree edges and run the event loop until
    /// shutdown or a fatal protocol violation.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        info!(replica = %self.engine.id(), "starting runner");

        let startup = self.engine.startup_actions();
        self.process_actions(startup)?;

        let neighbors = self.engine.view().neighbors();
        self.network.connect_tree(&neighbors).await;

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!(replica = %self.engine.id(), "shutdown");
                    self.timer_manager.cancel_all();
                    return Ok(());
                }

                Some(event) = self.timer_rx.recv() => {
                    self.dispatch(event)?;
                }

                Some(event) = self.callback_rx.recv() => {
                    self.dispatch(event)?;
                }

                Some((peer, frame)) = self.inbound_rx.recv() => {
                    // Postponed parse, on the consumer thread.
                    match frame.parse() {
                        Ok(message) => {
                            debug!(
                                %peer,
                                kind = message.type_name(),
                                "frame received"
                            );
                            self.dispatch(message.into_event(peer))?;
                        }
                        Err(error) => {
                            warn!(%peer, %error, "malformed frame dropped");
                        }
                    }
                }

                Some((cmd_hash, request_id)) = self.command_rx.recv() => {
                    self.dispatch(Event::CommandSubmitted { cmd_hash, request_id })?;
                }

                else => {
                    warn!("all event channels closed");
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(&mut self, event: Event) -> Result<(), RunnerError> {
        self.engine.set_time(self.start.elapsed());
        let actions = self.engine.handle(event);
        self.process_actions(actions)
    }

    fn process_actions(&mut self, actions: Vec<Action>) -> Result<(), RunnerError> {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    self.network.send(to, Frame::from_message(&message));
                }
                verify @ (Action::VerifyBlock { .. }
                | Action::VerifyVote { .. }
                | Action::VerifyQuorum { .. }) => {
                    self.verify_pool.dispatch(verify);
                }
                Action::SetTimer { id, duration } => {
                    self.timer_manager.set_timer(id, duration);
                }
                Action::CancelTimer { id } => {
                    self.timer_manager.cancel_timer(id);
                }
                Action::NotifyDecision {
                    request_id,
                    finality,
                } => {
                    let _ = self.decision_tx.send((request_id, finality));
                }
                Action::Fatal { reason } => {
                    error!(replica = %self.engine.id(), %reason, "fatal, aborting");
                    self.timer_manager.cancel_all();
                    return Err(RunnerError::Fatal(reason));
                }
            }
        }
        Ok(())
    }
}
