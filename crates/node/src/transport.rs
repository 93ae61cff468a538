//! Authenticated point-to-point peer transport.
//!
//! tokio TCP with one reader and one writer task per connection. Frames
//! from one peer preserve send order (a single reader feeds a single
//! inbound queue); no ordering holds across peers. Connections are only
//! established along direct tree edges, in randomised order with a pacing
//! delay so a large overlay does not dial in lockstep.
//!
//! Every connection starts with a mutual handshake: each side presents its
//! certificate hash and answers the other's random challenge with a
//! signature under its replica key. A presented certificate outside the
//! allow-list, or a signature that does not match the certificate's
//! replica, rejects the connection.

use crate::codec::{Frame, MAX_FRAME_LEN};
use arbor_types::signing::channel_message;
use arbor_types::{Hash, KeyPair, ReplicaId, ReplicaSet};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const HANDSHAKE_MAGIC: [u8; 4] = *b"arb1";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("peer presented an unknown certificate")]
    UnknownCertificate,

    #[error("peer failed the challenge signature")]
    BadChallengeSignature,

    #[error("bad handshake magic")]
    BadMagic,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub listen_addr: SocketAddr,
    /// Delay between successive outbound dials.
    pub connect_pacing: Duration,
    pub handshake_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            listen_addr: "127.0.0.1:0".parse().expect("static address"),
            connect_pacing: Duration::from_millis(1),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// The peer-to-peer network of one replica.
pub struct PeerNetwork {
    local: ReplicaId,
    key: KeyPair,
    cert_hash: Hash,
    replicas: Arc<ReplicaSet>,
    config: NetworkConfig,
    peers: RwLock<HashMap<ReplicaId, mpsc::UnboundedSender<Frame>>>,
    inbound_tx: mpsc::Sender<(ReplicaId, Frame)>,
}

impl PeerNetwork {
    /// Bind the listener and start accepting authenticated connections.
    ///
    /// Returns the network handle, the inbound frame stream, and the
    /// actually bound address.
    pub async fn spawn(
        config: NetworkConfig,
        local: ReplicaId,
        key: KeyPair,
        replicas: Arc<ReplicaSet>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<(ReplicaId, Frame)>, SocketAddr), NetworkError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let cert_hash = replicas
            .get(local)
            .map(|info| info.cert_hash)
            .unwrap_or(Hash::ZERO);

        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let network = Arc::new(PeerNetwork {
            local,
            key,
            cert_hash,
            replicas,
            config,
            peers: RwLock::new(HashMap::new()),
            inbound_tx,
        });

        let accept_net = network.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let net = accept_net.clone();
                        tokio::spawn(async move {
                            if let Err(error) = net.handle_incoming(stream).await {
                                debug!(%addr, %error, "inbound connection rejected");
                            }
                        });
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                    }
                }
            }
        });

        info!(replica = %local, %local_addr, "transport listening");
        Ok((network, inbound_rx, local_addr))
    }

    /// Dial the direct tree edges, in randomised order with pacing.
    ///
    /// Each edge is dialed from exactly one side, the higher id (in a
    /// breadth-first overlay, the child), so simultaneous dials cannot
    /// race into split connections.
    pub async fn connect_tree(self: &Arc<Self>, neighbors: &[ReplicaId]) {
        let mut order: Vec<ReplicaId> = neighbors
            .iter()
            .copied()
            .filter(|peer| *peer < self.local)
            .collect();
        order.shuffle(&mut rand::thread_rng());
        for peer in order {
            if self.is_connected(peer) {
                continue;
            }
            let Some(addr) = self.replicas.get(peer).map(|info| info.address) else {
                warn!(%peer, "no address for tree neighbor");
                continue;
            };
            if let Err(error) = self.connect(peer, addr).await {
                // The peer may dial us instead; the edge heals from either
                // side.
                debug!(%peer, %addr, %error, "outbound dial failed");
            }
            tokio::time::sleep(self.config.connect_pacing).await;
        }
    }

    /// Dial one peer and run the handshake.
    pub async fn connect(self: &Arc<Self>, peer: ReplicaId, addr: SocketAddr) -> Result<(), NetworkError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let authenticated = self.handshake(&mut stream).await?;
        if authenticated != peer {
            warn!(expected = %peer, actual = %authenticated, "dialed peer authenticated as someone else");
        }
        self.register(authenticated, stream);
        Ok(())
    }

    /// Queue a frame for one peer. Dropped with a warning if the peer is
    /// not connected; block references let the protocol recover from loss.
    pub fn send(&self, to: ReplicaId, frame: Frame) {
        let peers = self.peers.read();
        match peers.get(&to) {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    warn!(peer = %to, "send to closing connection dropped");
                }
            }
            None => warn!(peer = %to, "send to unconnected peer dropped"),
        }
    }

    /// Send one message to several peers.
    pub fn multicast(&self, peers: &[ReplicaId], message: &arbor_core::PeerMessage) {
        let frame = Frame::from_message(message);
        for peer in peers {
            self.send(*peer, frame.clone());
        }
    }

    pub fn is_connected(&self, peer: ReplicaId) -> bool {
        self.peers.read().contains_key(&peer)
    }

    pub fn connected_peers(&self) -> Vec<ReplicaId> {
        self.peers.read().keys().copied().collect()
    }

    async fn handle_incoming(self: &Arc<Self>, mut stream: TcpStream) -> Result<(), NetworkError> {
        stream.set_nodelay(true)?;
        let peer = self.handshake(&mut stream).await?;
        self.register(peer, stream);
        Ok(())
    }

    /// Mutual challenge/response authentication. Both sides present their
    /// certificate hash and prove possession of the matching replica key.
    async fn handshake(&self, stream: &mut TcpStream) -> Result<ReplicaId, NetworkError> {
        let work = async {
            let challenge: [u8; 32] = rand::random();

            let mut hello = Vec::with_capacity(4 + 32 + 32);
            hello.extend_from_slice(&HANDSHAKE_MAGIC);
            hello.extend_from_slice(self.cert_hash.as_bytes());
            hello.extend_from_slice(&challenge);
            stream.write_all(&hello).await?;

            let mut peer_hello = [0u8; 4 + 32 + 32];
            stream.read_exact(&mut peer_hello).await?;
            if peer_hello[..4] != HANDSHAKE_MAGIC {
                return Err(NetworkError::BadMagic);
            }
            let mut peer_cert = [0u8; 32];
            peer_cert.copy_from_slice(&peer_hello[4..36]);
            let peer_cert = Hash::from_bytes(peer_cert);
            let mut peer_challenge = [0u8; 32];
            peer_challenge.copy_from_slice(&peer_hello[36..68]);

            // The presented certificate must belong to a known replica.
            let Some(info) = self.replicas.replica_by_cert(&peer_cert) else {
                return Err(NetworkError::UnknownCertificate);
            };
            let peer_id = info.id;
            let peer_key = info.public_key.clone();

            let answer = self.key.sign(&channel_message(&peer_challenge));
            stream.write_all(&answer.to_bytes()).await?;

            let mut peer_answer = [0u8; 64];
            stream.read_exact(&mut peer_answer).await?;
            let peer_signature = arbor_types::Signature::from_bytes(&peer_answer);
            if !peer_key.verify(&channel_message(&challenge), &peer_signature) {
                return Err(NetworkError::BadChallengeSignature);
            }
            Ok(peer_id)
        };
        tokio::time::timeout(self.config.handshake_timeout, work)
            .await
            .map_err(|_| NetworkError::HandshakeTimeout)?
    }

    /// Adopt an authenticated connection: one writer and one reader task.
    /// A simultaneous dial from both ends keeps whichever connection
    /// registered first.
    fn register(self: &Arc<Self>, peer: ReplicaId, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut peers = self.peers.write();
            if peers.contains_key(&peer) {
                debug!(%peer, "duplicate connection dropped");
                return;
            }
            peers.insert(peer, tx);
        }
        info!(replica = %self.local, %peer, "peer connected");

        let writer_net = self.clone();
        tokio::spawn(async move {
            writer_net.write_loop(peer, write_half, rx).await;
        });
        let reader_net = self.clone();
        tokio::spawn(async move {
            reader_net.read_loop(peer, read_half).await;
        });
    }

    async fn write_loop(
        self: Arc<Self>,
        peer: ReplicaId,
        mut half: OwnedWriteHalf,
        mut rx: mpsc::UnboundedReceiver<Frame>,
    ) {
        while let Some(frame) = rx.recv().await {
            if let Err(error) = half.write_all(&frame.to_wire()).await {
                warn!(%peer, %error, "write failed, closing connection");
                break;
            }
        }
        self.peers.write().remove(&peer);
    }

    async fn read_loop(self: Arc<Self>, peer: ReplicaId, mut half: OwnedReadHalf) {
        loop {
            let mut len_bytes = [0u8; 4];
            if half.read_exact(&mut len_bytes).await.is_err() {
                debug!(%peer, "connection closed");
                break;
            }
            let len = u32::from_le_bytes(len_bytes);
            if len == 0 || len > MAX_FRAME_LEN {
                warn!(%peer, len, "malformed frame length, closing connection");
                break;
            }
            let mut buf = vec![0u8; len as usize];
            if let Err(error) = half.read_exact(&mut buf).await {
                warn!(%peer, %error, "truncated frame, closing connection");
                break;
            }
            let frame = Frame {
                opcode: buf[0],
                payload: buf.split_off(1),
            };
            if self.inbound_tx.send((peer, frame)).await.is_err() {
                break;
            }
        }
        self.peers.write().remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::PeerMessage;
    use arbor_types::{KeyPair, ReplicaInfo};

    fn keypair(i: u16, salt: u8) -> KeyPair {
        KeyPair::from_seed(&[i as u8 + salt + 1; 32])
    }

    fn replica_set(n: u16, salt: u8) -> Arc<ReplicaSet> {
        Arc::new(ReplicaSet::new(
            (0..n)
                .map(|i| {
                    let key = keypair(i, salt);
                    ReplicaInfo {
                        id: ReplicaId(i),
                        public_key: key.public_key(),
                        address: "127.0.0.1:0".parse().unwrap(),
                        cert_hash: Hash::digest(&key.public_key().to_bytes()),
                    }
                })
                .collect(),
        ))
    }

    #[tokio::test]
    async fn frames_flow_between_authenticated_peers() {
        let replicas = replica_set(2, 0);
        let (net0, _rx0, _addr0) = PeerNetwork::spawn(
            NetworkConfig::default(),
            ReplicaId(0),
            keypair(0, 0),
            replicas.clone(),
        )
        .await
        .unwrap();
        let (_net1, mut rx1, addr1) = PeerNetwork::spawn(
            NetworkConfig::default(),
            ReplicaId(1),
            keypair(1, 0),
            replicas.clone(),
        )
        .await
        .unwrap();

        net0.connect(ReplicaId(1), addr1).await.unwrap();

        let message = PeerMessage::RequestBlocks(vec![Hash::digest(b"blk")]);
        net0.send(ReplicaId(1), Frame::from_message(&message));

        let (from, frame) = tokio::time::timeout(Duration::from_secs(5), rx1.recv())
            .await
            .expect("timeout")
            .expect("channel open");
        assert_eq!(from, ReplicaId(0));
        assert_eq!(frame.parse().unwrap(), message);
    }

    #[tokio::test]
    async fn stranger_certificates_are_rejected() {
        let replicas = replica_set(2, 0);
        let (net0, mut rx0, addr0) = PeerNetwork::spawn(
            NetworkConfig::default(),
            ReplicaId(0),
            keypair(0, 0),
            replicas.clone(),
        )
        .await
        .unwrap();

        // Same shape, different keys: the presented certificate hash is
        // not in net0's allow-list.
        let strangers = replica_set(2, 100);
        let (rogue, _rogue_rx, _) = PeerNetwork::spawn(
            NetworkConfig::default(),
            ReplicaId(1),
            keypair(1, 100),
            strangers,
        )
        .await
        .unwrap();

        assert!(rogue.connect(ReplicaId(0), addr0).await.is_err());
        assert!(net0.connected_peers().is_empty());

        // Nothing was delivered on the victim's inbound stream.
        let quiet =
            tokio::time::timeout(Duration::from_millis(200), rx0.recv()).await;
        assert!(quiet.is_err());
    }
}
