//! libp2p Session Transport
//!
//! Backs a [`SessionChannel`] with a gossipsub topic per session code:
//! - mDNS for discovering participants on the local network
//! - TCP + QUIC transports
//! - identify and ping for connection bookkeeping and keep-alive

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::{
    gossipsub, identify, identity, mdns, noise, ping, swarm::NetworkBehaviour, swarm::SwarmEvent,
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::channel::{ChannelError, SessionChannel, INBOUND_CAPACITY};
use super::session_code::SessionCode;

/// Gossip topic prefix shared by all sessions
const DEFAULT_TOPIC_PREFIX: &str = "watch-together";

/// Protocol string announced via identify
const PROTOCOL_VERSION: &str = "/watch-together/1.0.0";

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Whether to discover peers on the local network via mDNS
    pub enable_mdns: bool,
    /// Multiaddrs to listen on
    pub listen_addresses: Vec<String>,
    /// Prefix for per-session gossip topics
    pub topic_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enable_mdns: true,
            listen_addresses: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("libp2p error: {0}")]
    Libp2p(String),

    #[error("Network task closed")]
    TaskClosed,
}

/// Combined network behaviour
#[derive(NetworkBehaviour)]
pub struct TogetherBehaviour {
    ping: ping::Behaviour,
    mdns: Toggle<mdns::tokio::Behaviour>,
    identify: identify::Behaviour,
    gossipsub: gossipsub::Behaviour,
}

/// Events emitted by the network task
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// Network is listening
    Ready { peer_id: String },
    /// A participant subscribed to our session topic
    PeerSubscribed { peer_id: String },
    /// A participant left our session topic
    PeerUnsubscribed { peer_id: String },
    /// Error occurred
    Error(String),
}

/// Commands sent to the network task
#[derive(Debug)]
enum NetworkCommand {
    /// Subscribe to the topic for a session
    OpenSession { code: SessionCode },
    /// Publish a payload on the current session topic
    Publish {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Shutdown,
}

/// Handle to the running network; doubles as the session channel
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    inbound: broadcast::Sender<Vec<u8>>,
    pub local_peer_id: String,
}

impl NetworkHandle {
    /// Join the gossip topic for `code`
    pub fn open_session(&self, code: &SessionCode) -> Result<(), NetworkError> {
        self.command_tx
            .send(NetworkCommand::OpenSession { code: code.clone() })
            .map_err(|_| NetworkError::TaskClosed)
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

impl SessionChannel for NetworkHandle {
    fn send(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<(), ChannelError>> {
        let command_tx = self.command_tx.clone();
        async move {
            let (reply, result) = oneshot::channel();
            command_tx
                .send(NetworkCommand::Publish { payload, reply })
                .map_err(|_| ChannelError::Closed)?;
            result.await.map_err(|_| ChannelError::Closed)?
        }
        .boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inbound.subscribe()
    }
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    local_peer_id: PeerId,
    keypair: identity::Keypair,
    config: NetworkConfig,
    /// Current session topic (if in a session)
    session_topic: Option<gossipsub::IdentTopic>,
    /// Peers subscribed to our session topic
    session_peers: HashSet<PeerId>,
}

impl NetworkManager {
    /// Create a new network manager with default config
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    /// Create a new network manager with custom config
    pub fn with_config(config: NetworkConfig) -> Self {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        info!("Local peer ID: {}", local_peer_id);

        Self {
            local_peer_id,
            keypair,
            config,
            session_topic: None,
            session_peers: HashSet::new(),
        }
    }

    /// Start the network and return a handle for communication.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        self,
    ) -> Result<(NetworkHandle, mpsc::UnboundedReceiver<NetworkEvent>), NetworkError> {
        let swarm = self.create_swarm()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        let handle = NetworkHandle {
            command_tx,
            inbound: inbound.clone(),
            local_peer_id: self.local_peer_id.to_string(),
        };

        tokio::spawn(self.run(swarm, event_tx, command_rx, inbound));

        Ok((handle, event_rx))
    }

    fn create_swarm(&self) -> Result<Swarm<TogetherBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_quic()
            .with_behaviour(|keypair| {
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(
                        mdns::tokio::Behaviour::new(
                            mdns::Config::default(),
                            keypair.public().to_peer_id(),
                        )
                        .map_err(|e| e.to_string())?,
                    )
                } else {
                    None
                };

                // Tuned for a handful of participants.
                // Must satisfy: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .mesh_outbound_min(0)
                    .mesh_n_low(1)
                    .mesh_n(3)
                    .mesh_n_high(6)
                    .gossip_lazy(3)
                    .build()
                    .map_err(|e| e.to_string())?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                    gossipsub_config,
                )
                .map_err(|e| e.to_string())?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    PROTOCOL_VERSION.into(),
                    keypair.public(),
                ));

                Ok(TogetherBehaviour {
                    ping,
                    mdns: Toggle::from(mdns),
                    identify,
                    gossipsub,
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
            .build();

        Ok(swarm)
    }

    async fn run(
        mut self,
        mut swarm: Swarm<TogetherBehaviour>,
        event_tx: mpsc::UnboundedSender<NetworkEvent>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
        inbound: broadcast::Sender<Vec<u8>>,
    ) {
        for addr_str in &self.config.listen_addresses {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => match swarm.listen_on(addr) {
                    Ok(id) => info!("Listener started on {}: {:?}", addr_str, id),
                    Err(e) => warn!("Failed to listen on {}: {:?}", addr_str, e),
                },
                Err(e) => warn!("Invalid listen address {}: {}", addr_str, e),
            }
        }

        let _ = event_tx.send(NetworkEvent::Ready {
            peer_id: self.local_peer_id.to_string(),
        });

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(&mut swarm, event, &event_tx, &inbound);
                }
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("All network handles dropped");
                        break;
                    };
                    match cmd {
                        NetworkCommand::OpenSession { code } => {
                            if let Err(e) = self.open_session(&mut swarm, &code) {
                                let _ = event_tx.send(NetworkEvent::Error(e.to_string()));
                            }
                        }
                        NetworkCommand::Publish { payload, reply } => {
                            let _ = reply.send(self.publish(&mut swarm, payload));
                        }
                        NetworkCommand::Shutdown => {
                            info!("Network shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn open_session(
        &mut self,
        swarm: &mut Swarm<TogetherBehaviour>,
        code: &SessionCode,
    ) -> Result<(), NetworkError> {
        if self.session_topic.is_some() {
            return Err(NetworkError::AlreadyInSession);
        }

        let topic = gossipsub::IdentTopic::new(code.topic(&self.config.topic_prefix));
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        info!("Subscribed to session {}", code);
        let hash = topic.hash();
        self.session_peers = swarm
            .behaviour()
            .gossipsub
            .all_peers()
            .filter(|(_, topics)| topics.contains(&&hash))
            .map(|(peer_id, _)| *peer_id)
            .collect();
        self.session_topic = Some(topic);
        Ok(())
    }

    fn publish(
        &mut self,
        swarm: &mut Swarm<TogetherBehaviour>,
        payload: Vec<u8>,
    ) -> Result<(), ChannelError> {
        let topic = self.session_topic.clone().ok_or(ChannelError::NotInSession)?;
        // Nobody to deliver to yet; joiners are re-announced to on subscribe
        if self.session_peers.is_empty() {
            debug!("No participants in session yet, dropping {} bytes", payload.len());
            return Ok(());
        }
        swarm
            .behaviour_mut()
            .gossipsub
            .publish(topic, payload)
            .map(|_| ())
            .map_err(|e| ChannelError::Publish(e.to_string()))
    }

    fn handle_swarm_event(
        &mut self,
        swarm: &mut Swarm<TogetherBehaviour>,
        event: SwarmEvent<TogetherBehaviourEvent>,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
        inbound: &broadcast::Sender<Vec<u8>>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, self.local_peer_id);
            }

            SwarmEvent::Behaviour(TogetherBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id == self.local_peer_id {
                        continue;
                    }
                    info!("mDNS discovered peer: {} at {}", peer_id, addr);
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    if swarm.dial(addr).is_ok() {
                        debug!("Dialing discovered peer {}", peer_id);
                    }
                }
            }

            SwarmEvent::Behaviour(TogetherBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                }
            }

            SwarmEvent::Behaviour(TogetherBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                debug!(
                    "Received {} bytes from {}",
                    message.data.len(),
                    propagation_source
                );
                // No receivers just means nobody is listening yet
                let _ = inbound.send(message.data);
            }

            SwarmEvent::Behaviour(TogetherBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                if self.is_session_topic(&topic) {
                    info!("Peer {} joined the session", peer_id);
                    self.session_peers.insert(peer_id);
                    let _ = event_tx.send(NetworkEvent::PeerSubscribed {
                        peer_id: peer_id.to_string(),
                    });
                }
            }

            SwarmEvent::Behaviour(TogetherBehaviourEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if self.is_session_topic(&topic) {
                    info!("Peer {} left the session", peer_id);
                    self.session_peers.remove(&peer_id);
                    let _ = event_tx.send(NetworkEvent::PeerUnsubscribed {
                        peer_id: peer_id.to_string(),
                    });
                }
            }

            SwarmEvent::Behaviour(TogetherBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("Identified peer {} running {}", peer_id, info.protocol_version);
            }

            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                info!("Connection established with {} via {:?}", peer_id, endpoint);
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }

            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!("Connection closed with {}", peer_id);
                if self.session_peers.remove(&peer_id) {
                    let _ = event_tx.send(NetworkEvent::PeerUnsubscribed {
                        peer_id: peer_id.to_string(),
                    });
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => match peer_id {
                Some(peer) => warn!("Failed to connect to {}: {}", peer, error),
                None => warn!("Outgoing connection error: {}", error),
            },

            SwarmEvent::ListenerError { listener_id, error } => {
                warn!("Listener {} error: {}", listener_id, error);
            }

            _ => {}
        }
    }

    fn is_session_topic(&self, topic: &gossipsub::TopicHash) -> bool {
        self.session_topic
            .as_ref()
            .is_some_and(|ours| &ours.hash() == topic)
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new()
    }
}
