//! Server network layer handling UDP communications and the main event loop

use crate::client_manager::{ClientManager, ConnectionState};
use crate::game::{Collection, GameState, MoveOutcome, Player};
use crate::services::{resolve_join, JoinResolution, RankingClient, ServiceError, SessionClient};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use rand::Rng;
use rpc::RpcConfig;
use shared::{
    get_timestamp, Packet, Position, RankingEntry, RankingEvent, SessionId, Standings,
    CLIENT_TIMEOUT, COLLECTIBLE_LIFETIME, EXPIRY_CHECK_INTERVAL, LEADERBOARD_SIZE,
    MAX_PACKET_SIZE, SPAWN_INTERVAL,
};
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, MissedTickBehavior};

const MAX_NAME_LEN: usize = 20;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub session_addr: String,
    pub ranking_addr: String,
    pub max_clients: usize,
    pub client_timeout: Duration,
    pub spawn_interval: Duration,
    pub expiry_check_interval: Duration,
    pub collectible_lifetime: Duration,
    pub rpc: RpcConfig,
    /// Fixed RNG seed for reproducible spawns.
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            session_addr: "127.0.0.1:3002".to_string(),
            ranking_addr: "127.0.0.1:3001".to_string(),
            max_clients: 64,
            client_timeout: CLIENT_TIMEOUT,
            spawn_interval: SPAWN_INTERVAL,
            expiry_check_interval: EXPIRY_CHECK_INTERVAL,
            collectible_lifetime: COLLECTIBLE_LIFETIME,
            rpc: RpcConfig::default(),
            seed: None,
        }
    }
}

/// Snapshot of server health, answered by the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub players: usize,
    pub collectibles: usize,
    pub connections: usize,
    pub session_connected: bool,
    pub ranking_connected: bool,
}

/// Messages sent from network and service tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
    },
    JoinResolved {
        client_id: u32,
        addr: SocketAddr,
        name: String,
        spawn: Position,
        resolution: JoinResolution,
    },
    StandingsReceived(Standings),
    /// An awaited ranking call failed; fall back to a local leaderboard.
    RankingUnavailable,
    StatusRequest(oneshot::Sender<ServerStatus>),
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

/// Main server coordinating networking, game rules and the auxiliary services
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    config: ServerConfig,

    sessions: SessionClient,
    ranking: RankingClient,
    ranking_events: Option<mpsc::UnboundedReceiver<RankingEvent>>,
    leaderboard: Vec<RankingEntry>,
    /// Names with a join in flight, so two connections cannot claim one name.
    joining_names: HashSet<String>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let sessions = SessionClient::connect(&config.session_addr, config.rpc);
        let (ranking, ranking_events) = RankingClient::connect(&config.ranking_addr, config.rpc);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let game_state = match config.seed {
            Some(seed) => GameState::with_seed(seed),
            None => GameState::new(),
        };

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            game_state,
            config,
            sessions,
            ranking,
            ranking_events: Some(ranking_events),
            leaderboard: Vec::new(),
            joining_names: HashSet::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Channel into the main loop, for status queries and shutdown.
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping malformed packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Spawns task that feeds standings pushed by the ranking service into the loop
    fn spawn_ranking_forwarder(&mut self) {
        let Some(mut events) = self.ranking_events.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            while let Some(RankingEvent::Standings(standings)) = events.recv().await {
                if server_tx
                    .send(ServerMessage::StandingsReceived(standings))
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Runs an awaited ranking call off the loop; failures come back as
    /// [`ServerMessage::RankingUnavailable`].
    fn spawn_ranking_call<F>(&self, what: &'static str, call: F)
    where
        F: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = call.await {
                warn!("Ranking {} failed: {}", what, e);
                let _ = server_tx.send(ServerMessage::RankingUnavailable);
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet: packet.clone(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn broadcast_packet(&self, packet: &Packet, exclude: Option<u32>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket {
            packet: packet.clone(),
            exclude,
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let client_id = self.clients.write().await.touch(addr);

        match packet {
            Packet::Join { name, resume_token } => {
                self.handle_join(addr, client_id, name, resume_token).await;
            }

            Packet::Move { .. } | Packet::Collect { .. } | Packet::Heartbeat
                if client_id.is_none() =>
            {
                debug!("Gameplay packet from unknown address {}", addr);
                self.send_packet(&Packet::NotJoined, addr).await;
            }

            Packet::Move { position } => {
                if let Some(client_id) = self.active_client(client_id).await {
                    self.handle_move(client_id, addr, position).await;
                }
            }

            Packet::Collect { collectible_id } => {
                if let Some(client_id) = self.active_client(client_id).await {
                    if let Some(collection) = self.game_state.try_collect(client_id, collectible_id)
                    {
                        self.publish_collection(collection).await;
                    }
                }
            }

            Packet::Heartbeat => {}

            Packet::Leave => {
                if let Some(client_id) = client_id {
                    self.disconnect_client(client_id, "left").await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn active_client(&self, client_id: Option<u32>) -> Option<u32> {
        let client_id = client_id?;
        let clients = self.clients.read().await;
        (clients.state(&client_id) == ConnectionState::Active).then_some(client_id)
    }

    async fn handle_join(
        &mut self,
        addr: SocketAddr,
        existing: Option<u32>,
        name: String,
        resume_token: Option<SessionId>,
    ) {
        if let Some(existing_id) = existing {
            let state = self.clients.read().await.state(&existing_id);
            if state == ConnectionState::Joining {
                debug!("Ignoring repeated join from {} while joining", addr);
                return;
            }
            // A fresh join from a live address means the client restarted
            info!("Replacing existing client {} from {}", existing_id, addr);
            self.disconnect_client(existing_id, "rejoined").await;
        }

        let name = normalize_name(&name);

        if self.game_state.is_name_taken(&name) || self.joining_names.contains(&name) {
            info!("Rejecting join from {}: {} is already playing", addr, name);
            let response = Packet::Rejected {
                reason: format!("{} is already playing", name),
            };
            self.send_packet(&response, addr).await;
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };
        let Some(client_id) = client_id else {
            let response = Packet::Rejected {
                reason: "Server full".to_string(),
            };
            self.send_packet(&response, addr).await;
            return;
        };

        self.joining_names.insert(name.clone());
        let spawn = self.game_state.random_spawn();
        let sessions = self.sessions.clone();
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let resolution = resolve_join(&sessions, client_id, &name, resume_token, spawn).await;
            let _ = server_tx.send(ServerMessage::JoinResolved {
                client_id,
                addr,
                name,
                spawn,
                resolution,
            });
        });
    }

    async fn finish_join(
        &mut self,
        client_id: u32,
        addr: SocketAddr,
        name: String,
        spawn: Position,
        resolution: JoinResolution,
    ) {
        self.joining_names.remove(&name);

        let activated = self.clients.write().await.activate(&client_id);
        if !activated {
            info!(
                "Client {} went away before joining completed, releasing session",
                client_id
            );
            self.sessions.disconnect(resolution.session_id);
            return;
        }

        let (position, score) = match &resolution.restored {
            Some(saved) => (
                saved.position.filter(|p| p.in_bounds()).unwrap_or(spawn),
                saved.score,
            ),
            None => (spawn, 0),
        };

        let player = Player::new(
            client_id,
            name.clone(),
            position,
            score,
            resolution.session_id,
            get_timestamp(),
        );
        let info = player.info();
        self.game_state.add_player(player);

        let ranking = self.ranking.clone();
        let session_id = resolution.session_id;
        let is_reconnection = resolution.is_reconnection;
        let ranking_name = name.clone();
        self.spawn_ranking_call("join", async move {
            if is_reconnection {
                match ranking.online(session_id).await {
                    Ok(true) => return Ok(()),
                    // Unknown to the aggregator, register with the full record
                    Ok(false) => {}
                    Err(e) => return Err(e),
                }
            }
            ranking.update(session_id, &ranking_name, score).await
        });

        if !self.ranking.is_connected() {
            self.leaderboard = self.game_state.local_leaderboard(LEADERBOARD_SIZE);
        }

        let snapshot = Packet::WorldSnapshot {
            player: info.clone(),
            players: self.game_state.player_infos(),
            collectibles: self.game_state.collectibles.values().cloned().collect(),
            leaderboard: self.leaderboard.clone(),
            session_token: resolution.session_id,
            is_reconnection,
        };
        self.send_packet(&snapshot, addr).await;
        self.broadcast_packet(&Packet::PlayerJoined { player: info }, Some(client_id))
            .await;

        info!(
            "{} {} as player {} with score {}",
            name,
            if is_reconnection { "reconnected" } else { "joined" },
            client_id,
            score
        );
    }

    async fn handle_move(&mut self, client_id: u32, addr: SocketAddr, target: Position) {
        match self
            .game_state
            .validate_move(client_id, target, get_timestamp())
        {
            MoveOutcome::Rejected(reason) => {
                debug!("Dropped move from player {}: {}", client_id, reason);
                return;
            }
            MoveOutcome::Accepted { position, persist } => {
                let moved = Packet::PlayerMoved {
                    id: client_id,
                    position,
                };
                self.broadcast_packet(&moved, Some(client_id)).await;

                if persist {
                    if let Some(player) = self.game_state.player(&client_id) {
                        self.sessions
                            .update(player.session_id, player.position, player.score);
                    }
                }
            }
            MoveOutcome::Corrected {
                position,
                requested,
            } => {
                warn!(
                    "Player {} moved too fast toward ({:.0}, {:.0}), corrected to ({:.0}, {:.0})",
                    client_id, requested.x, requested.y, position.x, position.y
                );
                let correction = Packet::PositionCorrected {
                    position,
                    reason: "speed limit exceeded".to_string(),
                };
                self.send_packet(&correction, addr).await;

                let moved = Packet::PlayerMoved {
                    id: client_id,
                    position,
                };
                self.broadcast_packet(&moved, Some(client_id)).await;
            }
        }

        for collection in self.game_state.collect_nearby(client_id) {
            self.publish_collection(collection).await;
        }
    }

    async fn publish_collection(&mut self, collection: Collection) {
        let packet = Packet::Collected {
            collectible_id: collection.collectible_id,
            player_id: collection.player_id,
            new_score: collection.new_score,
        };
        self.broadcast_packet(&packet, None).await;

        if let Some(player) = self.game_state.player(&collection.player_id) {
            self.sessions
                .update(player.session_id, player.position, player.score);

            let ranking = self.ranking.clone();
            let (session_id, name, score) = (player.session_id, player.name.clone(), player.score);
            self.spawn_ranking_call("score update", async move {
                ranking.update(session_id, &name, score).await
            });
        }
    }

    async fn disconnect_client(&mut self, client_id: u32, reason: &str) {
        self.clients.write().await.remove_client(&client_id);
        self.drop_player(client_id, reason).await;
    }

    /// Removes the player of an already-removed connection from the world.
    async fn drop_player(&mut self, client_id: u32, reason: &str) {
        let Some(player) = self.game_state.remove_player(&client_id) else {
            return;
        };
        info!("{} left ({})", player.name, reason);

        self.sessions.disconnect(player.session_id);
        let ranking = self.ranking.clone();
        let session_id = player.session_id;
        self.spawn_ranking_call("offline", async move {
            ranking.offline(session_id).await.map(|_| ())
        });

        self.broadcast_packet(&Packet::PlayerLeft { id: client_id }, None)
            .await;
    }

    async fn refresh_local_leaderboard(&mut self) {
        self.leaderboard = self.game_state.local_leaderboard(LEADERBOARD_SIZE);
        debug!(
            "Using local leaderboard with {} entries",
            self.leaderboard.len()
        );
        let packet = Packet::LeaderboardUpdated {
            entries: self.leaderboard.clone(),
        };
        self.broadcast_packet(&packet, None).await;
    }

    async fn apply_standings(&mut self, standings: Standings) {
        if standings.online == self.leaderboard {
            return;
        }
        self.leaderboard = standings.online;
        let packet = Packet::LeaderboardUpdated {
            entries: self.leaderboard.clone(),
        };
        self.broadcast_packet(&packet, None).await;
    }

    async fn status(&self) -> ServerStatus {
        ServerStatus {
            players: self.game_state.players.len(),
            collectibles: self.game_state.collectibles.len(),
            connections: self.clients.read().await.len(),
            session_connected: self.sessions.is_connected(),
            ranking_connected: self.ranking.is_connected(),
        }
    }

    async fn spawn_tick(&mut self) {
        if let Some(collectible) = self.game_state.spawn_collectible(get_timestamp()) {
            self.broadcast_packet(&Packet::CollectibleSpawned { collectible }, None)
                .await;
        }
    }

    async fn expiry_tick(&mut self) {
        let lifetime_ms = self.config.collectible_lifetime.as_millis() as u64;
        let expired = self
            .game_state
            .expire_collectibles(get_timestamp(), lifetime_ms);

        if !expired.is_empty() {
            debug!("Expired {} collectibles", expired.len());
        }
        for id in expired {
            self.broadcast_packet(&Packet::CollectibleExpired { id }, None)
                .await;
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;
        self.spawn_ranking_forwarder();

        let seeded = self.game_state.seed_collectibles(get_timestamp());
        info!("Seeded {} collectibles", seeded.len());

        let mut spawn_interval = interval(self.config.spawn_interval);
        let mut expiry_interval = interval(self.config.expiry_check_interval);
        spawn_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        expiry_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        spawn_interval.tick().await;
        expiry_interval.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.drop_player(client_id, "timed out").await;
                        },
                        Some(ServerMessage::JoinResolved { client_id, addr, name, spawn, resolution }) => {
                            self.finish_join(client_id, addr, name, spawn, resolution).await;
                        },
                        Some(ServerMessage::StandingsReceived(standings)) => {
                            self.apply_standings(standings).await;
                        },
                        Some(ServerMessage::RankingUnavailable) => {
                            self.refresh_local_leaderboard().await;
                        },
                        Some(ServerMessage::StatusRequest(reply)) => {
                            let _ = reply.send(self.status().await);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = spawn_interval.tick() => {
                    self.spawn_tick().await;
                },

                _ = expiry_interval.tick() => {
                    self.expiry_tick().await;
                },
            }
        }

        Ok(())
    }
}

/// Trims the requested name; blank names get a generated one.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return format!("Bunny{}", rand::thread_rng().gen_range(0..1000));
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}
