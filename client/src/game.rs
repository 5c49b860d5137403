//! Client-side prediction and the mirrored world
//!
//! The local player moves immediately toward the chosen destination; the
//! server's view arrives later and only overrides the prediction when the two
//! have drifted too far apart. Everything else on screen is a mirror of what
//! the server has broadcast.

use log::{debug, info, warn};
use shared::{
    Collectible, Packet, PlayerInfo, Position, RankingEntry, SessionId, ARRIVAL_EPSILON,
    COLLECT_RADIUS, HEARTBEAT_INTERVAL, MOVE_SEND_INTERVAL, PREDICTION_HISTORY, PREDICTION_STEP,
    RECONCILE_THRESHOLD,
};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// How often an unanswered join is repeated.
pub const JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// A collect the server never confirmed is given up after this long.
pub const COLLECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionSample {
    pub sequence: u32,
    pub position: Position,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct LocalCollectible {
    pub collectible: Collectible,
    /// Set when a collect was sent and not yet confirmed.
    pub collecting_since: Option<u64>,
}

impl LocalCollectible {
    fn new(collectible: Collectible) -> Self {
        Self {
            collectible,
            collecting_since: None,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting_since.is_some()
    }
}

pub struct ClientGameState {
    pub name: String,
    pub player_id: Option<u32>,
    pub session_token: Option<SessionId>,

    pub predicted: Position,
    pub destination: Option<Position>,
    pub confirmed_score: u32,
    pub corrections: u32,

    /// Everyone except the local player.
    pub players: BTreeMap<u32, PlayerInfo>,
    pub collectibles: BTreeMap<u32, LocalCollectible>,
    pub leaderboard: Vec<RankingEntry>,
    pub last_rejection: Option<String>,

    history: VecDeque<PredictionSample>,
    next_sequence: u32,
    last_move_sent: Option<(u64, Position)>,
    last_join_sent: Option<u64>,
    last_heartbeat: u64,
}

impl ClientGameState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            player_id: None,
            session_token: None,
            predicted: Position::new(0.0, 0.0),
            destination: None,
            confirmed_score: 0,
            corrections: 0,
            players: BTreeMap::new(),
            collectibles: BTreeMap::new(),
            leaderboard: Vec::new(),
            last_rejection: None,
            history: VecDeque::with_capacity(PREDICTION_HISTORY),
            next_sequence: 1,
            last_move_sent: None,
            last_join_sent: None,
            last_heartbeat: 0,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.player_id.is_some()
    }

    pub fn history(&self) -> &VecDeque<PredictionSample> {
        &self.history
    }

    pub fn set_destination(&mut self, target: Position) {
        if !target.is_finite() {
            return;
        }
        self.destination = Some(target.clamped());
    }

    /// Forgets the current player so the next tick joins again, carrying the
    /// session token.
    pub fn rejoin(&mut self) {
        info!("Rejoining as {}", self.name);
        self.player_id = None;
        self.destination = None;
        self.last_join_sent = None;
    }

    /// Advances the prediction by one frame. Returns the packets to send.
    pub fn tick(&mut self, now: u64) -> Vec<Packet> {
        let mut outgoing = Vec::new();

        if !self.is_joined() {
            let due = self
                .last_join_sent
                .map_or(true, |sent| now.saturating_sub(sent) >= millis(JOIN_RETRY_INTERVAL));
            if due {
                self.last_join_sent = Some(now);
                outgoing.push(Packet::Join {
                    name: self.name.clone(),
                    resume_token: self.session_token,
                });
            }
            return outgoing;
        }

        if let Some(packet) = self.advance(now) {
            outgoing.push(packet);
        }
        if let Some(packet) = self.speculative_collect(now) {
            outgoing.push(packet);
        }

        if outgoing.is_empty() && now.saturating_sub(self.last_heartbeat) >= millis(HEARTBEAT_INTERVAL)
        {
            outgoing.push(Packet::Heartbeat);
        }
        if !outgoing.is_empty() {
            self.last_heartbeat = now;
        }

        outgoing
    }

    fn advance(&mut self, now: u64) -> Option<Packet> {
        let destination = self.destination?;

        if self.predicted.distance(&destination) < ARRIVAL_EPSILON {
            self.destination = None;
            // Make sure the server ends up where we stopped
            let unsent = self
                .last_move_sent
                .map_or(true, |(_, sent)| sent != self.predicted);
            return unsent.then(|| self.send_move(now));
        }

        self.predicted = self
            .predicted
            .step_toward(&destination, PREDICTION_STEP)
            .clamped();
        self.record(now);

        let throttled = self
            .last_move_sent
            .is_some_and(|(sent, _)| now.saturating_sub(sent) < millis(MOVE_SEND_INTERVAL));
        (!throttled).then(|| self.send_move(now))
    }

    fn send_move(&mut self, now: u64) -> Packet {
        self.last_move_sent = Some((now, self.predicted));
        Packet::Move {
            position: self.predicted,
        }
    }

    fn record(&mut self, now: u64) {
        if self.history.len() >= PREDICTION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(PredictionSample {
            sequence: self.next_sequence,
            position: self.predicted,
            timestamp: now,
        });
        self.next_sequence += 1;
    }

    fn speculative_collect(&mut self, now: u64) -> Option<Packet> {
        let predicted = self.predicted;

        for local in self.collectibles.values_mut() {
            if let Some(since) = local.collecting_since {
                if now.saturating_sub(since) >= millis(COLLECT_RETRY_INTERVAL) {
                    local.collecting_since = None;
                }
            }
        }

        let local = self.collectibles.values_mut().find(|local| {
            !local.is_collecting() && local.collectible.position.distance(&predicted) <= COLLECT_RADIUS
        })?;
        local.collecting_since = Some(now);

        debug!("Collecting {} speculatively", local.collectible.id);
        Some(Packet::Collect {
            collectible_id: local.collectible.id,
        })
    }

    /// Snaps the prediction to the server's position when they disagree by
    /// more than the threshold. Returns whether a correction happened.
    pub fn reconcile(&mut self, server_position: Position) -> bool {
        let error = self.predicted.distance(&server_position);
        if error <= RECONCILE_THRESHOLD {
            return false;
        }

        debug!("Prediction off by {:.1}, snapping to server", error);
        self.predicted = server_position;
        self.corrections += 1;
        true
    }

    /// Confirmed score plus everything we are still waiting on.
    pub fn speculative_score(&self) -> u32 {
        self.confirmed_score
            + self
                .collectibles
                .values()
                .filter(|local| local.is_collecting())
                .map(|local| local.collectible.points)
                .sum::<u32>()
    }

    pub fn score_label(&self) -> String {
        if self.collectibles.values().any(LocalCollectible::is_collecting) {
            format!("{}*", self.speculative_score())
        } else {
            self.confirmed_score.to_string()
        }
    }

    pub fn apply_packet(&mut self, packet: Packet) {
        match packet {
            Packet::WorldSnapshot {
                player,
                players,
                collectibles,
                leaderboard,
                session_token,
                is_reconnection,
            } => {
                info!(
                    "{} as {} (id {}, score {})",
                    if is_reconnection { "Reconnected" } else { "Joined" },
                    player.name,
                    player.id,
                    player.score
                );
                self.player_id = Some(player.id);
                self.name = player.name;
                self.session_token = Some(session_token);
                self.predicted = player.position;
                self.confirmed_score = player.score;
                self.destination = None;
                self.last_move_sent = None;
                self.last_rejection = None;
                self.history.clear();

                self.players = players
                    .into_iter()
                    .filter(|p| p.id != player.id)
                    .map(|p| (p.id, p))
                    .collect();
                self.collectibles = collectibles
                    .into_iter()
                    .map(|c| (c.id, LocalCollectible::new(c)))
                    .collect();
                self.leaderboard = leaderboard;
            }

            Packet::PlayerJoined { player } => {
                if Some(player.id) != self.player_id {
                    self.players.insert(player.id, player);
                }
            }

            Packet::PlayerLeft { id } => {
                self.players.remove(&id);
            }

            Packet::PlayerMoved { id, position } => {
                if Some(id) == self.player_id {
                    self.reconcile(position);
                } else if let Some(player) = self.players.get_mut(&id) {
                    player.position = position;
                }
            }

            Packet::PositionCorrected { position, reason } => {
                debug!("Server corrected our position: {}", reason);
                self.reconcile(position);
            }

            Packet::Collected {
                collectible_id,
                player_id,
                new_score,
            } => {
                self.collectibles.remove(&collectible_id);
                if Some(player_id) == self.player_id {
                    self.confirmed_score = new_score;
                } else if let Some(player) = self.players.get_mut(&player_id) {
                    player.score = new_score;
                }
            }

            Packet::CollectibleSpawned { collectible } => {
                self.collectibles
                    .insert(collectible.id, LocalCollectible::new(collectible));
            }

            Packet::CollectibleExpired { id } => {
                self.collectibles.remove(&id);
            }

            Packet::LeaderboardUpdated { entries } => {
                self.leaderboard = entries;
            }

            Packet::Rejected { reason } => {
                warn!("Join rejected: {}", reason);
                self.last_rejection = Some(reason);
            }

            Packet::NotJoined => {
                // Stale replies can trail a fresh join; only act while we think we're in
                if self.is_joined() {
                    warn!("Server dropped our connection, joining again");
                    self.rejoin();
                }
            }

            other => {
                warn!("Unexpected packet from server: {:?}", other);
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
