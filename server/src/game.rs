//! Authoritative world state: live players and collectibles
//!
//! Everything here is synchronous and takes the current time as a parameter,
//! so the rules can be exercised without a network or a clock.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    max_move_distance, Collectible, PlayerInfo, Position, RankingEntry, SessionId, Tier,
    COLLECT_RADIUS, INITIAL_COLLECTIBLES, MAP_HEIGHT, MAP_WIDTH, MAX_COLLECTIBLES,
    PERSIST_EVERY_N_MOVES, PREMIUM_CHANCE, SPAWN_MARGIN,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub position: Position,
    pub score: u32,
    /// Time of the last applied move, in milliseconds.
    pub last_update: u64,
    pub move_count: u32,
    pub session_id: SessionId,
}

impl Player {
    pub fn new(
        id: u32,
        name: String,
        position: Position,
        score: u32,
        session_id: SessionId,
        now: u64,
    ) -> Self {
        Self {
            id,
            name,
            position,
            score,
            last_update: now,
            move_count: 0,
            session_id,
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            position: self.position,
            score: self.score,
        }
    }
}

/// Result of checking a movement intent against the speed bound.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Nothing changed.
    Rejected(&'static str),
    /// The target was applied as requested.
    Accepted { position: Position, persist: bool },
    /// The target was too far; the player was moved as far as allowed instead.
    Corrected {
        position: Position,
        requested: Position,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub collectible_id: u32,
    pub player_id: u32,
    pub points: u32,
    pub new_score: u32,
}

pub struct GameState {
    pub players: BTreeMap<u32, Player>,
    pub collectibles: BTreeMap<u32, Collectible>,
    next_collectible_id: u32,
    rng: StdRng,
}

impl GameState {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic spawns, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            players: BTreeMap::new(),
            collectibles: BTreeMap::new(),
            next_collectible_id: 1,
            rng,
        }
    }

    /// Uniformly random point at least `SPAWN_MARGIN` away from every edge.
    pub fn random_spawn(&mut self) -> Position {
        Position::new(
            self.rng.gen_range(SPAWN_MARGIN..=MAP_WIDTH - SPAWN_MARGIN),
            self.rng.gen_range(SPAWN_MARGIN..=MAP_HEIGHT - SPAWN_MARGIN),
        )
    }

    pub fn add_player(&mut self, player: Player) {
        info!(
            "Added player {} ({}) at ({:.0}, {:.0}) with score {}",
            player.id, player.name, player.position.x, player.position.y, player.score
        );
        self.players.insert(player.id, player);
    }

    pub fn remove_player(&mut self, player_id: &u32) -> Option<Player> {
        let player = self.players.remove(player_id)?;
        info!("Removed player {} ({})", player.id, player.name);
        Some(player)
    }

    pub fn player(&self, player_id: &u32) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.players.values().any(|p| p.name == name)
    }

    pub fn player_infos(&self) -> Vec<PlayerInfo> {
        self.players.values().map(Player::info).collect()
    }

    /// Checks a movement intent and applies it, or its corrected form.
    ///
    /// Targets that are non-finite or off the map are rejected outright.
    /// Targets beyond the speed bound are replaced by the furthest reachable
    /// point in the requested direction.
    pub fn validate_move(&mut self, player_id: u32, target: Position, now: u64) -> MoveOutcome {
        let Some(player) = self.players.get_mut(&player_id) else {
            return MoveOutcome::Rejected("unknown player");
        };

        if !target.is_finite() {
            return MoveOutcome::Rejected("non-finite position");
        }
        if !target.in_bounds() {
            return MoveOutcome::Rejected("position out of bounds");
        }

        let elapsed = now.saturating_sub(player.last_update) as f32 / 1000.0;
        let allowed = max_move_distance(elapsed);
        let distance = player.position.distance(&target);

        if distance <= allowed {
            player.position = target;
            player.last_update = now;
            player.move_count += 1;
            MoveOutcome::Accepted {
                position: target,
                persist: player.move_count % PERSIST_EVERY_N_MOVES == 0,
            }
        } else {
            let corrected = player.position.step_toward(&target, allowed).clamped();
            debug!(
                "Player {} moved {:.1} in {:.3}s (allowed {:.1}), correcting",
                player_id, distance, elapsed, allowed
            );
            player.position = corrected;
            player.last_update = now;
            MoveOutcome::Corrected {
                position: corrected,
                requested: target,
            }
        }
    }

    /// Explicit collection attempt. First caller wins; the collectible is gone
    /// afterwards, so a second attempt simply finds nothing.
    pub fn try_collect(&mut self, player_id: u32, collectible_id: u32) -> Option<Collection> {
        let player = self.players.get(&player_id)?;
        let collectible = self.collectibles.get(&collectible_id)?;

        if player.position.distance(&collectible.position) > COLLECT_RADIUS {
            debug!(
                "Player {} too far from collectible {} ({:.1})",
                player_id,
                collectible_id,
                player.position.distance(&collectible.position)
            );
            return None;
        }

        self.award(player_id, collectible_id)
    }

    /// Collects everything within reach of the player's current position.
    pub fn collect_nearby(&mut self, player_id: u32) -> Vec<Collection> {
        let Some(player) = self.players.get(&player_id) else {
            return Vec::new();
        };
        let position = player.position;

        let in_reach: Vec<u32> = self
            .collectibles
            .values()
            .filter(|c| c.position.distance(&position) <= COLLECT_RADIUS)
            .map(|c| c.id)
            .collect();

        in_reach
            .into_iter()
            .filter_map(|id| self.award(player_id, id))
            .collect()
    }

    fn award(&mut self, player_id: u32, collectible_id: u32) -> Option<Collection> {
        let player = self.players.get_mut(&player_id)?;
        let collectible = self.collectibles.remove(&collectible_id)?;

        player.score += collectible.points;
        info!(
            "{} collected {:?} collectible {} (+{}, now {})",
            player.name, collectible.tier, collectible.id, collectible.points, player.score
        );

        Some(Collection {
            collectible_id,
            player_id,
            points: collectible.points,
            new_score: player.score,
        })
    }

    /// Spawns one collectible unless the map is already full.
    pub fn spawn_collectible(&mut self, now: u64) -> Option<Collectible> {
        if self.collectibles.len() >= MAX_COLLECTIBLES {
            return None;
        }

        let position = self.random_spawn();
        let tier = if self.rng.gen_bool(PREMIUM_CHANCE) {
            Tier::Premium
        } else {
            Tier::Normal
        };

        let id = self.next_collectible_id;
        self.next_collectible_id += 1;

        let collectible = Collectible::new(id, position, tier, now);
        debug!("Spawned {:?} collectible {} at ({:.0}, {:.0})", tier, id, position.x, position.y);
        self.collectibles.insert(id, collectible.clone());
        Some(collectible)
    }

    pub fn seed_collectibles(&mut self, now: u64) -> Vec<Collectible> {
        (0..INITIAL_COLLECTIBLES)
            .filter_map(|_| self.spawn_collectible(now))
            .collect()
    }

    /// Removes collectibles older than `lifetime_ms` and returns their ids.
    pub fn expire_collectibles(&mut self, now: u64, lifetime_ms: u64) -> Vec<u32> {
        let expired: Vec<u32> = self
            .collectibles
            .values()
            .filter(|c| c.is_expired(now, lifetime_ms))
            .map(|c| c.id)
            .collect();

        for id in &expired {
            self.collectibles.remove(id);
        }
        expired
    }

    /// Leaderboard computed from live players only, used while the ranking
    /// service cannot be reached.
    pub fn local_leaderboard(&self, size: usize) -> Vec<RankingEntry> {
        let mut entries: Vec<RankingEntry> = self
            .players
            .values()
            .map(|p| RankingEntry {
                id: p.session_id,
                name: p.name.clone(),
                score: p.score,
                is_online: true,
            })
            .collect();

        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries.truncate(size);
        entries
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}
