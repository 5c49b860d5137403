use serde::{Deserialize, Serialize};

use crate::geometry::Position;
use crate::services::{RankingEntry, SessionId};

/// Packets exchanged between game clients and the game server.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server
    Join {
        name: String,
        resume_token: Option<SessionId>,
    },
    Move {
        position: Position,
    },
    Collect {
        collectible_id: u32,
    },
    Heartbeat,
    Leave,

    // Server -> client
    WorldSnapshot {
        player: PlayerInfo,
        players: Vec<PlayerInfo>,
        collectibles: Vec<Collectible>,
        leaderboard: Vec<RankingEntry>,
        session_token: SessionId,
        is_reconnection: bool,
    },
    PlayerJoined {
        player: PlayerInfo,
    },
    PlayerLeft {
        id: u32,
    },
    PlayerMoved {
        id: u32,
        position: Position,
    },
    PositionCorrected {
        position: Position,
        reason: String,
    },
    Collected {
        collectible_id: u32,
        player_id: u32,
        new_score: u32,
    },
    CollectibleSpawned {
        collectible: Collectible,
    },
    CollectibleExpired {
        id: u32,
    },
    LeaderboardUpdated {
        entries: Vec<RankingEntry>,
    },
    Rejected {
        reason: String,
    },
    /// Reply to gameplay packets from an address with no live player,
    /// typically after a timeout. The client should join again.
    NotJoined,
}

/// Public view of a live player.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: u32,
    pub name: String,
    pub position: Position,
    pub score: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Normal,
    Premium,
}

impl Tier {
    pub fn points(&self) -> u32 {
        match self {
            Tier::Normal => 1,
            Tier::Premium => 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Collectible {
    pub id: u32,
    pub position: Position,
    pub tier: Tier,
    pub points: u32,
    /// Spawn time in milliseconds since the Unix epoch.
    pub spawned_at: u64,
}

impl Collectible {
    pub fn new(id: u32, position: Position, tier: Tier, spawned_at: u64) -> Self {
        Self {
            id,
            position,
            tier,
            points: tier.points(),
            spawned_at,
        }
    }

    pub fn is_expired(&self, now: u64, lifetime_ms: u64) -> bool {
        now.saturating_sub(self.spawned_at) > lifetime_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_tier_points() {
        assert_eq!(Tier::Normal.points(), 1);
        assert_eq!(Tier::Premium.points(), 5);
    }

    #[test]
    fn test_collectible_points_follow_tier() {
        let c = Collectible::new(7, Position::new(1.0, 2.0), Tier::Premium, 1000);
        assert_eq!(c.points, 5);
    }

    #[test]
    fn test_collectible_expiry() {
        let c = Collectible::new(1, Position::default(), Tier::Normal, 1_000);
        assert!(!c.is_expired(61_000, 60_000));
        assert!(c.is_expired(61_001, 60_000));
        // Clock skew never underflows
        assert!(!c.is_expired(0, 60_000));
    }

    #[test]
    fn test_packet_serialization_join() {
        let token = Uuid::new_v4();
        let packet = Packet::Join {
            name: "Alice".to_string(),
            resume_token: Some(token),
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Join { name, resume_token } => {
                assert_eq!(name, "Alice");
                assert_eq!(resume_token, Some(token));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_snapshot() {
        let player = PlayerInfo {
            id: 1,
            name: "Bob".to_string(),
            position: Position::new(10.0, 20.0),
            score: 7,
        };
        let packet = Packet::WorldSnapshot {
            player: player.clone(),
            players: vec![player],
            collectibles: vec![Collectible::new(3, Position::new(5.0, 5.0), Tier::Normal, 0)],
            leaderboard: vec![],
            session_token: Uuid::new_v4(),
            is_reconnection: true,
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::WorldSnapshot {
                player,
                players,
                collectibles,
                is_reconnection,
                ..
            } => {
                assert_eq!(player.score, 7);
                assert_eq!(players.len(), 1);
                assert_eq!(collectibles[0].id, 3);
                assert!(is_reconnection);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_truncated_packet_fails() {
        let packet = Packet::Move {
            position: Position::new(1.0, 2.0),
        };
        let data = bincode::serialize(&packet).unwrap();
        let result: Result<Packet, _> = bincode::deserialize(&data[..data.len() / 2]);
        assert!(result.is_err());
    }
}
