//! Types and constants shared by every process in the workspace.
//!
//! The game server, the client predictor and the two auxiliary services all
//! agree on the map geometry, gameplay tuning and wire formats defined here.

pub mod geometry;
pub mod protocol;
pub mod services;

pub use geometry::Position;
pub use protocol::{Collectible, Packet, PlayerInfo, Tier};
pub use services::{
    GameStatePatch, Protocol, RankingEntry, RankingEvent, RankingProtocol, RankingRequest,
    RankingResponse, RankingStats, SavedGameState, Session, SessionId, SessionProtocol,
    SessionRequest, SessionResponse, SessionStats, Standings,
};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MAP_WIDTH: f32 = 2000.0;
pub const MAP_HEIGHT: f32 = 2000.0;
/// Spawn positions keep this distance from the map edges.
pub const SPAWN_MARGIN: f32 = 50.0;

/// Maximum player speed enforced by the server, in map units per second.
pub const MAX_SPEED: f32 = 150.0;
pub const SPEED_TOLERANCE_FRACTION: f32 = 0.1;
pub const SPEED_TOLERANCE_CEILING: f32 = 10.0;

pub const COLLECT_RADIUS: f32 = 30.0;
pub const MAX_COLLECTIBLES: usize = 20;
pub const INITIAL_COLLECTIBLES: usize = 5;
pub const PREMIUM_CHANCE: f64 = 0.2;
pub const SPAWN_INTERVAL: Duration = Duration::from_secs(3);
pub const COLLECTIBLE_LIFETIME: Duration = Duration::from_secs(60);
pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Every Nth accepted move is persisted to the session store.
pub const PERSIST_EVERY_N_MOVES: u32 = 5;
pub const LEADERBOARD_SIZE: usize = 10;

pub const SESSION_TTL: Duration = Duration::from_secs(600);
pub const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const BACKUP_INTERVAL: Duration = Duration::from_secs(30);
pub const LEADERBOARD_BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(2);
pub const RPC_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Clients that stay silent for this long are treated as disconnected.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

// Client prediction tuning
pub const PREDICTION_STEP: f32 = 2.0;
pub const PREDICTION_TICK: Duration = Duration::from_millis(16);
pub const MOVE_SEND_INTERVAL: Duration = Duration::from_millis(50);
pub const RECONCILE_THRESHOLD: f32 = 10.0;
pub const ARRIVAL_EPSILON: f32 = 5.0;
pub const PREDICTION_HISTORY: usize = 100;

/// Largest datagram the game protocol produces.
pub const MAX_PACKET_SIZE: usize = 65_507;

/// Milliseconds since the Unix epoch.
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Distance a player may cover in `elapsed_secs`, tolerance included.
///
/// The tolerance is 10% of the raw budget, capped at a fixed ceiling, which
/// absorbs tick jitter without leaving room for meaningful speed cheating.
pub fn max_move_distance(elapsed_secs: f32) -> f32 {
    let budget = MAX_SPEED * elapsed_secs.max(0.0);
    let tolerance = (budget * SPEED_TOLERANCE_FRACTION).min(SPEED_TOLERANCE_CEILING);
    budget + tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_max_move_distance_small_interval() {
        // 0.1s: budget 15, tolerance 1.5
        assert_approx_eq!(max_move_distance(0.1), 16.5, 0.001);
    }

    #[test]
    fn test_max_move_distance_tolerance_ceiling() {
        // 2s: budget 300, tolerance capped at 10
        assert_approx_eq!(max_move_distance(2.0), 310.0, 0.001);
    }

    #[test]
    fn test_max_move_distance_negative_elapsed() {
        assert_eq!(max_move_distance(-1.0), 0.0);
    }

    #[test]
    fn test_get_timestamp_monotonic_enough() {
        let t1 = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        let t2 = get_timestamp();
        assert!(t2 > t1);
    }
}
