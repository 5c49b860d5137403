//! Request/response contracts of the session store and ranking aggregator.
//!
//! Each service is described by a zero-sized marker implementing [`Protocol`];
//! the RPC transport is generic over it, so every call site works with the
//! concrete request and response enums below instead of loosely-typed events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use crate::geometry::Position;

pub type SessionId = Uuid;

/// Message types carried by one request/response service.
pub trait Protocol: Send + Sync + 'static {
    type Request: Serialize + DeserializeOwned + Debug + Send + Sync + 'static;
    type Response: Serialize + DeserializeOwned + Debug + Send + Sync + 'static;
    /// Unsolicited messages the service pushes to every connected caller.
    type Event: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static;

    const NAME: &'static str;
}

pub struct SessionProtocol;

impl Protocol for SessionProtocol {
    type Request = SessionRequest;
    type Response = SessionResponse;
    type Event = ();

    const NAME: &'static str = "session";
}

pub struct RankingProtocol;

impl Protocol for RankingProtocol {
    type Request = RankingRequest;
    type Response = RankingResponse;
    type Event = RankingEvent;

    const NAME: &'static str = "ranking";
}

/// Game sub-state a session remembers between connections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedGameState {
    pub position: Option<Position>,
    pub score: u32,
}

/// Partial update merged into a [`SavedGameState`]; absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStatePatch {
    pub position: Option<Position>,
    pub score: Option<u32>,
}

impl GameStatePatch {
    pub fn apply(&self, state: &mut SavedGameState) {
        if let Some(position) = self.position {
            state.position = Some(position);
        }
        if let Some(score) = self.score {
            state.score = score;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub player_id: u32,
    pub player_name: String,
    pub game_state: SavedGameState,
    pub created_at: u64,
    pub last_activity: u64,
    pub last_disconnect: Option<u64>,
    pub reconnect_count: u32,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionRequest {
    Create {
        player_id: u32,
        player_name: String,
        state: SavedGameState,
    },
    Get {
        session_id: SessionId,
    },
    FindByName {
        player_name: String,
    },
    Update {
        session_id: SessionId,
        state: GameStatePatch,
    },
    Reconnect {
        session_id: SessionId,
    },
    Disconnect {
        session_id: SessionId,
    },
    Remove {
        session_id: SessionId,
    },
    Stats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionResponse {
    Created { session_id: SessionId },
    Session(Option<Session>),
    Ack { success: bool },
    Stats(SessionStats),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub online_players: usize,
    pub offline_players: usize,
}

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub id: SessionId,
    pub name: String,
    pub score: u32,
    pub is_online: bool,
}

/// Both leaderboard projections, always computed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Standings {
    pub online: Vec<RankingEntry>,
    pub all_time: Vec<RankingEntry>,
    pub online_count: usize,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RankingRequest {
    Update {
        id: SessionId,
        name: String,
        score: u32,
    },
    Online {
        id: SessionId,
    },
    Offline {
        id: SessionId,
    },
    Remove {
        id: SessionId,
    },
    Get,
    Stats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RankingResponse {
    Ack { success: bool },
    Standings(Standings),
    Stats(RankingStats),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingStats {
    pub total_players: usize,
    pub online_players: usize,
    pub offline_players: usize,
    pub last_update: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RankingEvent {
    Standings(Standings),
}
