//! Score table and leaderboard projections

use crate::persistence::ScoreSnapshot;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::{RankingEntry, RankingStats, SessionId, Standings};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub name: String,
    pub score: u32,
    pub last_update: u64,
}

/// Every player ever seen, plus the set of those currently online.
///
/// Iteration over the [`BTreeMap`] is ordered by id, and the projections use a
/// stable sort, so equal scores always come out in the same order.
pub struct Leaderboard {
    scores: BTreeMap<SessionId, ScoreRecord>,
    online: BTreeSet<SessionId>,
    size: usize,
    last_update: u64,
}

impl Leaderboard {
    pub fn new(size: usize) -> Self {
        Self {
            scores: BTreeMap::new(),
            online: BTreeSet::new(),
            size,
            last_update: 0,
        }
    }

    /// Restores scores from disk. Everyone starts offline.
    pub fn from_snapshot(snapshot: ScoreSnapshot, size: usize) -> Self {
        let mut board = Self::new(size);
        board.scores = snapshot.players.into_iter().collect();
        board.last_update = snapshot.last_update;
        info!("Restored {} players from snapshot", board.scores.len());
        board
    }

    pub fn snapshot(&self, now: u64) -> ScoreSnapshot {
        ScoreSnapshot {
            players: self
                .scores
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect(),
            last_update: self.last_update,
            saved_at: now,
        }
    }

    /// Upserts a player's score and marks them online.
    pub fn update(&mut self, id: SessionId, name: String, score: u32, now: u64) {
        debug!("Score update: {} -> {}", name, score);
        self.scores.insert(
            id,
            ScoreRecord {
                name,
                score,
                last_update: now,
            },
        );
        self.online.insert(id);
        self.last_update = now;
    }

    /// Only players with a score record can be marked online.
    pub fn set_online(&mut self, id: SessionId, now: u64) -> bool {
        if !self.scores.contains_key(&id) {
            return false;
        }
        self.online.insert(id);
        self.last_update = now;
        true
    }

    pub fn set_offline(&mut self, id: SessionId, now: u64) -> bool {
        let was_online = self.online.remove(&id);
        self.last_update = now;
        was_online || self.scores.contains_key(&id)
    }

    pub fn remove(&mut self, id: SessionId, now: u64) -> bool {
        self.online.remove(&id);
        self.last_update = now;
        self.scores.remove(&id).is_some()
    }

    pub fn is_online(&self, id: &SessionId) -> bool {
        self.online.contains(id)
    }

    /// Top players among those online.
    pub fn online_top(&self) -> Vec<RankingEntry> {
        self.top(|id| self.online.contains(id))
    }

    /// Top players overall, each carrying their current online flag.
    pub fn all_time_top(&self) -> Vec<RankingEntry> {
        self.top(|_| true)
    }

    pub fn standings(&self, now: u64) -> Standings {
        Standings {
            online: self.online_top(),
            all_time: self.all_time_top(),
            online_count: self.online.len(),
            timestamp: now,
        }
    }

    pub fn stats(&self) -> RankingStats {
        RankingStats {
            total_players: self.scores.len(),
            online_players: self.online.len(),
            offline_players: self.scores.len().saturating_sub(self.online.len()),
            last_update: self.last_update,
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn top(&self, include: impl Fn(&SessionId) -> bool) -> Vec<RankingEntry> {
        let mut entries: Vec<RankingEntry> = self
            .scores
            .iter()
            .filter(|(id, _)| include(id))
            .map(|(id, record)| RankingEntry {
                id: *id,
                name: record.name.clone(),
                score: record.score,
                is_online: self.online.contains(id),
            })
            .collect();

        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries.truncate(self.size);
        entries
    }
}
