//! In-memory session table
//!
//! All operations take the current time in milliseconds so eviction and
//! activity tracking can be driven deterministically.

use crate::persistence::SessionSnapshot;
use log::{debug, info};
use shared::{GameStatePatch, SavedGameState, Session, SessionId, SessionStats};
use std::collections::HashMap;
use uuid::Uuid;

pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
    ttl_ms: u64,
}

impl SessionStore {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl_ms,
        }
    }

    /// Rebuilds the table from a snapshot, dropping sessions that expired
    /// while the service was down. Nobody is online after a restart.
    pub fn from_snapshot(snapshot: SessionSnapshot, ttl_ms: u64, now: u64) -> Self {
        let mut store = Self::new(ttl_ms);
        let total = snapshot.sessions.len();

        for mut session in snapshot.sessions {
            if store.is_expired(&session, now) {
                continue;
            }
            session.is_online = false;
            store.sessions.insert(session.session_id, session);
        }

        info!(
            "Restored {} sessions ({} expired while offline)",
            store.sessions.len(),
            total - store.sessions.len()
        );
        store
    }

    pub fn snapshot(&self, now: u64) -> SessionSnapshot {
        SessionSnapshot {
            sessions: self.sessions.values().cloned().collect(),
            last_backup: now,
        }
    }

    pub fn create(
        &mut self,
        player_id: u32,
        player_name: String,
        game_state: SavedGameState,
        now: u64,
    ) -> SessionId {
        let session_id = Uuid::new_v4();
        info!("Created session {} for {}", session_id, player_name);

        self.sessions.insert(
            session_id,
            Session {
                session_id,
                player_id,
                player_name,
                game_state,
                created_at: now,
                last_activity: now,
                last_disconnect: None,
                reconnect_count: 0,
                is_online: true,
            },
        );
        session_id
    }

    /// Returns the session and counts the lookup as activity.
    pub fn get(&mut self, session_id: &SessionId, now: u64) -> Option<Session> {
        let session = self.sessions.get_mut(session_id)?;
        session.last_activity = now;
        Some(session.clone())
    }

    /// Most recently active session with this name. Does not touch activity.
    pub fn find_by_name(&self, player_name: &str) -> Option<Session> {
        self.sessions
            .values()
            .filter(|s| s.player_name == player_name)
            .max_by_key(|s| s.last_activity)
            .cloned()
    }

    pub fn update(&mut self, session_id: &SessionId, patch: &GameStatePatch, now: u64) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                patch.apply(&mut session.game_state);
                session.is_online = true;
                session.last_activity = now;
                true
            }
            None => false,
        }
    }

    pub fn reconnect(&mut self, session_id: &SessionId, now: u64) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.reconnect_count += 1;
                session.is_online = true;
                session.last_activity = now;
                info!(
                    "{} reconnected (reconnect #{})",
                    session.player_name, session.reconnect_count
                );
                true
            }
            None => false,
        }
    }

    /// Marks the session offline. Repeating it only moves the timestamps.
    pub fn disconnect(&mut self, session_id: &SessionId, now: u64) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.is_online = false;
                session.last_disconnect = Some(now);
                session.last_activity = now;
                debug!("{} went offline", session.player_name);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, session_id: &SessionId) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn stats(&self) -> SessionStats {
        let online_players = self.sessions.values().filter(|s| s.is_online).count();
        SessionStats {
            total_sessions: self.sessions.len(),
            online_players,
            offline_players: self.sessions.len() - online_players,
        }
    }

    /// Drops every session idle for longer than the TTL, online or not.
    pub fn evict_expired(&mut self, now: u64) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| self.is_expired(s, now))
            .map(|s| s.session_id)
            .collect();

        for id in &expired {
            if let Some(session) = self.sessions.remove(id) {
                info!("Evicted idle session of {}", session.player_name);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_expired(&self, session: &Session, now: u64) -> bool {
        now.saturating_sub(session.last_activity) > self.ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Position;

    const TTL: u64 = 600_000;

    fn store_with_alice(now: u64) -> (SessionStore, SessionId) {
        let mut store = SessionStore::new(TTL);
        let id = store.create(
            1,
            "Alice".to_string(),
            SavedGameState {
                position: Some(Position::new(100.0, 100.0)),
                score: 0,
            },
            now,
        );
        (store, id)
    }

    #[test]
    fn test_create_starts_online() {
        let (store, id) = store_with_alice(1_000);
        let session = store.find_by_name("Alice").unwrap();
        assert_eq!(session.session_id, id);
        assert!(session.is_online);
        assert_eq!(session.reconnect_count, 0);
        assert_eq!(session.created_at, 1_000);
    }

    #[test]
    fn test_get_refreshes_activity_but_find_does_not() {
        let (mut store, id) = store_with_alice(1_000);

        assert_eq!(store.find_by_name("Alice").unwrap().last_activity, 1_000);
        assert_eq!(store.get(&id, 5_000).unwrap().last_activity, 5_000);
        assert_eq!(store.find_by_name("Alice").unwrap().last_activity, 5_000);
        assert!(store.get(&Uuid::new_v4(), 5_000).is_none());
    }

    #[test]
    fn test_find_by_name_prefers_most_recent() {
        let mut store = SessionStore::new(TTL);
        store.create(1, "Bob".to_string(), SavedGameState::default(), 1_000);
        let newer = store.create(2, "Bob".to_string(), SavedGameState::default(), 2_000);

        assert_eq!(store.find_by_name("Bob").unwrap().session_id, newer);
        assert!(store.find_by_name("Carol").is_none());
    }

    #[test]
    fn test_update_merges_and_marks_online() {
        let (mut store, id) = store_with_alice(1_000);
        store.disconnect(&id, 2_000);

        let patch = GameStatePatch {
            position: None,
            score: Some(5),
        };
        assert!(store.update(&id, &patch, 3_000));

        let session = store.get(&id, 3_000).unwrap();
        assert!(session.is_online);
        assert_eq!(session.game_state.score, 5);
        assert_eq!(session.game_state.position, Some(Position::new(100.0, 100.0)));
        assert!(!store.update(&Uuid::new_v4(), &patch, 3_000));
    }

    #[test]
    fn test_reconnect_counts_and_unknown_fails() {
        let (mut store, id) = store_with_alice(1_000);
        store.disconnect(&id, 2_000);

        assert!(store.reconnect(&id, 3_000));
        let session = store.find_by_name("Alice").unwrap();
        assert_eq!(session.reconnect_count, 1);
        assert!(session.is_online);

        assert!(!store.reconnect(&Uuid::new_v4(), 3_000));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut store, id) = store_with_alice(1_000);
        assert!(store.disconnect(&id, 2_000));
        assert!(store.disconnect(&id, 2_500));

        let session = store.find_by_name("Alice").unwrap();
        assert!(!session.is_online);
        assert_eq!(session.last_disconnect, Some(2_500));
        assert_eq!(store.stats().offline_players, 1);
    }

    #[test]
    fn test_ttl_eviction_ignores_online_flag() {
        let (mut store, id) = store_with_alice(0);

        // Exactly at the TTL the session survives
        assert!(store.evict_expired(TTL).is_empty());
        assert_eq!(store.evict_expired(TTL + 1), vec![id]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_reload_resets_online_and_drops_expired() {
        let mut store = SessionStore::new(TTL);
        let fresh = store.create(1, "Alice".to_string(), SavedGameState::default(), 500_000);
        store.create(2, "Old".to_string(), SavedGameState::default(), 0);

        let snapshot = store.snapshot(500_000);
        let restored = SessionStore::from_snapshot(snapshot, TTL, 700_000);

        assert_eq!(restored.len(), 1);
        let session = restored.find_by_name("Alice").unwrap();
        assert_eq!(session.session_id, fresh);
        assert!(!session.is_online);
    }

    #[test]
    fn test_stats() {
        let mut store = SessionStore::new(TTL);
        let a = store.create(1, "A".to_string(), SavedGameState::default(), 0);
        store.create(2, "B".to_string(), SavedGameState::default(), 0);
        store.disconnect(&a, 10);

        let stats = store.stats();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.online_players, 1);
        assert_eq!(stats.offline_players, 1);

        assert!(store.remove(&a));
        assert!(!store.remove(&a));
        assert_eq!(store.stats().total_sessions, 1);
    }
}
