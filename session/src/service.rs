//! Session service event loop

use crate::persistence::{self, PersistError};
use crate::store::SessionStore;
use log::{debug, error, info, warn};
use rpc::Inbound;
use shared::{
    get_timestamp, SessionProtocol, SessionRequest, SessionResponse, BACKUP_INTERVAL,
    SESSION_CLEANUP_INTERVAL, SESSION_TTL,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct SessionServiceConfig {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    pub backup_interval: Duration,
    /// Snapshot location; `None` keeps everything in memory.
    pub data_file: Option<PathBuf>,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            ttl: SESSION_TTL,
            cleanup_interval: SESSION_CLEANUP_INTERVAL,
            backup_interval: BACKUP_INTERVAL,
            data_file: None,
        }
    }
}

/// Owns the session table. Requests arrive from the RPC layer and are
/// answered strictly one at a time.
pub struct SessionService {
    store: SessionStore,
    config: SessionServiceConfig,
    inbound_rx: mpsc::UnboundedReceiver<Inbound<SessionProtocol>>,
}

impl SessionService {
    pub async fn new(
        config: SessionServiceConfig,
        inbound_rx: mpsc::UnboundedReceiver<Inbound<SessionProtocol>>,
    ) -> Self {
        let ttl_ms = config.ttl.as_millis() as u64;
        let store = match &config.data_file {
            Some(path) => match persistence::load(path).await {
                Ok(Some(snapshot)) => SessionStore::from_snapshot(snapshot, ttl_ms, get_timestamp()),
                Ok(None) => {
                    info!("No session snapshot at {}, starting empty", path.display());
                    SessionStore::new(ttl_ms)
                }
                Err(e) => {
                    warn!("Ignoring unreadable snapshot {}: {}", path.display(), e);
                    SessionStore::new(ttl_ms)
                }
            },
            None => SessionStore::new(ttl_ms),
        };

        Self {
            store,
            config,
            inbound_rx,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Applies one request to the table.
    pub fn handle(&mut self, request: SessionRequest, now: u64) -> SessionResponse {
        debug!("Session request: {:?}", request);

        match request {
            SessionRequest::Create {
                player_id,
                player_name,
                state,
            } => SessionResponse::Created {
                session_id: self.store.create(player_id, player_name, state, now),
            },
            SessionRequest::Get { session_id } => {
                SessionResponse::Session(self.store.get(&session_id, now))
            }
            SessionRequest::FindByName { player_name } => {
                SessionResponse::Session(self.store.find_by_name(&player_name))
            }
            SessionRequest::Update { session_id, state } => SessionResponse::Ack {
                success: self.store.update(&session_id, &state, now),
            },
            SessionRequest::Reconnect { session_id } => SessionResponse::Ack {
                success: self.store.reconnect(&session_id, now),
            },
            SessionRequest::Disconnect { session_id } => SessionResponse::Ack {
                success: self.store.disconnect(&session_id, now),
            },
            SessionRequest::Remove { session_id } => SessionResponse::Ack {
                success: self.store.remove(&session_id),
            },
            SessionRequest::Stats => SessionResponse::Stats(self.store.stats()),
        }
    }

    pub async fn persist(&self) -> Result<(), PersistError> {
        if let Some(path) = &self.config.data_file {
            persistence::save(path, &self.store.snapshot(get_timestamp())).await?;
            debug!("Saved {} sessions to {}", self.store.len(), path.display());
        }
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!("Failed to save sessions: {}", e);
        }
    }

    /// Serves requests until a shutdown request arrives or every request
    /// sender is gone, saving a final snapshot either way. The shutdown
    /// request is acknowledged once that snapshot is written.
    pub async fn run(mut self, mut shutdown: mpsc::UnboundedReceiver<oneshot::Sender<()>>) {
        let mut cleanup = interval(self.config.cleanup_interval);
        let mut backup = interval(self.config.backup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        backup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Both intervals fire immediately on the first tick
        cleanup.tick().await;
        backup.tick().await;

        info!(
            "Session service running with {} sessions (ttl {:?})",
            self.store.len(),
            self.config.ttl
        );

        loop {
            tokio::select! {
                inbound = self.inbound_rx.recv() => match inbound {
                    Some(Inbound { request, reply }) => {
                        let persist_now = matches!(
                            request,
                            SessionRequest::Create { .. }
                                | SessionRequest::Disconnect { .. }
                                | SessionRequest::Remove { .. }
                        );
                        let response = self.handle(request, get_timestamp());
                        let _ = reply.send(response);

                        if persist_now {
                            self.persist_logged().await;
                        }
                    }
                    None => {
                        info!("Session service shutting down");
                        self.persist_logged().await;
                        break;
                    }
                },

                Some(done) = shutdown.recv() => {
                    info!("Session service stopping, saving sessions");
                    self.persist_logged().await;
                    let _ = done.send(());
                    break;
                },

                _ = cleanup.tick() => {
                    let evicted = self.store.evict_expired(get_timestamp());
                    if !evicted.is_empty() {
                        info!("Evicted {} expired sessions", evicted.len());
                        self.persist_logged().await;
                    }
                },

                _ = backup.tick() => {
                    self.persist_logged().await;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{GameStatePatch, Position, SavedGameState};
    use uuid::Uuid;

    async fn test_service() -> SessionService {
        let (_tx, rx) = mpsc::unbounded_channel();
        SessionService::new(SessionServiceConfig::default(), rx).await
    }

    fn created_id(response: SessionResponse) -> Uuid {
        match response {
            SessionResponse::Created { session_id } => session_id,
            other => panic!("Unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let mut service = test_service().await;
        let id = created_id(service.handle(
            SessionRequest::Create {
                player_id: 1,
                player_name: "Alice".to_string(),
                state: SavedGameState::default(),
            },
            1_000,
        ));

        match service.handle(
            SessionRequest::FindByName {
                player_name: "Alice".to_string(),
            },
            2_000,
        ) {
            SessionResponse::Session(Some(session)) => assert_eq!(session.session_id, id),
            other => panic!("Unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_session_acks_failure() {
        let mut service = test_service().await;
        let unknown = Uuid::new_v4();

        for request in [
            SessionRequest::Reconnect { session_id: unknown },
            SessionRequest::Disconnect { session_id: unknown },
            SessionRequest::Remove { session_id: unknown },
            SessionRequest::Update {
                session_id: unknown,
                state: GameStatePatch::default(),
            },
        ] {
            assert!(matches!(
                service.handle(request, 0),
                SessionResponse::Ack { success: false }
            ));
        }
        assert!(matches!(
            service.handle(SessionRequest::Get { session_id: unknown }, 0),
            SessionResponse::Session(None)
        ));
    }

    #[tokio::test]
    async fn test_update_persists_position() {
        let mut service = test_service().await;
        let id = created_id(service.handle(
            SessionRequest::Create {
                player_id: 1,
                player_name: "Alice".to_string(),
                state: SavedGameState::default(),
            },
            0,
        ));

        service.handle(
            SessionRequest::Update {
                session_id: id,
                state: GameStatePatch {
                    position: Some(Position::new(300.0, 400.0)),
                    score: Some(5),
                },
            },
            10,
        );

        let session = service.store().find_by_name("Alice").unwrap();
        assert_eq!(session.game_state.position, Some(Position::new(300.0, 400.0)));
        assert_eq!(session.game_state.score, 5);
    }

    #[tokio::test]
    async fn test_restart_restores_from_snapshot() {
        let path = std::env::temp_dir().join(format!("sessions-{}.json", Uuid::new_v4()));
        let config = SessionServiceConfig {
            data_file: Some(path.clone()),
            ..SessionServiceConfig::default()
        };

        let (_tx, rx) = mpsc::unbounded_channel();
        let mut service = SessionService::new(config.clone(), rx).await;
        service.handle(
            SessionRequest::Create {
                player_id: 1,
                player_name: "Alice".to_string(),
                state: SavedGameState {
                    position: Some(Position::new(10.0, 20.0)),
                    score: 3,
                },
            },
            get_timestamp(),
        );
        service.persist().await.unwrap();

        let (_tx, rx) = mpsc::unbounded_channel();
        let restored = SessionService::new(config, rx).await;
        let session = restored.store().find_by_name("Alice").unwrap();
        assert_eq!(session.game_state.score, 3);
        assert!(!session.is_online);

        let _ = std::fs::remove_file(&path);
    }
}
