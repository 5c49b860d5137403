//! Ranking service event loop

use crate::board::Leaderboard;
use crate::persistence::{self, PersistError};
use log::{debug, error, info, warn};
use rpc::Inbound;
use shared::{
    get_timestamp, RankingEvent, RankingProtocol, RankingRequest, RankingResponse,
    BACKUP_INTERVAL, LEADERBOARD_BROADCAST_INTERVAL, LEADERBOARD_SIZE,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct RankingServiceConfig {
    pub leaderboard_size: usize,
    pub broadcast_interval: Duration,
    pub backup_interval: Duration,
    pub data_file: Option<PathBuf>,
}

impl Default for RankingServiceConfig {
    fn default() -> Self {
        Self {
            leaderboard_size: LEADERBOARD_SIZE,
            broadcast_interval: LEADERBOARD_BROADCAST_INTERVAL,
            backup_interval: BACKUP_INTERVAL,
            data_file: None,
        }
    }
}

/// What a handled request requires from the loop afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effects {
    pub broadcast: bool,
    pub persist: bool,
}

impl Effects {
    const NONE: Effects = Effects {
        broadcast: false,
        persist: false,
    };
    const BROADCAST: Effects = Effects {
        broadcast: true,
        persist: false,
    };
    const BROADCAST_AND_PERSIST: Effects = Effects {
        broadcast: true,
        persist: true,
    };
}

pub struct RankingService {
    board: Leaderboard,
    config: RankingServiceConfig,
    inbound_rx: mpsc::UnboundedReceiver<Inbound<RankingProtocol>>,
    events: broadcast::Sender<RankingEvent>,
    connections: Arc<AtomicUsize>,
}

impl RankingService {
    pub async fn new(
        config: RankingServiceConfig,
        inbound_rx: mpsc::UnboundedReceiver<Inbound<RankingProtocol>>,
        events: broadcast::Sender<RankingEvent>,
        connections: Arc<AtomicUsize>,
    ) -> Self {
        let board = match &config.data_file {
            Some(path) => match persistence::load(path).await {
                Ok(Some(snapshot)) => Leaderboard::from_snapshot(snapshot, config.leaderboard_size),
                Ok(None) => {
                    info!("No score snapshot at {}, starting empty", path.display());
                    Leaderboard::new(config.leaderboard_size)
                }
                Err(e) => {
                    warn!("Ignoring unreadable snapshot {}: {}", path.display(), e);
                    Leaderboard::new(config.leaderboard_size)
                }
            },
            None => Leaderboard::new(config.leaderboard_size),
        };

        Self {
            board,
            config,
            inbound_rx,
            events,
            connections,
        }
    }

    pub fn board(&self) -> &Leaderboard {
        &self.board
    }

    pub fn handle(&mut self, request: RankingRequest, now: u64) -> (RankingResponse, Effects) {
        debug!("Ranking request: {:?}", request);

        match request {
            RankingRequest::Update { id, name, score } => {
                self.board.update(id, name, score, now);
                (
                    RankingResponse::Ack { success: true },
                    Effects::BROADCAST_AND_PERSIST,
                )
            }
            RankingRequest::Online { id } => {
                let success = self.board.set_online(id, now);
                if success {
                    info!("Player {} online", id);
                }
                (RankingResponse::Ack { success }, Effects::BROADCAST)
            }
            RankingRequest::Offline { id } => {
                let success = self.board.set_offline(id, now);
                info!("Player {} offline", id);
                (
                    RankingResponse::Ack { success },
                    Effects::BROADCAST_AND_PERSIST,
                )
            }
            RankingRequest::Remove { id } => {
                let success = self.board.remove(id, now);
                info!("Player {} removed", id);
                (
                    RankingResponse::Ack { success },
                    Effects::BROADCAST_AND_PERSIST,
                )
            }
            RankingRequest::Get => (
                RankingResponse::Standings(self.board.standings(now)),
                Effects::NONE,
            ),
            RankingRequest::Stats => (RankingResponse::Stats(self.board.stats()), Effects::NONE),
        }
    }

    /// Pushes freshly computed standings to every connected game server.
    fn broadcast(&self) {
        let standings = self.board.standings(get_timestamp());
        debug!(
            "Broadcasting standings: {} online, {} all-time",
            standings.online.len(),
            standings.all_time.len()
        );
        // No subscribers simply means no game server is connected
        let _ = self.events.send(RankingEvent::Standings(standings));
    }

    pub async fn persist(&self) -> Result<(), PersistError> {
        if let Some(path) = &self.config.data_file {
            persistence::save(path, &self.board.snapshot(get_timestamp())).await?;
            debug!("Saved {} players to {}", self.board.len(), path.display());
        }
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!("Failed to save scores: {}", e);
        }
    }

    /// Serves requests until a shutdown request arrives or every request
    /// sender is gone, saving a final snapshot either way. The shutdown
    /// request is acknowledged once that snapshot is written.
    pub async fn run(mut self, mut shutdown: mpsc::UnboundedReceiver<oneshot::Sender<()>>) {
        let mut ticker = interval(self.config.broadcast_interval);
        let mut backup = interval(self.config.backup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        backup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        backup.tick().await;

        info!("Ranking service running with {} players", self.board.len());

        loop {
            tokio::select! {
                inbound = self.inbound_rx.recv() => match inbound {
                    Some(Inbound { request, reply }) => {
                        let (response, effects) = self.handle(request, get_timestamp());
                        let _ = reply.send(response);

                        if effects.broadcast {
                            self.broadcast();
                        }
                        if effects.persist {
                            self.persist_logged().await;
                        }
                    }
                    None => {
                        info!("Ranking service shutting down");
                        self.persist_logged().await;
                        break;
                    }
                },

                Some(done) = shutdown.recv() => {
                    info!("Ranking service stopping, saving scores");
                    self.persist_logged().await;
                    let _ = done.send(());
                    break;
                },

                _ = ticker.tick() => {
                    if self.connections.load(Ordering::SeqCst) > 0 {
                        self.broadcast();
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
    use uuid::Uuid;

    async fn test_service() -> (RankingService, broadcast::Receiver<RankingEvent>) {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (events, events_rx) = broadcast::channel(16);
        let service = RankingService::new(
            RankingServiceConfig::default(),
            rx,
            events,
            Arc::new(AtomicUsize::new(0)),
        )
        .await;
        (service, events_rx)
    }

    #[tokio::test]
    async fn test_update_broadcasts_and_persists() {
        let (mut service, _) = test_service().await;
        let (response, effects) = service.handle(
            RankingRequest::Update {
                id: Uuid::new_v4(),
                name: "Alice".to_string(),
                score: 5,
            },
            1,
        );

        assert!(matches!(response, RankingResponse::Ack { success: true }));
        assert_eq!(effects, Effects::BROADCAST_AND_PERSIST);
    }

    #[tokio::test]
    async fn test_online_only_broadcasts() {
        let (mut service, _) = test_service().await;
        let id = Uuid::new_v4();
        service.handle(
            RankingRequest::Update {
                id,
                name: "Alice".to_string(),
                score: 5,
            },
            1,
        );
        service.handle(RankingRequest::Offline { id }, 2);

        let (response, effects) = service.handle(RankingRequest::Online { id }, 3);
        assert!(matches!(response, RankingResponse::Ack { success: true }));
        assert_eq!(effects, Effects::BROADCAST);
        assert!(service.board().is_online(&id));
    }

    #[tokio::test]
    async fn test_get_returns_both_projections() {
        let (mut service, _) = test_service().await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        service.handle(
            RankingRequest::Update {
                id: alice,
                name: "Alice".to_string(),
                score: 5,
            },
            1,
        );
        service.handle(
            RankingRequest::Update {
                id: bob,
                name: "Bob".to_string(),
                score: 9,
            },
            1,
        );
        service.handle(RankingRequest::Offline { id: bob }, 2);

        match service.handle(RankingRequest::Get, 3).0 {
            RankingResponse::Standings(standings) => {
                assert_eq!(standings.online.len(), 1);
                assert_eq!(standings.online[0].id, alice);
                assert_eq!(standings.all_time[0].id, bob);
                assert_eq!(standings.online_count, 1);
            }
            other => panic!("Unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let (mut service, mut events_rx) = test_service().await;
        service.handle(
            RankingRequest::Update {
                id: Uuid::new_v4(),
                name: "Alice".to_string(),
                score: 5,
            },
            1,
        );
        service.broadcast();

        match events_rx.recv().await.unwrap() {
            RankingEvent::Standings(standings) => {
                assert_eq!(standings.online[0].name, "Alice");
            }
        }
    }
}
