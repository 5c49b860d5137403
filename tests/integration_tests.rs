//! Integration tests for the auxiliary services and their RPC clients
//!
//! Each test starts real services on ephemeral ports and talks to them
//! through the same typed clients the game server uses.

use rpc::RpcConfig;
use server::services::{resolve_join, RankingClient, SessionClient};
use shared::{Position, RankingEvent, SavedGameState, Standings};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

fn test_rpc_config() -> RpcConfig {
    RpcConfig {
        call_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(50),
    }
}

async fn start_sessions(config: session::SessionServiceConfig) -> SessionClient {
    let handle = session::spawn(config, "127.0.0.1:0").await.unwrap();
    SessionClient::connect(&handle.addr.to_string(), test_rpc_config())
}

async fn start_ranking() -> (RankingClient, mpsc::UnboundedReceiver<RankingEvent>) {
    let handle = ranking::spawn(ranking::RankingServiceConfig::default(), "127.0.0.1:0")
        .await
        .unwrap();
    RankingClient::connect(&handle.addr.to_string(), test_rpc_config())
}

/// Waits for a pushed standings event matching `pred`.
async fn next_standings<F>(events: &mut mpsc::UnboundedReceiver<RankingEvent>, mut pred: F) -> Standings
where
    F: FnMut(&Standings) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(RankingEvent::Standings(standings)) if pred(&standings) => return standings,
                Some(_) => continue,
                None => panic!("ranking event stream closed"),
            }
        }
    })
    .await
    .expect("no matching standings pushed")
}

fn temp_file(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("carrot-rush-it-{}", Uuid::new_v4()))
        .join(name)
}

/// SESSION SERVICE TESTS
mod session_tests {
    use super::*;

    /// Walks one session through its whole lifecycle over RPC
    #[tokio::test]
    async fn session_lifecycle_over_rpc() {
        let sessions = start_sessions(session::SessionServiceConfig::default()).await;

        let initial = SavedGameState {
            position: Some(Position::new(100.0, 100.0)),
            score: 0,
        };
        let id = sessions.create(1, "Alice", initial).await.unwrap();

        let session = sessions.get(id).await.unwrap().unwrap();
        assert_eq!(session.player_name, "Alice");
        assert!(session.is_online);

        // Notifications are delivered in order ahead of the next call
        sessions.update(id, Position::new(120.0, 110.0), 4);
        let session = sessions.get(id).await.unwrap().unwrap();
        assert_eq!(session.game_state.score, 4);
        assert_eq!(session.game_state.position, Some(Position::new(120.0, 110.0)));

        sessions.disconnect(id);
        let session = sessions.find_by_name("Alice").await.unwrap().unwrap();
        assert_eq!(session.session_id, id);
        assert!(!session.is_online);

        assert!(sessions.reconnect(id).await.unwrap());
        let session = sessions.get(id).await.unwrap().unwrap();
        assert!(session.is_online);
        assert_eq!(session.reconnect_count, 1);

        assert!(!sessions.reconnect(Uuid::new_v4()).await.unwrap());
        assert!(sessions.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    /// Tests that a returning player gets their saved state back
    #[tokio::test]
    async fn resolve_join_restores_saved_state() {
        let sessions = start_sessions(session::SessionServiceConfig::default()).await;

        let saved = SavedGameState {
            position: Some(Position::new(300.0, 400.0)),
            score: 7,
        };
        let id = sessions.create(1, "Alice", saved.clone()).await.unwrap();
        sessions.disconnect(id);

        let resolution =
            resolve_join(&sessions, 2, "Alice", None, Position::new(50.0, 50.0)).await;
        assert!(resolution.is_reconnection);
        assert_eq!(resolution.session_id, id);
        assert_eq!(resolution.restored, Some(saved));
    }

    /// Tests that a token for someone else's session is not honoured
    #[tokio::test]
    async fn resolve_join_ignores_foreign_token() {
        let sessions = start_sessions(session::SessionServiceConfig::default()).await;

        let alice = sessions
            .create(1, "Alice", SavedGameState::default())
            .await
            .unwrap();

        let resolution =
            resolve_join(&sessions, 2, "Mallory", Some(alice), Position::new(50.0, 50.0)).await;
        assert!(!resolution.is_reconnection);
        assert_ne!(resolution.session_id, alice);
        assert!(resolution.restored.is_none());
    }

    /// Tests that sessions survive a restart of the service
    #[tokio::test]
    async fn sessions_survive_restart() {
        let data_file = temp_file("sessions.json");
        let config = session::SessionServiceConfig {
            data_file: Some(data_file.clone()),
            ..session::SessionServiceConfig::default()
        };

        let first = start_sessions(config.clone()).await;
        let saved = SavedGameState {
            position: Some(Position::new(10.0, 20.0)),
            score: 3,
        };
        let id = first.create(1, "Alice", saved).await.unwrap();
        // Disconnect persists before the next request is answered
        first.disconnect(id);
        first.get(id).await.unwrap();

        let second = start_sessions(config).await;
        let session = second.find_by_name("Alice").await.unwrap().unwrap();
        assert_eq!(session.session_id, id);
        assert_eq!(session.game_state.score, 3);

        let _ = std::fs::remove_dir_all(data_file.parent().unwrap());
    }

    /// Tests that updates not yet snapshotted are saved on shutdown
    #[tokio::test]
    async fn shutdown_saves_pending_updates() {
        let data_file = temp_file("sessions.json");
        let config = session::SessionServiceConfig {
            data_file: Some(data_file.clone()),
            ..session::SessionServiceConfig::default()
        };

        let handle = session::spawn(config.clone(), "127.0.0.1:0").await.unwrap();
        let sessions = SessionClient::connect(&handle.addr.to_string(), test_rpc_config());
        let id = sessions
            .create(1, "Alice", SavedGameState::default())
            .await
            .unwrap();
        // Updates only reach disk on the backup tick or at shutdown
        sessions.update(id, Position::new(250.0, 260.0), 9);
        sessions.get(id).await.unwrap();
        handle.shutdown().await;

        let restarted = start_sessions(config).await;
        let session = restarted.find_by_name("Alice").await.unwrap().unwrap();
        assert_eq!(session.game_state.score, 9);
        assert_eq!(session.game_state.position, Some(Position::new(250.0, 260.0)));

        let _ = std::fs::remove_dir_all(data_file.parent().unwrap());
    }

    /// Tests that idle sessions are evicted once their TTL passes
    #[tokio::test]
    async fn idle_sessions_expire() {
        let sessions = start_sessions(session::SessionServiceConfig {
            ttl: Duration::from_millis(200),
            cleanup_interval: Duration::from_millis(50),
            ..session::SessionServiceConfig::default()
        })
        .await;

        let id = sessions
            .create(1, "Bob", SavedGameState::default())
            .await
            .unwrap();
        sessions.disconnect(id);

        sleep(Duration::from_millis(500)).await;
        assert!(sessions.find_by_name("Bob").await.unwrap().is_none());
    }
}

/// RANKING SERVICE TESTS
mod ranking_tests {
    use super::*;

    /// Tests that a score update is pushed back as standings
    #[tokio::test]
    async fn update_pushes_standings() {
        let (ranking, mut events) = start_ranking().await;
        let id = Uuid::new_v4();

        ranking.update(id, "Alice", 5).await.unwrap();

        let standings = next_standings(&mut events, |s| !s.online.is_empty()).await;
        assert_eq!(standings.online[0].id, id);
        assert_eq!(standings.online[0].name, "Alice");
        assert_eq!(standings.online[0].score, 5);
        assert_eq!(standings.online_count, 1);
    }

    /// Tests that presence for an unknown player does not create an entry
    #[tokio::test]
    async fn online_for_unknown_player_is_refused() {
        let (ranking, _events) = start_ranking().await;

        assert!(!ranking.online(Uuid::new_v4()).await.unwrap());
        let standings = ranking.standings().await.unwrap();
        assert!(standings.online.is_empty());
        assert!(standings.all_time.is_empty());
    }

    /// Tests that scores are on disk once shutdown returns
    #[tokio::test]
    async fn shutdown_saves_scores() {
        let data_file = temp_file("leaderboard.json");
        let config = ranking::RankingServiceConfig {
            data_file: Some(data_file.clone()),
            ..ranking::RankingServiceConfig::default()
        };

        let handle = ranking::spawn(config.clone(), "127.0.0.1:0").await.unwrap();
        let (ranking, _events) =
            RankingClient::connect(&handle.addr.to_string(), test_rpc_config());
        let id = Uuid::new_v4();
        ranking.update(id, "Alice", 12).await.unwrap();
        handle.shutdown().await;

        let restarted = ranking::spawn(config, "127.0.0.1:0").await.unwrap();
        let (ranking, _events) =
            RankingClient::connect(&restarted.addr.to_string(), test_rpc_config());
        let standings = ranking.standings().await.unwrap();
        assert_eq!(standings.all_time.len(), 1);
        assert_eq!(standings.all_time[0].id, id);
        assert_eq!(standings.all_time[0].score, 12);
        assert!(!standings.all_time[0].is_online);

        let _ = std::fs::remove_dir_all(data_file.parent().unwrap());
    }

    /// Tests that going offline keeps the all-time entry
    #[tokio::test]
    async fn offline_player_stays_in_all_time() {
        let (ranking, _events) = start_ranking().await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        ranking.update(alice, "Alice", 10).await.unwrap();
        ranking.update(bob, "Bob", 4).await.unwrap();
        assert!(ranking.offline(alice).await.unwrap());

        let standings = ranking.standings().await.unwrap();
        assert_eq!(standings.online.len(), 1);
        assert_eq!(standings.online[0].name, "Bob");

        assert_eq!(standings.all_time.len(), 2);
        assert_eq!(standings.all_time[0].name, "Alice");
        assert!(!standings.all_time[0].is_online);

        assert!(ranking.online(alice).await.unwrap());
        let standings = ranking.standings().await.unwrap();
        assert_eq!(standings.online[0].name, "Alice");
    }
}
