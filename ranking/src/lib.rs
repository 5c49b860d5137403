//! # Ranking Aggregator Service
//!
//! Keeps every player's best-known score and derives two leaderboards from
//! it: the top online players and the all-time top. Game servers push score
//! and presence changes over [`rpc`]; after every change, and once a second
//! while anyone is connected, the service pushes freshly computed
//! [`shared::Standings`] back to all of them.
//!
//! Scores survive restarts through a JSON snapshot. Presence does not: after
//! a restart every player is offline until a game server says otherwise.

pub mod board;
pub mod http;
pub mod persistence;
pub mod service;

pub use board::{Leaderboard, ScoreRecord};
pub use service::{RankingService, RankingServiceConfig};

use rpc::{Inbound, RpcServer};
use shared::RankingProtocol;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct RankingHandle {
    pub addr: SocketAddr,
    pub inbound: mpsc::UnboundedSender<Inbound<RankingProtocol>>,
    pub connections: Arc<AtomicUsize>,
    shutdown: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl RankingHandle {
    pub fn health_state(&self) -> http::HealthState {
        http::HealthState {
            inbound: self.inbound.clone(),
            connections: Arc::clone(&self.connections),
        }
    }

    /// Stops the service loop and waits for its final snapshot.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.shutdown.send(done_tx).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Binds the RPC listener and spawns the accept loop and the service loop.
pub async fn spawn(config: RankingServiceConfig, bind_addr: &str) -> io::Result<RankingHandle> {
    let listener = TcpListener::bind(bind_addr).await?;
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let server = RpcServer::<RankingProtocol>::from_listener(listener, inbound_tx.clone());
    let addr = server.local_addr()?;
    let connections = server.connections();

    let service =
        RankingService::new(config, inbound_rx, server.events(), Arc::clone(&connections)).await;
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    tokio::spawn(service.run(shutdown_rx));
    tokio::spawn(server.run());

    Ok(RankingHandle {
        addr,
        inbound: inbound_tx,
        connections,
        shutdown: shutdown_tx,
    })
}
