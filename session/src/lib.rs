//! # Session Store Service
//!
//! Remembers who each player is across connections: their durable session id,
//! last known position and score, and whether a game server currently holds a
//! live connection for them.
//!
//! The table is owned by a single event loop ([`service::SessionService`]).
//! Game servers talk to it through [`rpc::RpcServer`]; every request becomes an
//! [`rpc::Inbound`] on the loop's channel. Idle sessions are evicted after the
//! configured TTL and the table is snapshotted to JSON periodically and on
//! every disconnect.

pub mod http;
pub mod persistence;
pub mod service;
pub mod store;

pub use service::{SessionService, SessionServiceConfig};
pub use store::SessionStore;

use rpc::{Inbound, RpcServer};
use shared::SessionProtocol;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

/// Handles to a session service running in the background.
#[derive(Clone)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    pub inbound: mpsc::UnboundedSender<Inbound<SessionProtocol>>,
    pub connections: Arc<AtomicUsize>,
    shutdown: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl SessionHandle {
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

/// Binds the RPC listener and spawns both the accept loop and the service loop.
pub async fn spawn(config: SessionServiceConfig, bind_addr: &str) -> io::Result<SessionHandle> {
    let listener = TcpListener::bind(bind_addr).await?;
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let server = RpcServer::<SessionProtocol>::from_listener(listener, inbound_tx.clone());
    let addr = server.local_addr()?;
    let connections = server.connections();

    let service = SessionService::new(config, inbound_rx).await;
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    tokio::spawn(service.run(shutdown_rx));
    tokio::spawn(server.run());

    Ok(SessionHandle {
        addr,
        inbound: inbound_tx,
        connections,
        shutdown: shutdown_tx,
    })
}
