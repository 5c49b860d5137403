//! Health endpoint

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use rpc::Inbound;
use shared::{SessionProtocol, SessionRequest, SessionResponse};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct HealthState {
    pub inbound: mpsc::UnboundedSender<Inbound<SessionProtocol>>,
    pub connections: Arc<AtomicUsize>,
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let (request, reply) = Inbound::new(SessionRequest::Stats);
    let active_sessions = match state.inbound.send(request) {
        Ok(()) => match reply.await {
            Ok(SessionResponse::Stats(stats)) => stats.total_sessions,
            _ => 0,
        },
        Err(_) => 0,
    };

    Json(serde_json::json!({
        "status": "healthy",
        "activeSessions": active_sessions,
        "connectedServers": state.connections.load(Ordering::SeqCst),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn serve(addr: &str, state: HealthState) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Session health endpoint on http://{}/health", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await
}
