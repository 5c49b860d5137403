use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use rpc::Inbound;
use shared::{RankingProtocol, RankingRequest, RankingResponse, RankingStats};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct HealthState {
    pub inbound: mpsc::UnboundedSender<Inbound<RankingProtocol>>,
    pub connections: Arc<AtomicUsize>,
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let (request, reply) = Inbound::new(RankingRequest::Stats);
    let stats = match state.inbound.send(request) {
        Ok(()) => match reply.await {
            Ok(RankingResponse::Stats(stats)) => stats,
            _ => RankingStats::default(),
        },
        Err(_) => RankingStats::default(),
    };

    Json(serde_json::json!({
        "status": "healthy",
        "totalPlayers": stats.total_players,
        "onlinePlayers": stats.online_players,
        "connectedServers": state.connections.load(Ordering::SeqCst),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn serve(addr: &str, state: HealthState) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Ranking health endpoint on http://{}/health", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await
}
