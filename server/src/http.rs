//! HTTP health and status endpoints for the game server

use crate::network::{ServerMessage, ServerStatus};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use std::io;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct StatusState {
    pub server: mpsc::UnboundedSender<ServerMessage>,
}

pub fn build_router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

async fn query(state: &StatusState) -> Option<ServerStatus> {
    let (reply, response) = oneshot::channel();
    state.server.send(ServerMessage::StatusRequest(reply)).ok()?;
    response.await.ok()
}

async fn health(State(state): State<StatusState>) -> (StatusCode, Json<serde_json::Value>) {
    match query(&state).await {
        Some(status) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "players": status.players,
                "collectibles": status.collectibles,
                "connections": status.connections,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "stopped",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
    }
}

async fn status(State(state): State<StatusState>) -> (StatusCode, Json<serde_json::Value>) {
    let Some(status) = query(&state).await else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "stopped" })),
        );
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "running",
            "players": status.players,
            "collectibles": status.collectibles,
            "connections": status.connections,
            "sessionService": { "connected": status.session_connected },
            "rankingService": { "connected": status.ranking_connected },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

pub async fn serve(addr: &str, state: StatusState) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status endpoints on http://{}/status", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await
}
