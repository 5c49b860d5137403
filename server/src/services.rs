//! Typed access to the session and ranking services
//!
//! Thin wrappers over [`rpc::RpcClient`] that turn protocol responses into
//! plain values. Awaited calls return [`ServiceError`] on timeout or on a
//! response of the wrong shape; fire-and-forget calls never fail.

use log::{info, warn};
use rpc::{RpcClient, RpcConfig, RpcError};
use shared::{
    GameStatePatch, Position, RankingEvent, RankingProtocol, RankingRequest, RankingResponse,
    SavedGameState, Session, SessionId, SessionProtocol, SessionRequest, SessionResponse,
    Standings,
};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("unexpected response from {0} service")]
    UnexpectedResponse(&'static str),
}

#[derive(Clone)]
pub struct SessionClient {
    rpc: RpcClient<SessionProtocol>,
}

impl SessionClient {
    pub fn connect(addr: &str, config: RpcConfig) -> Self {
        // The session protocol has no events
        let (rpc, _events) = RpcClient::connect(addr, config);
        Self { rpc }
    }

    pub fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    pub async fn create(
        &self,
        player_id: u32,
        player_name: &str,
        state: SavedGameState,
    ) -> Result<SessionId, ServiceError> {
        let request = SessionRequest::Create {
            player_id,
            player_name: player_name.to_string(),
            state,
        };
        match self.rpc.call(request).await? {
            SessionResponse::Created { session_id } => Ok(session_id),
            _ => Err(ServiceError::UnexpectedResponse("session")),
        }
    }

    pub async fn get(&self, session_id: SessionId) -> Result<Option<Session>, ServiceError> {
        match self.rpc.call(SessionRequest::Get { session_id }).await? {
            SessionResponse::Session(session) => Ok(session),
            _ => Err(ServiceError::UnexpectedResponse("session")),
        }
    }

    pub async fn find_by_name(&self, player_name: &str) -> Result<Option<Session>, ServiceError> {
        let request = SessionRequest::FindByName {
            player_name: player_name.to_string(),
        };
        match self.rpc.call(request).await? {
            SessionResponse::Session(session) => Ok(session),
            _ => Err(ServiceError::UnexpectedResponse("session")),
        }
    }

    pub async fn reconnect(&self, session_id: SessionId) -> Result<bool, ServiceError> {
        match self.rpc.call(SessionRequest::Reconnect { session_id }).await? {
            SessionResponse::Ack { success } => Ok(success),
            _ => Err(ServiceError::UnexpectedResponse("session")),
        }
    }

    pub fn update(&self, session_id: SessionId, position: Position, score: u32) {
        self.rpc.notify(SessionRequest::Update {
            session_id,
            state: GameStatePatch {
                position: Some(position),
                score: Some(score),
            },
        });
    }

    pub fn disconnect(&self, session_id: SessionId) {
        self.rpc.notify(SessionRequest::Disconnect { session_id });
    }
}

#[derive(Clone)]
pub struct RankingClient {
    rpc: RpcClient<RankingProtocol>,
}

impl RankingClient {
    /// Returns the client and the stream of standings pushed by the service.
    pub fn connect(addr: &str, config: RpcConfig) -> (Self, mpsc::UnboundedReceiver<RankingEvent>) {
        let (rpc, events) = RpcClient::connect(addr, config);
        (Self { rpc }, events)
    }

    pub fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    pub async fn update(&self, id: SessionId, name: &str, score: u32) -> Result<(), ServiceError> {
        let request = RankingRequest::Update {
            id,
            name: name.to_string(),
            score,
        };
        self.expect_ack(request).await.map(|_| ())
    }

    /// `Ok(false)` means the service has no record of this player.
    pub async fn online(&self, id: SessionId) -> Result<bool, ServiceError> {
        self.expect_ack(RankingRequest::Online { id }).await
    }

    pub async fn offline(&self, id: SessionId) -> Result<bool, ServiceError> {
        self.expect_ack(RankingRequest::Offline { id }).await
    }

    pub async fn standings(&self) -> Result<Standings, ServiceError> {
        match self.rpc.call(RankingRequest::Get).await? {
            RankingResponse::Standings(standings) => Ok(standings),
            _ => Err(ServiceError::UnexpectedResponse("ranking")),
        }
    }

    async fn expect_ack(&self, request: RankingRequest) -> Result<bool, ServiceError> {
        match self.rpc.call(request).await? {
            RankingResponse::Ack { success } => Ok(success),
            _ => Err(ServiceError::UnexpectedResponse("ranking")),
        }
    }
}

/// Outcome of matching a joining player against stored sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResolution {
    pub session_id: SessionId,
    pub restored: Option<SavedGameState>,
    pub is_reconnection: bool,
}

/// Finds the player's previous session, or opens a new one.
///
/// A resume token is honoured only if it belongs to a session with the same
/// name; otherwise the most recent session under that name is used. When the
/// session service cannot be reached the player still gets in, with a fresh
/// local id that is simply never persisted.
pub async fn resolve_join(
    sessions: &SessionClient,
    player_id: u32,
    name: &str,
    resume_token: Option<SessionId>,
    spawn: Position,
) -> JoinResolution {
    match find_existing(sessions, name, resume_token).await {
        Ok(Some(session)) => match sessions.reconnect(session.session_id).await {
            Ok(true) => {
                info!("{} resumed session {}", name, session.session_id);
                return JoinResolution {
                    session_id: session.session_id,
                    restored: Some(session.game_state),
                    is_reconnection: true,
                };
            }
            Ok(false) => info!("Session {} vanished, starting fresh", session.session_id),
            Err(e) => warn!("Reconnect for {} failed: {}", name, e),
        },
        Ok(None) => {}
        Err(e) => warn!("Session lookup for {} failed: {}", name, e),
    }

    let initial = SavedGameState {
        position: Some(spawn),
        score: 0,
    };
    let session_id = match sessions.create(player_id, name, initial).await {
        Ok(session_id) => session_id,
        Err(e) => {
            let session_id = Uuid::new_v4();
            warn!(
                "Could not create session for {} ({}), using local id {}",
                name, e, session_id
            );
            session_id
        }
    };

    JoinResolution {
        session_id,
        restored: None,
        is_reconnection: false,
    }
}

async fn find_existing(
    sessions: &SessionClient,
    name: &str,
    resume_token: Option<SessionId>,
) -> Result<Option<Session>, ServiceError> {
    if let Some(token) = resume_token {
        match sessions.get(token).await? {
            Some(session) if session.player_name == name => return Ok(Some(session)),
            Some(_) => warn!("Resume token {} does not belong to {}", token, name),
            None => info!("Resume token {} unknown", token),
        }
    }
    sessions.find_by_name(name).await
}
