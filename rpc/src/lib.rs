//! # Service RPC Transport
//!
//! A persistent, bidirectional request/acknowledgement channel between the game
//! server and its auxiliary services. Every message travels as a bincode
//! encoded [`Frame`] inside a length-prefixed TCP record.
//!
//! ## Delivery semantics
//!
//! - [`RpcClient::call`] resolves exactly once: with the peer's response, or
//!   with [`RpcError::Timeout`] when no response arrives in time. Nothing is
//!   retried automatically.
//! - [`RpcClient::notify`] is fire-and-forget; the response, if any, is dropped.
//! - Services push [`Protocol::Event`]s to every connected caller.
//!
//! ## Reconnection
//!
//! The client owns a background task that reconnects with a fixed delay
//! whenever the connection drops. Calls issued during an outage are discarded
//! by that task and surface to the caller as timeouts, never as connection
//! errors.
//!
//! The service side ([`RpcServer`]) does not process requests itself: it hands
//! each one, together with a reply slot, to the owning service's event loop.

pub mod client;
pub mod framing;
pub mod server;

pub use client::{RpcClient, RpcConfig};
pub use framing::FramingError;
pub use server::{Inbound, RpcServer};

use serde::{Deserialize, Serialize};

/// Envelope for everything sent over a service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame<Req, Resp, Evt> {
    Request { id: u64, body: Req },
    Response { id: u64, body: Resp },
    Event(Evt),
}

/// Frame type of a given protocol.
pub type ProtocolFrame<P> = Frame<
    <P as shared::Protocol>::Request,
    <P as shared::Protocol>::Response,
    <P as shared::Protocol>::Event,
>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("request timed out")]
    Timeout,
    #[error("client task has shut down")]
    Closed,
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{SessionProtocol, SessionRequest, SessionResponse};

    #[test]
    fn test_frame_roundtrip() {
        let frame: ProtocolFrame<SessionProtocol> = Frame::Request {
            id: 9,
            body: SessionRequest::FindByName {
                player_name: "Alice".to_string(),
            },
        };
        let data = bincode::serialize(&frame).unwrap();
        let decoded: ProtocolFrame<SessionProtocol> = bincode::deserialize(&data).unwrap();

        match decoded {
            Frame::Request {
                id,
                body: SessionRequest::FindByName { player_name },
            } => {
                assert_eq!(id, 9);
                assert_eq!(player_name, "Alice");
            }
            other => panic!("Unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_response_frame_roundtrip() {
        let frame: ProtocolFrame<SessionProtocol> = Frame::Response {
            id: 3,
            body: SessionResponse::Ack { success: false },
        };
        let data = bincode::serialize(&frame).unwrap();
        let decoded: ProtocolFrame<SessionProtocol> = bincode::deserialize(&data).unwrap();
        assert!(matches!(
            decoded,
            Frame::Response {
                id: 3,
                body: SessionResponse::Ack { success: false }
            }
        ));
    }
}
