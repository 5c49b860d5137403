//! Service side of the RPC transport
//!
//! Accepts caller connections and forwards every request to the service's
//! event loop as an [`Inbound`]. Events published on the server's broadcast
//! channel are pushed to all connected callers.

use crate::framing::{read_frame, write_frame, FramingError};
use crate::{Frame, ProtocolFrame};
use log::{debug, error, info, warn};
use shared::Protocol;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};

const EVENT_BUFFER: usize = 64;

/// A request waiting to be answered by the owning event loop.
pub struct Inbound<P: Protocol> {
    pub request: P::Request,
    pub reply: oneshot::Sender<P::Response>,
}

impl<P: Protocol> Inbound<P> {
    pub fn new(request: P::Request) -> (Self, oneshot::Receiver<P::Response>) {
        let (reply, rx) = oneshot::channel();
        (Self { request, reply }, rx)
    }
}

pub struct RpcServer<P: Protocol> {
    listener: TcpListener,
    inbound: mpsc::UnboundedSender<Inbound<P>>,
    events: broadcast::Sender<P::Event>,
    connections: Arc<AtomicUsize>,
}

impl<P: Protocol> RpcServer<P> {
    pub async fn bind(addr: &str, inbound: mpsc::UnboundedSender<Inbound<P>>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, inbound))
    }

    pub fn from_listener(listener: TcpListener, inbound: mpsc::UnboundedSender<Inbound<P>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            listener,
            inbound,
            events,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sender used by the service loop to push events to every caller.
    pub fn events(&self) -> broadcast::Sender<P::Event> {
        self.events.clone()
    }

    /// Live count of connected callers.
    pub fn connections(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connections)
    }

    pub async fn run(self) {
        info!("{} service accepting connections", P::NAME);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    tokio::spawn(handle_connection::<P>(
                        stream,
                        addr,
                        self.inbound.clone(),
                        self.events.subscribe(),
                        Arc::clone(&self.connections),
                    ));
                }
                Err(e) => {
                    error!("Failed to accept {} connection: {}", P::NAME, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection<P: Protocol>(
    stream: TcpStream,
    addr: SocketAddr,
    inbound: mpsc::UnboundedSender<Inbound<P>>,
    mut events: broadcast::Receiver<P::Event>,
    connections: Arc<AtomicUsize>,
) {
    let count = connections.fetch_add(1, Ordering::SeqCst) + 1;
    info!("Caller {} connected to {} service ({} connected)", addr, P::NAME, count);

    let (mut reader, mut writer) = stream.into_split();
    let (responses_tx, mut responses) = mpsc::unbounded_channel::<ProtocolFrame<P>>();

    let mut reader_task = tokio::spawn(async move {
        loop {
            match read_frame::<_, ProtocolFrame<P>>(&mut reader).await {
                Ok(Frame::Request { id, body }) => {
                    let (request, reply) = Inbound::<P>::new(body);
                    if inbound.send(request).is_err() {
                        warn!("{} service loop has stopped", P::NAME);
                        return;
                    }

                    let responses_tx = responses_tx.clone();
                    tokio::spawn(async move {
                        if let Ok(body) = reply.await {
                            let _ = responses_tx.send(Frame::Response { id, body });
                        }
                    });
                }
                Ok(_) => warn!("Ignoring non-request frame from {}", addr),
                Err(FramingError::ConnectionClosed) => return,
                Err(e) => {
                    warn!("Error reading from {}: {}", addr, e);
                    return;
                }
            }
        }
    });

    loop {
        tokio::select! {
            frame = responses.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        warn!("Failed to answer {}: {}", addr, e);
                        break;
                    }
                }
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let frame: ProtocolFrame<P> = Frame::Event(event);
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        warn!("Failed to push event to {}: {}", addr, e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Caller {} lagging, skipped {} events", addr, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut reader_task => break,
        }
    }

    reader_task.abort();
    let count = connections.fetch_sub(1, Ordering::SeqCst) - 1;
    info!("Caller {} left {} service ({} connected)", addr, P::NAME, count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RpcClient, RpcConfig};
    use shared::{
        RankingEvent, RankingProtocol, RankingRequest, RankingResponse, SessionProtocol,
        SessionRequest, SessionResponse, SessionStats, Standings,
    };

    fn test_config() -> RpcConfig {
        RpcConfig {
            call_timeout: Duration::from_millis(500),
            retry_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_request_reaches_loop_and_reply_returns() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound<SessionProtocol>>();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = RpcServer::from_listener(listener, inbound_tx);
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        tokio::spawn(async move {
            while let Some(Inbound { request, reply }) = inbound_rx.recv().await {
                let response = match request {
                    SessionRequest::Stats => SessionResponse::Stats(SessionStats {
                        total_sessions: 4,
                        online_players: 1,
                        offline_players: 3,
                    }),
                    _ => SessionResponse::Ack { success: false },
                };
                let _ = reply.send(response);
            }
        });

        let (client, _events) = RpcClient::<SessionProtocol>::connect(addr.to_string(), test_config());
        match client.call(SessionRequest::Stats).await.unwrap() {
            SessionResponse::Stats(stats) => assert_eq!(stats.total_sessions, 4),
            other => panic!("Unexpected response {:?}", other),
        }
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_events_are_pushed_to_callers() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound<RankingProtocol>>();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = RpcServer::from_listener(listener, inbound_tx);
        let addr = server.local_addr().unwrap();
        let events = server.events();
        let connections = server.connections();
        tokio::spawn(server.run());

        tokio::spawn(async move {
            while let Some(Inbound { reply, .. }) = inbound_rx.recv().await {
                let _ = reply.send(RankingResponse::Ack { success: true });
            }
        });

        let (client, mut client_events) =
            RpcClient::<RankingProtocol>::connect(addr.to_string(), test_config());
        // A completed call proves the connection is registered
        client.call(RankingRequest::Get).await.unwrap();
        assert_eq!(connections.load(Ordering::SeqCst), 1);

        let standings = Standings {
            online_count: 2,
            ..Standings::default()
        };
        events.send(RankingEvent::Standings(standings)).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), client_events.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            RankingEvent::Standings(s) => assert_eq!(s.online_count, 2),
        }
    }

    #[tokio::test]
    async fn test_client_reconnects_after_service_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (client, _events) = RpcClient::<SessionProtocol>::connect(addr.to_string(), test_config());
        assert!(matches!(
            client.call(SessionRequest::Stats).await,
            Err(crate::RpcError::Timeout)
        ));

        // Service comes up on the same port
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound<SessionProtocol>>();
        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(RpcServer::from_listener(listener, inbound_tx).run());
        tokio::spawn(async move {
            while let Some(Inbound { reply, .. }) = inbound_rx.recv().await {
                let _ = reply.send(SessionResponse::Ack { success: true });
            }
        });

        let mut answered = false;
        for _ in 0..20 {
            if let Ok(SessionResponse::Ack { success }) = client.call(SessionRequest::Stats).await {
                answered = success;
                break;
            }
        }
        assert!(answered);
    }
}
