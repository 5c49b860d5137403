//! Caller side of a service connection

use crate::framing::{read_frame, write_frame, FramingError};
use crate::{Frame, ProtocolFrame, RpcError};
use log::{debug, info, warn};
use shared::{Protocol, RPC_CALL_TIMEOUT, RPC_RETRY_DELAY};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, Copy)]
pub struct RpcConfig {
    /// How long [`RpcClient::call`] waits for an acknowledgement.
    pub call_timeout: Duration,
    /// Pause between reconnection attempts.
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: RPC_CALL_TIMEOUT,
            retry_delay: RPC_RETRY_DELAY,
        }
    }
}

type Pending<P> = Arc<Mutex<HashMap<u64, oneshot::Sender<<P as Protocol>::Response>>>>;

/// Handle to a remote service; cheap to clone, all clones share one connection.
pub struct RpcClient<P: Protocol> {
    outgoing: mpsc::UnboundedSender<ProtocolFrame<P>>,
    pending: Pending<P>,
    next_id: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    config: RpcConfig,
}

impl<P: Protocol> Clone for RpcClient<P> {
    fn clone(&self) -> Self {
        Self {
            outgoing: self.outgoing.clone(),
            pending: Arc::clone(&self.pending),
            next_id: Arc::clone(&self.next_id),
            connected: Arc::clone(&self.connected),
            config: self.config,
        }
    }
}

impl<P: Protocol> RpcClient<P> {
    /// Starts the background connection task and returns the client together
    /// with the stream of events pushed by the service.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Must be called from within a Tokio runtime.
    pub fn connect(
        addr: impl Into<String>,
        config: RpcConfig,
    ) -> (Self, mpsc::UnboundedReceiver<P::Event>) {
        let addr = addr.into();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: Pending<P> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(connection_task::<P>(
            addr,
            config.retry_delay,
            outgoing_rx,
            Arc::clone(&pending),
            Arc::clone(&connected),
            events_tx,
        ));

        let client = Self {
            outgoing,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            connected,
            config,
        };

        (client, events_rx)
    }

    /// Sends a request and waits for its acknowledgement.
    pub async fn call(&self, request: P::Request) -> Result<P::Response, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self
            .outgoing
            .send(Frame::Request { id, body: request })
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::Closed);
        }

        match timeout(self.config.call_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                debug!("{} request {} timed out", P::NAME, id);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Sends a request without waiting for the acknowledgement.
    pub fn notify(&self, request: P::Request) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self
            .outgoing
            .send(Frame::Request { id, body: request })
            .is_err()
        {
            debug!("Dropping {} notification, client task is gone", P::NAME);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Keeps a connection to the service alive for as long as any client handle exists.
async fn connection_task<P: Protocol>(
    addr: String,
    retry_delay: Duration,
    mut outgoing: mpsc::UnboundedReceiver<ProtocolFrame<P>>,
    pending: Pending<P>,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<P::Event>,
) {
    let mut failed_attempts = 0u32;

    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY: {}", e);
                }
                info!("Connected to {} service at {}", P::NAME, addr);
                failed_attempts = 0;
                connected.store(true, Ordering::SeqCst);

                let shutdown = run_connection::<P>(stream, &mut outgoing, &pending, &events).await;
                connected.store(false, Ordering::SeqCst);

                if shutdown {
                    debug!("{} client shut down", P::NAME);
                    return;
                }
                warn!(
                    "Lost connection to {} service at {}, retrying every {:?}",
                    P::NAME,
                    addr,
                    retry_delay
                );
            }
            Err(e) => {
                if failed_attempts == 0 {
                    warn!("{} service unreachable at {}: {}", P::NAME, addr, e);
                } else {
                    debug!("{} service still unreachable at {}: {}", P::NAME, addr, e);
                }
                failed_attempts = failed_attempts.saturating_add(1);
            }
        }

        sleep(retry_delay).await;

        // Requests queued during the outage are dropped; awaiting callers time out.
        loop {
            match outgoing.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }
    }
}

/// Pumps one live connection. Returns true when every client handle is gone.
async fn run_connection<P: Protocol>(
    stream: TcpStream,
    outgoing: &mut mpsc::UnboundedReceiver<ProtocolFrame<P>>,
    pending: &Pending<P>,
    events: &mpsc::UnboundedSender<P::Event>,
) -> bool {
    let (reader, mut writer) = stream.into_split();
    let mut reader_task = tokio::spawn(read_loop::<P>(
        reader,
        Arc::clone(pending),
        events.clone(),
    ));

    let shutdown = loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        warn!("Failed to write to {} service: {}", P::NAME, e);
                        break false;
                    }
                }
                None => break true,
            },
            _ = &mut reader_task => break false,
        }
    };

    reader_task.abort();
    shutdown
}

async fn read_loop<P: Protocol>(
    mut reader: OwnedReadHalf,
    pending: Pending<P>,
    events: mpsc::UnboundedSender<P::Event>,
) {
    loop {
        match read_frame::<_, ProtocolFrame<P>>(&mut reader).await {
            Ok(Frame::Response { id, body }) => {
                // Unknown ids belong to notifications or calls that already timed out
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(body);
                }
            }
            Ok(Frame::Event(event)) => {
                let _ = events.send(event);
            }
            Ok(Frame::Request { id, .. }) => {
                warn!("Ignoring unexpected request {} from {} service", id, P::NAME);
            }
            Err(FramingError::ConnectionClosed) => {
                debug!("{} service closed the connection", P::NAME);
                return;
            }
            Err(e) => {
                warn!("Error reading from {} service: {}", P::NAME, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{SessionProtocol, SessionRequest};

    fn fast_config() -> RpcConfig {
        RpcConfig {
            call_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_call_to_unreachable_service_times_out() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (client, _events) = RpcClient::<SessionProtocol>::connect(addr.to_string(), fast_config());
        let result = client.call(SessionRequest::Stats).await;

        assert!(matches!(result, Err(RpcError::Timeout)));
        assert!(!client.is_connected());
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_notify_never_blocks() {
        let (client, _events) =
            RpcClient::<SessionProtocol>::connect("127.0.0.1:1", fast_config());
        for _ in 0..100 {
            client.notify(SessionRequest::Stats);
        }
        assert!(!client.is_connected());
    }

    #[test]
    fn test_default_config() {
        let config = RpcConfig::default();
        assert_eq!(config.call_timeout, RPC_CALL_TIMEOUT);
        assert_eq!(config.retry_delay, RPC_RETRY_DELAY);
    }
}
