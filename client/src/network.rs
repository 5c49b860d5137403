//! UDP link to the game server, run on its own thread
//!
//! The render loop is synchronous, so the socket lives on a background
//! thread with a small tokio runtime. Packets cross over through unbounded
//! channels; the render loop drains them with `try_recv` once per frame.

use bincode::{deserialize, serialize};
use log::{debug, error, info};
use shared::{Packet, MAX_PACKET_SIZE};
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::sleep;

pub struct NetworkHandle {
    outgoing: mpsc::UnboundedSender<Packet>,
    incoming: mpsc::UnboundedReceiver<Packet>,
}

impl NetworkHandle {
    /// Binds a local socket and starts the network thread.
    ///
    /// `fake_ping_ms` delays each direction by half the value, to make
    /// prediction visible on a local setup.
    pub fn spawn(server_addr: SocketAddr, fake_ping_ms: u64) -> std::io::Result<Self> {
        let socket = StdUdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("network".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    match UdpSocket::from_std(socket) {
                        Ok(socket) => {
                            run(socket, server_addr, fake_ping_ms, outgoing_rx, incoming_tx).await
                        }
                        Err(e) => error!("Failed to register socket: {}", e),
                    }
                });
            })?;

        info!("Network thread started on {} for {}", local_addr, server_addr);

        Ok(Self {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }

    pub fn send(&self, packet: Packet) {
        if self.outgoing.send(packet).is_err() {
            error!("Network thread has stopped");
        }
    }

    pub fn try_recv(&mut self) -> Option<Packet> {
        self.incoming.try_recv().ok()
    }
}

async fn run(
    socket: UdpSocket,
    server_addr: SocketAddr,
    fake_ping_ms: u64,
    mut outgoing: mpsc::UnboundedReceiver<Packet>,
    incoming: mpsc::UnboundedSender<Packet>,
) {
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((len, from)) if from == server_addr => {
                        if fake_ping_ms > 0 {
                            sleep(Duration::from_millis(fake_ping_ms / 2)).await;
                        }
                        match deserialize::<Packet>(&buffer[..len]) {
                            Ok(packet) => {
                                if incoming.send(packet).is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("Dropping malformed packet: {}", e),
                        }
                    }
                    Ok((_, from)) => debug!("Ignoring datagram from {}", from),
                    Err(e) => error!("Error receiving packet: {}", e),
                }
            },

            packet = outgoing.recv() => {
                let Some(packet) = packet else {
                    break;
                };
                if fake_ping_ms > 0 {
                    sleep(Duration::from_millis(fake_ping_ms / 2)).await;
                }
                if let Err(e) = send_packet(&socket, &packet, server_addr).await {
                    error!("Failed to send packet: {}", e);
                }
            },
        }
    }

    debug!("Network thread exiting");
}

async fn send_packet(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}
