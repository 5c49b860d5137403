//! Connection tracking for the game server
//!
//! A connection is identified by its UDP address and walks a small state
//! machine:
//!
//! ```text
//! Unauthenticated --Join--> Joining --session resolved--> Active --Leave/timeout--> Disconnected
//! ```
//!
//! Addresses the manager has never seen are `Unauthenticated`; removed
//! connections are dropped from the table entirely, so `Disconnected` is
//! terminal by construction. Only `Active` connections receive broadcasts.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Joining,
    Active,
    Disconnected,
}

#[derive(Debug)]
pub struct Client {
    /// Also used as the player id once the join completes.
    pub id: u32,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub state: ConnectionState,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            state: ConnectionState::Joining,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a joining connection. Returns `None` when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} joining from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let mut client = self.clients.remove(client_id)?;
        info!("Client {} disconnected", client.id);
        client.state = ConnectionState::Disconnected;
        Some(client)
    }

    /// Promotes a joining connection. Fails if it vanished in the meantime.
    pub fn activate(&mut self, client_id: &u32) -> bool {
        match self.clients.get_mut(client_id) {
            Some(client) if client.state == ConnectionState::Joining => {
                client.state = ConnectionState::Active;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, client_id: &u32) -> ConnectionState {
        self.clients
            .get(client_id)
            .map(|client| client.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Records activity from `addr`. Returns the client id if known.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<u32> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.last_seen = Instant::now();
        Some(client.id)
    }

    /// Removes and returns every client silent for longer than `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Addresses of active connections, the broadcast audience.
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .filter(|(_, client)| client.state == ConnectionState::Active)
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
