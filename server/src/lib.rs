//! # Game Server Library
//!
//! The authoritative game server. It owns the live world (players and
//! collectibles), validates every movement intent against the speed bound,
//! resolves collections and broadcasts each change to the connected clients
//! over UDP.
//!
//! Two auxiliary services sit beside it. The session service remembers each
//! player's position and score between connections. The ranking service
//! keeps the leaderboards. Neither is required to play: if they are
//! unreachable, players still join with a fresh session id and the server
//! falls back to a leaderboard computed from the players it can see.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All world mutation happens on one task. Network I/O, timeouts, service
//! calls and ranking pushes run on their own tasks and talk to the loop
//! through [`network::ServerMessage`], so the world never needs a lock.
//!
//! ### Service Calls Off the Loop
//! Joining needs a session lookup, which is a network round trip. The lookup
//! runs in a spawned task and reports back with
//! [`network::ServerMessage::JoinResolved`]; meanwhile the connection sits in
//! the `Joining` state and receives no broadcasts.
//!
//! ## Module Organization
//!
//! - `client_manager`: connection table and its state machine
//! - `game`: world rules, free of I/O and clocks
//! - `services`: typed session and ranking clients plus join resolution
//! - `network`: UDP tasks and the main loop
//! - `http`: `/health` and `/status`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:3000".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod game;
pub mod http;
pub mod network;
pub mod services;
