//! # Game Client Library
//!
//! Client side of the game: a predictor that moves the local player
//! immediately, a mirror of the world the server broadcasts, and a macroquad
//! front-end that draws both.
//!
//! ## Client-Side Prediction
//! Clicking sets a destination. Every prediction tick moves the local player
//! a fixed step toward it and the new position is rendered right away. Moves
//! go to the server at a throttled rate, so drawing stays smooth without
//! flooding the network.
//!
//! ## Reconciliation
//! The server stays authoritative. When it reports a position for the local
//! player that differs from the prediction by more than a threshold, the
//! prediction snaps to it. Small differences are left alone.
//!
//! ## Speculative Collection
//! Walking over a collectible fades it out and adds its points to the shown
//! score, marked with `*`, until the server confirms the pickup.
//!
//! ## Module Organization
//!
//! - `game`: prediction state and packet handling, no I/O
//! - `input`: mouse destination and toggle keys
//! - `network`: UDP on a background thread
//! - `rendering`: macroquad drawing
//!
//! ## Usage Example
//!
//! ```rust
//! use client::game::ClientGameState;
//! use shared::Position;
//!
//! let mut game = ClientGameState::new("Alice");
//!
//! // Not joined yet, so the first tick asks to join
//! let outgoing = game.tick(0);
//! assert_eq!(outgoing.len(), 1);
//!
//! game.set_destination(Position::new(400.0, 300.0));
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod rendering;
