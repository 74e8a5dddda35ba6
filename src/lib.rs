//! Random 1:1 Chat Server Library
//!
//! Pairs strangers into persistent two-person rooms and relays their
//! messages in real time over WebSocket, built with tokio-tungstenite.
//!
//! # Features
//! - Token authentication against a user directory
//! - Random partner matching with reuse of the pair's active room
//! - Append-only room history
//! - Live message fan-out and typing indicators
//! - Ending rooms, listing active rooms, fetching history
//!
//! # Architecture
//! - `SessionHub` handles validate and persist messages, then hand them
//!   to the hub actor, which owns every live subscription
//! - `Matcher` and `RoomLifecycle` serve request-style operations
//! - `RoomStore` and `IdentityProvider` are the seams to persistence and
//!   identity; in-memory implementations ship with the crate
//! - Each connection runs a `handler` task that drives a `Session`
//!
//! Broadcast groups live in one process. Running several instances
//! needs a shared pub/sub layer behind the hub.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use roulette_chat::{handle_connection, AppState, ChatLimits, MemoryRoomStore, TokenIdentity};
//!
//! #[tokio::main]
//! async fn main() {
//!     let identity = Arc::new(TokenIdentity::new("secret", chrono::Duration::hours(24), users));
//!     let store = Arc::new(MemoryRoomStore::new());
//!     let (state, hub) = AppState::new(identity, store, &ChatLimits::default());
//!     tokio::spawn(hub.run());
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, state.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod hub;
pub mod identity;
pub mod lifecycle;
pub mod matcher;
pub mod message;
pub mod room;
pub mod session;
pub mod state;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{ChatLimits, Cli, Command};
pub use connection::Connection;
pub use error::{AppError, ChatError, SendError};
pub use handler::handle_connection;
pub use hub::{HubActor, HubCommand, HubStats, SessionHub};
pub use identity::{IdentityProvider, TokenIdentity, User};
pub use lifecycle::RoomLifecycle;
pub use matcher::{MatchOutcome, Matcher};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use room::{Message, Room, RoomSummary, RoomView};
pub use session::Session;
pub use state::AppState;
pub use store::{MemoryRoomStore, RoomStore};
pub use types::{ConnectionId, RoomId, UserId};
