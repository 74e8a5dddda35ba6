//! Error types for the chat server
//!
//! Defines fatal transport errors, domain errors reported back to the
//! caller, and message delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::{RoomId, UserId};

/// Fatal or startup errors
///
/// These end a connection handler or stop the process; they are
/// never sent to a client.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Invalid configuration or user directory
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token could not be issued
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Domain errors
///
/// Reported synchronously to the caller of a request-style operation,
/// or sent back over the originating connection for real-time ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// No or invalid identity
    #[error("Authentication required")]
    Unauthenticated,

    /// Authenticate sent twice on one connection
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Authenticated but not a participant of the room
    #[error("Not a participant of this room")]
    Unauthorized,

    /// Room absent
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// User absent from the directory
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Candidate pool is empty
    #[error("No partner available")]
    NoPartnerAvailable,

    /// Empty or oversized message
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Mutation attempted on an ended room
    #[error("Room has ended")]
    RoomEnded,

    /// End requested on a room that has already ended
    #[error("Room already ended")]
    AlreadyEnded,

    /// An active room for the pair was created concurrently
    #[error("Active room already exists for this pair: {existing}")]
    ConcurrencyConflict { existing: RoomId },

    /// A room needs two distinct participants
    #[error("A room needs two distinct participants")]
    InvalidParticipants,

    /// Unexpected failure of a collaborator
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Message send errors
///
/// Occurs when an event cannot be handed to a connection's channel.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection is not draining its channel fast enough
    #[error("Channel full")]
    ChannelFull,
}
