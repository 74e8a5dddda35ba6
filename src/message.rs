//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::matcher::MatchOutcome;
use crate::room::{Message, RoomSummary, RoomView};
use crate::types::{RoomId, UserId};

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present a credential token (required before anything else)
    Authenticate { token: String },
    /// Ask for a random partner
    RequestMatch,
    /// List own active rooms
    ListRooms,
    /// Fetch a room with its history
    GetRoom { room_id: RoomId },
    /// End a room
    EndRoom { room_id: RoomId },
    /// Subscribe this connection to a room's live events
    Join { room_id: RoomId },
    /// Unsubscribe from a room
    Leave { room_id: RoomId },
    /// Send a chat message
    Send { room_id: RoomId, content: String },
    /// Indicate typing started
    Typing { room_id: RoomId },
    /// Indicate typing stopped
    StopTyping { room_id: RoomId },
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted, connection ID issued
    Connected { connection_id: String },
    /// Token accepted
    Authenticated { user_id: UserId, display_name: String },
    /// Partner found
    Matched {
        room_id: RoomId,
        partner_id: UserId,
        partner_display_name: String,
    },
    /// Active rooms, most recent first
    Rooms { rooms: Vec<RoomSummary> },
    /// A room with its history
    Room { room: RoomView },
    /// Subscribed to a room
    Joined { room_id: RoomId },
    /// Unsubscribed from a room
    Left { room_id: RoomId },
    /// New message in a subscribed room
    MessageReceived { room_id: RoomId, message: Message },
    /// Someone in the room started or stopped typing
    TypingIndicator {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },
    /// A room was ended
    RoomEnded { room_id: RoomId, ended_by: UserId },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

impl From<MatchOutcome> for ServerMessage {
    fn from(outcome: MatchOutcome) -> Self {
        ServerMessage::Matched {
            room_id: outcome.room_id,
            partner_id: outcome.partner_id,
            partner_display_name: outcome.partner_display_name,
        }
    }
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    AlreadyAuthenticated,
    Unauthorized,
    NotFound,
    NoPartnerAvailable,
    InvalidContent,
    RoomEnded,
    AlreadyEnded,
    ConcurrencyConflict,
    /// Malformed frame
    InvalidMessage,
    InternalError,
}

/// Convert ChatError to ServerMessage for client notification
impl From<ChatError> for ServerMessage {
    fn from(err: ChatError) -> Self {
        let code = match &err {
            ChatError::Unauthenticated => ErrorCode::Unauthenticated,
            ChatError::AlreadyAuthenticated => ErrorCode::AlreadyAuthenticated,
            ChatError::Unauthorized => ErrorCode::Unauthorized,
            ChatError::RoomNotFound(_) | ChatError::UserNotFound(_) => ErrorCode::NotFound,
            ChatError::NoPartnerAvailable => ErrorCode::NoPartnerAvailable,
            ChatError::InvalidContent(_) => ErrorCode::InvalidContent,
            ChatError::RoomEnded => ErrorCode::RoomEnded,
            ChatError::AlreadyEnded => ErrorCode::AlreadyEnded,
            ChatError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            ChatError::InvalidParticipants => ErrorCode::InvalidMessage,
            ChatError::Internal(_) => ErrorCode::InternalError,
        };
        // Internal details stay in the logs
        let message = match err {
            ChatError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        ServerMessage::Error { code, message }
    }
}

impl From<serde_json::Error> for ServerMessage {
    fn from(err: serde_json::Error) -> Self {
        ServerMessage::Error {
            code: ErrorCode::InvalidMessage,
            message: format!("Invalid message format: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_deserialize() {
        let room_id = RoomId::new();
        let json = format!(r#"{{"type": "send", "room_id": "{room_id}", "content": "hi"}}"#);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        match msg {
            ClientMessage::Send { room_id: id, content } => {
                assert_eq!(id, room_id);
                assert_eq!(content, "hi");
            }
            _ => panic!("Wrong variant"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "request_match"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::RequestMatch));
    }

    #[test]
    fn test_bad_room_id_rejected() {
        let json = r#"{"type": "join", "room_id": "nope"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn test_server_message_serialize() {
        let room_id = RoomId::new();
        let user_id = UserId::new();
        let msg = ServerMessage::TypingIndicator {
            room_id,
            user_id,
            is_typing: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"typing_indicator\""));
        assert!(json.contains(&format!("\"user_id\":\"{user_id}\"")));
        assert!(json.contains("\"is_typing\":true"));
    }

    #[test]
    fn test_error_code_serialize() {
        let msg: ServerMessage = ChatError::RoomNotFound(RoomId::new()).into();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"code\":\"not_found\""));

        let msg: ServerMessage = ChatError::AlreadyEnded.into();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"code\":\"already_ended\""));
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let msg: ServerMessage = ChatError::Internal("db exploded".to_string()).into();
        match msg {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, ErrorCode::InternalError);
                assert!(!message.contains("db exploded"));
            }
            _ => panic!("Wrong variant"),
        }
    }
}
