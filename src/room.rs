//! Room struct definition
//!
//! Represents a persistent 1:1 chat room: two fixed participants,
//! an append-only message log and a one-way active flag.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ChatError;
use crate::types::{RoomId, UserId};

/// A message in a room's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub sender: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Unordered participant pair, stored sorted
///
/// Used as the key of the active-room index so that {A, B} and {B, A}
/// resolve to the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey(UserId, UserId);

impl PairKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

/// 1:1 Chat Room
///
/// Participants are fixed at creation. The room changes only through
/// `append` and `end`; nothing is ever removed.
#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub participants: [UserId; 2],
    pub messages: Vec<Message>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Room {
    /// Create a new active room with an empty log
    pub fn new(id: RoomId, participants: [UserId; 2]) -> Result<Self, ChatError> {
        if participants[0] == participants[1] {
            return Err(ChatError::InvalidParticipants);
        }
        let now = Utc::now();
        Ok(Self {
            id,
            participants,
            messages: Vec::new(),
            is_active: true,
            created_at: now,
            last_activity: now,
        })
    }

    /// Check if a user is one of the two participants
    pub fn contains(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// Get the other participant for a given user
    ///
    /// Returns None if the user is not in the room.
    pub fn partner_of(&self, user_id: UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(self.participants[0], self.participants[1])
    }

    /// Append a message to the log
    ///
    /// Rejects senders outside the room and any append after the room ended.
    pub fn append(
        &mut self,
        sender: UserId,
        content: String,
        timestamp: DateTime<Utc>,
    ) -> Result<Message, ChatError> {
        if !self.contains(sender) {
            return Err(ChatError::Unauthorized);
        }
        if !self.is_active {
            return Err(ChatError::RoomEnded);
        }
        let message = Message {
            sender,
            content,
            timestamp,
        };
        self.messages.push(message.clone());
        // Stamps are taken before the store lock, so they can arrive out of order
        self.last_activity = self.last_activity.max(timestamp);
        Ok(message)
    }

    /// Mark the room as ended
    ///
    /// Returns the previous value of the active flag.
    pub fn end(&mut self) -> bool {
        std::mem::replace(&mut self.is_active, false)
    }
}

/// A participant with their resolved display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: UserId,
    pub display_name: String,
}

/// Room list entry
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub participants: Vec<Participant>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub last_message: Option<Message>,
}

impl RoomSummary {
    pub fn new(room: &Room, participants: Vec<Participant>) -> Self {
        Self {
            id: room.id,
            participants,
            is_active: room.is_active,
            created_at: room.created_at,
            last_activity: room.last_activity,
            message_count: room.messages.len(),
            last_message: room.messages.last().cloned(),
        }
    }
}

/// Full room with history, as returned by `get_room`
#[derive(Debug, Clone, Serialize)]
pub struct RoomView {
    pub id: RoomId,
    pub participants: Vec<Participant>,
    pub messages: Vec<Message>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl RoomView {
    pub fn new(room: Room, participants: Vec<Participant>) -> Self {
        Self {
            id: room.id,
            participants,
            messages: room.messages,
            is_active: room.is_active,
            created_at: room.created_at,
            last_activity: room.last_activity,
        }
    }
}
