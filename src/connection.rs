//! Connection struct definition
//!
//! Represents one authenticated live connection as seen by the session hub.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{ConnectionId, RoomId, UserId};

/// Live connection state held by the hub
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Owning user (fixed once authenticated)
    pub user_id: UserId,
    /// Hub → connection event channel
    pub sender: mpsc::Sender<ServerMessage>,
    /// Rooms this connection is subscribed to
    pub rooms: HashSet<RoomId>,
    /// Rooms this connection is currently typing in
    pub typing_in: HashSet<RoomId>,
}

impl Connection {
    pub fn new(id: ConnectionId, user_id: UserId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            user_id,
            sender,
            rooms: HashSet::new(),
            typing_in: HashSet::new(),
        }
    }

    /// Hand an event to this connection without waiting
    ///
    /// Delivery is at-most-once: a full or closed channel loses the event.
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::ChannelFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    pub fn is_subscribed(&self, room_id: RoomId) -> bool {
        self.rooms.contains(&room_id)
    }

    /// Update typing state, returning whether it changed
    pub fn set_typing(&mut self, room_id: RoomId, is_typing: bool) -> bool {
        if is_typing {
            self.typing_in.insert(room_id)
        } else {
            self.typing_in.remove(&room_id)
        }
    }
}
