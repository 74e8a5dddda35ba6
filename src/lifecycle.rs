//! Room lifecycle and access
//!
//! Ending rooms, listing a user's active rooms and fetching a room's
//! history. Every operation requires the caller to be a participant.

use std::sync::Arc;

use tracing::info;

use crate::error::ChatError;
use crate::identity::IdentityProvider;
use crate::room::{Participant, Room, RoomSummary, RoomView};
use crate::store::RoomStore;
use crate::types::{RoomId, UserId};

/// Default number of rooms returned by `list_active_rooms`
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Shown for participants missing from the directory
const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

pub struct RoomLifecycle {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RoomStore>,
    page_size: usize,
}

impl RoomLifecycle {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RoomStore>,
        page_size: usize,
    ) -> Self {
        Self {
            identity,
            store,
            page_size,
        }
    }

    /// End a room
    ///
    /// Fails with `AlreadyEnded` if the room was not active; the active
    /// flag never goes back to true.
    pub async fn end_room(&self, room_id: RoomId, caller: UserId) -> Result<(), ChatError> {
        self.load_for(room_id, caller).await?;

        let was_active = self.store.set_active(room_id, false).await?;
        if !was_active {
            return Err(ChatError::AlreadyEnded);
        }

        info!("Room {} ended by {}", room_id, caller);
        Ok(())
    }

    /// Active rooms of `user_id`, most recent activity first
    pub async fn list_active_rooms(&self, user_id: UserId) -> Result<Vec<RoomSummary>, ChatError> {
        let rooms = self
            .store
            .list_active_for_user(user_id, self.page_size)
            .await?;

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in &rooms {
            let participants = self.participants(room).await?;
            summaries.push(RoomSummary::new(room, participants));
        }
        Ok(summaries)
    }

    /// Room with full history
    pub async fn get_room(&self, room_id: RoomId, caller: UserId) -> Result<RoomView, ChatError> {
        let room = self.load_for(room_id, caller).await?;
        let participants = self.participants(&room).await?;
        Ok(RoomView::new(room, participants))
    }

    async fn load_for(&self, room_id: RoomId, caller: UserId) -> Result<Room, ChatError> {
        let room = self
            .store
            .get(room_id)
            .await?
            .ok_or(ChatError::RoomNotFound(room_id))?;

        if !room.contains(caller) {
            return Err(ChatError::Unauthorized);
        }
        Ok(room)
    }

    async fn participants(&self, room: &Room) -> Result<Vec<Participant>, ChatError> {
        let mut participants = Vec::with_capacity(room.participants.len());
        for id in room.participants {
            let display_name = self
                .identity
                .get_user(id)
                .await?
                .map(|u| u.display_name)
                .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string());
            participants.push(Participant { id, display_name });
        }
        Ok(participants)
    }
}
