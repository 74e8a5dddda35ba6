//! Random partner matching
//!
//! Draws a partner uniformly from a bounded candidate pool and returns
//! the pair's active room, creating it when there is none.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::identity::{IdentityProvider, User};
use crate::room::Room;
use crate::store::RoomStore;
use crate::types::{RoomId, UserId};

/// Default upper bound on the candidate sample
pub const DEFAULT_CANDIDATE_POOL_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub room_id: RoomId,
    pub partner_id: UserId,
    pub partner_display_name: String,
}

pub struct Matcher {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RoomStore>,
    pool_size: usize,
}

impl Matcher {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RoomStore>,
        pool_size: usize,
    ) -> Self {
        Self {
            identity,
            store,
            pool_size,
        }
    }

    /// Pair the requester with a random other user
    ///
    /// Repeated requests for the same pair return the same room while it
    /// is active.
    pub async fn request_match(&self, requester: &User) -> Result<MatchOutcome, ChatError> {
        let pool = self.identity.candidates(requester.id, self.pool_size).await?;
        let partner = pool
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(ChatError::NoPartnerAvailable)?;

        debug!(
            "Drew {} for {} from {} candidates",
            partner.id,
            requester.id,
            pool.len()
        );

        let room = self.find_or_create(requester.id, partner.id).await?;
        info!("Matched {} with {} in room {}", requester.id, partner.id, room.id);

        Ok(MatchOutcome {
            room_id: room.id,
            partner_id: partner.id,
            partner_display_name: partner.display_name,
        })
    }

    async fn find_or_create(&self, a: UserId, b: UserId) -> Result<Room, ChatError> {
        if let Some(room) = self.store.find_active_room_for_pair(a, b).await? {
            return Ok(room);
        }

        match self.store.create([a, b]).await {
            Ok(room) => Ok(room),
            Err(ChatError::ConcurrencyConflict { existing }) => {
                debug!("Lost room creation race for {} / {}, using {}", a, b, existing);
                self.store
                    .get(existing)
                    .await?
                    .ok_or(ChatError::RoomNotFound(existing))
            }
            Err(e) => Err(e),
        }
    }
}
