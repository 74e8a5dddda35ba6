//! Room persistence
//!
//! `RoomStore` is the seam to the durable store. `MemoryRoomStore` keeps
//! everything behind a single lock, which gives every operation the
//! atomicity the matcher and hub rely on:
//! - `append_message` checks membership and the active flag and pushes
//!   in one step, so concurrent sends are never lost
//! - `create` enforces at most one active room per participant pair

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ChatError;
use crate::room::{Message, PairKey, Room};
use crate::types::{RoomId, UserId};

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Active room whose participants are exactly {a, b}
    async fn find_active_room_for_pair(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Room>, ChatError>;

    /// Persist a new active room
    ///
    /// Fails with `ConcurrencyConflict` if the pair already has an active room.
    async fn create(&self, participants: [UserId; 2]) -> Result<Room, ChatError>;

    async fn get(&self, room_id: RoomId) -> Result<Option<Room>, ChatError>;

    /// Atomically append a message and bump `last_activity`
    async fn append_message(
        &self,
        room_id: RoomId,
        sender: UserId,
        content: String,
        timestamp: DateTime<Utc>,
    ) -> Result<Message, ChatError>;

    /// Set the active flag, returning its previous value
    ///
    /// Ending is terminal: reactivating an ended room fails with `RoomEnded`.
    async fn set_active(&self, room_id: RoomId, active: bool) -> Result<bool, ChatError>;

    /// Active rooms of a user, most recent activity first
    async fn list_active_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Room>, ChatError>;
}

#[derive(Debug, Default)]
struct StoreInner {
    rooms: HashMap<RoomId, Room>,
    /// Pair -> its single active room
    active_pairs: HashMap<PairKey, RoomId>,
    /// User -> their active rooms; ended rooms are dropped on `set_active`
    active_by_user: HashMap<UserId, HashSet<RoomId>>,
}

/// In-process room store
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    inner: RwLock<StoreInner>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rooms ever created, ended ones included
    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn find_active_room_for_pair(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Room>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner
            .active_pairs
            .get(&PairKey::new(a, b))
            .and_then(|id| inner.rooms.get(id))
            .cloned())
    }

    async fn create(&self, participants: [UserId; 2]) -> Result<Room, ChatError> {
        let room = Room::new(RoomId::new(), participants)?;
        let key = room.pair_key();

        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.active_pairs.get(&key) {
            return Err(ChatError::ConcurrencyConflict {
                existing: *existing,
            });
        }

        inner.active_pairs.insert(key, room.id);
        for user in participants {
            inner.active_by_user.entry(user).or_default().insert(room.id);
        }
        inner.rooms.insert(room.id, room.clone());

        debug!("Room {} created for {} and {}", room.id, participants[0], participants[1]);
        Ok(room)
    }

    async fn get(&self, room_id: RoomId) -> Result<Option<Room>, ChatError> {
        Ok(self.inner.read().await.rooms.get(&room_id).cloned())
    }

    async fn append_message(
        &self,
        room_id: RoomId,
        sender: UserId,
        content: String,
        timestamp: DateTime<Utc>,
    ) -> Result<Message, ChatError> {
        let mut inner = self.inner.write().await;
        let room = inner
            .rooms
            .get_mut(&room_id)
            .ok_or(ChatError::RoomNotFound(room_id))?;
        room.append(sender, content, timestamp)
    }

    async fn set_active(&self, room_id: RoomId, active: bool) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        let room = inner
            .rooms
            .get_mut(&room_id)
            .ok_or(ChatError::RoomNotFound(room_id))?;

        if active {
            return if room.is_active {
                Ok(true)
            } else {
                Err(ChatError::RoomEnded)
            };
        }

        let was_active = room.end();
        let key = room.pair_key();
        let participants = room.participants;
        if was_active {
            inner.active_pairs.remove(&key);
            for user in participants {
                if let Some(ids) = inner.active_by_user.get_mut(&user) {
                    ids.remove(&room_id);
                    if ids.is_empty() {
                        inner.active_by_user.remove(&user);
                    }
                }
            }
            debug!("Room {} deactivated", room_id);
        }
        Ok(was_active)
    }

    async fn list_active_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Room>, ChatError> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.active_by_user.get(&user_id) else {
            return Ok(Vec::new());
        };

        let mut rooms: Vec<Room> = ids
            .iter()
            .filter_map(|id| inner.rooms.get(id))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        rooms.truncate(limit);
        Ok(rooms)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn test_create_and_find_by_pair() {
        let store = MemoryRoomStore::new();
        let a = UserId::new();
        let b = UserId::new();

        assert!(store.find_active_room_for_pair(a, b).await.unwrap().is_none());

        let room = store.create([a, b]).await.unwrap();
        let found = store.find_active_room_for_pair(b, a).await.unwrap().unwrap();
        assert_eq!(found.id, room.id);
        assert_eq!(store.get(room.id).await.unwrap().unwrap().participants, [a, b]);
    }

    #[tokio::test]
    async fn test_create_conflicts_on_active_pair() {
        let store = MemoryRoomStore::new();
        let a = UserId::new();
        let b = UserId::new();

        let room = store.create([a, b]).await.unwrap();
        let err = store.create([b, a]).await.unwrap_err();
        assert_eq!(err, ChatError::ConcurrencyConflict { existing: room.id });
        assert_eq!(store.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_ended_pair_can_get_new_room() {
        let store = MemoryRoomStore::new();
        let a = UserId::new();
        let b = UserId::new();

        let first = store.create([a, b]).await.unwrap();
        assert!(store.set_active(first.id, false).await.unwrap());
        assert!(store.find_active_room_for_pair(a, b).await.unwrap().is_none());

        let second = store.create([a, b]).await.unwrap();
        assert_ne!(first.id, second.id);
        // Ended room is kept for history
        assert!(!store.get(first.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_set_active_is_terminal() {
        let store = MemoryRoomStore::new();
        let room = store.create([UserId::new(), UserId::new()]).await.unwrap();

        assert!(store.set_active(room.id, true).await.unwrap());
        assert!(store.set_active(room.id, false).await.unwrap());
        assert!(!store.set_active(room.id, false).await.unwrap());
        assert_eq!(
            store.set_active(room.id, true).await.unwrap_err(),
            ChatError::RoomEnded
        );
    }

    #[tokio::test]
    async fn test_append_checks() {
        let store = MemoryRoomStore::new();
        let a = UserId::new();
        let b = UserId::new();
        let room = store.create([a, b]).await.unwrap();

        let missing = RoomId::new();
        assert_eq!(
            store
                .append_message(missing, a, "x".into(), Utc::now())
                .await
                .unwrap_err(),
            ChatError::RoomNotFound(missing)
        );
        assert_eq!(
            store
                .append_message(room.id, UserId::new(), "x".into(), Utc::now())
                .await
                .unwrap_err(),
            ChatError::Unauthorized
        );

        store.set_active(room.id, false).await.unwrap();
        assert_eq!(
            store
                .append_message(room.id, a, "x".into(), Utc::now())
                .await
                .unwrap_err(),
            ChatError::RoomEnded
        );
        assert!(store.get(room.id).await.unwrap().unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let store = Arc::new(MemoryRoomStore::new());
        let a = UserId::new();
        let b = UserId::new();
        let room = store.create([a, b]).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            let sender = if i % 2 == 0 { a } else { b };
            tasks.push(tokio::spawn(async move {
                store
                    .append_message(room.id, sender, format!("msg {i}"), Utc::now())
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let room = store.get(room.id).await.unwrap().unwrap();
        assert_eq!(room.messages.len(), 50);
    }

    #[tokio::test]
    async fn test_list_active_sorted_and_limited() {
        let store = MemoryRoomStore::new();
        let me = UserId::new();
        let base = Utc::now();

        let mut ids = Vec::new();
        for i in 0..3 {
            let room = store.create([me, UserId::new()]).await.unwrap();
            store
                .append_message(room.id, me, "hi".into(), base + Duration::seconds(i))
                .await
                .unwrap();
            ids.push(room.id);
        }
        let ended = store.create([me, UserId::new()]).await.unwrap();
        store.set_active(ended.id, false).await.unwrap();

        let rooms = store.list_active_for_user(me, 20).await.unwrap();
        let listed: Vec<_> = rooms.iter().map(|r| r.id).collect();
        assert_eq!(listed, [ids[2], ids[1], ids[0]]);

        let rooms = store.list_active_for_user(me, 2).await.unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].id, ids[2]);

        assert!(store
            .list_active_for_user(UserId::new(), 20)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_ended_rooms_leave_user_index() {
        let store = MemoryRoomStore::new();
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();

        let ended = store.create([a, b]).await.unwrap();
        let kept = store.create([a, c]).await.unwrap();
        store.set_active(ended.id, false).await.unwrap();

        {
            let inner = store.inner.read().await;
            assert!(!inner.active_by_user[&a].contains(&ended.id));
            assert!(inner.active_by_user[&a].contains(&kept.id));
            assert!(!inner.active_by_user.contains_key(&b));
            // History is still there
            assert!(inner.rooms.contains_key(&ended.id));
        }

        let listed = store.list_active_for_user(a, 20).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);
        assert!(store.list_active_for_user(b, 20).await.unwrap().is_empty());
    }
}
