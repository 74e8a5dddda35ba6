//! Session hub
//!
//! The hub actor owns the connection registry and the per-room
//! subscription groups. Connection handlers talk to it through the
//! cloneable `SessionHub` handle, which validates and persists messages
//! before asking the actor to fan them out.
//!
//! Broadcasts never wait on a subscriber: an event that does not fit in a
//! connection's channel is dropped for that connection only. The message
//! itself is already stored and can be fetched with `get_room`.
//!
//! Messages from one connection are appended and then queued to the actor
//! in the order they were sent, so a single sender's messages are
//! delivered in send order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::ServerMessage;
use crate::room::Message;
use crate::store::RoomStore;
use crate::types::{ConnectionId, RoomId, UserId};

/// Default upper bound on message length, in characters
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// Commands sent from handles to the hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// Authenticated connection registered
    Connect {
        connection_id: ConnectionId,
        user_id: UserId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection closed
    Disconnect { connection_id: ConnectionId },
    /// Add a connection to a room's group
    Subscribe {
        connection_id: ConnectionId,
        room_id: RoomId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Remove a connection from a room's group
    Unsubscribe {
        connection_id: ConnectionId,
        room_id: RoomId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Fan out a stored message
    Publish {
        room_id: RoomId,
        origin: Option<ConnectionId>,
        message: Message,
    },
    /// Typing started/stopped
    Typing {
        connection_id: ConnectionId,
        room_id: RoomId,
        is_typing: bool,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Room ended; notify and drop its group
    RoomEnded {
        room_id: RoomId,
        ended_by: UserId,
        origin: Option<ConnectionId>,
    },
    /// Registry counters
    Stats { reply: oneshot::Sender<HubStats> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub rooms: usize,
}

/// Handle to the session hub
#[derive(Clone)]
pub struct SessionHub {
    commands: mpsc::Sender<HubCommand>,
    store: Arc<dyn RoomStore>,
    max_message_len: usize,
}

impl SessionHub {
    /// Create a handle and the actor it drives
    ///
    /// The actor must be spawned with `tokio::spawn(actor.run())`.
    pub fn new(
        store: Arc<dyn RoomStore>,
        max_message_len: usize,
        buffer: usize,
    ) -> (Self, HubActor) {
        let (commands, receiver) = mpsc::channel(buffer);
        let hub = Self {
            commands,
            store,
            max_message_len,
        };
        (hub, HubActor::new(receiver))
    }

    /// Register an authenticated connection
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), ChatError> {
        self.command(HubCommand::Connect {
            connection_id,
            user_id,
            sender,
        })
        .await
    }

    /// Drop a connection from every group
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        if self
            .command(HubCommand::Disconnect { connection_id })
            .await
            .is_err()
        {
            debug!("Hub gone while disconnecting {}", connection_id);
        }
    }

    /// Subscribe a connection to a room
    ///
    /// The user must be a participant and the room must still be active.
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<(), ChatError> {
        let room = self
            .store
            .get(room_id)
            .await?
            .ok_or(ChatError::RoomNotFound(room_id))?;
        if !room.contains(user_id) {
            warn!("User {} tried to join foreign room {}", user_id, room_id);
            return Err(ChatError::Unauthorized);
        }
        if !room.is_active {
            return Err(ChatError::RoomEnded);
        }

        self.request(|reply| HubCommand::Subscribe {
            connection_id,
            room_id,
            reply,
        })
        .await?
    }

    pub async fn leave_room(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<(), ChatError> {
        self.request(|reply| HubCommand::Unsubscribe {
            connection_id,
            room_id,
            reply,
        })
        .await?
    }

    /// Validate, persist and broadcast a message
    ///
    /// Returns the stored message. Delivery to subscribers is best-effort.
    pub async fn send_message(
        &self,
        origin: Option<ConnectionId>,
        room_id: RoomId,
        sender: UserId,
        content: String,
    ) -> Result<Message, ChatError> {
        self.validate_content(&content)?;

        let message = self
            .store
            .append_message(room_id, sender, content, Utc::now())
            .await?;

        let publish = HubCommand::Publish {
            room_id,
            origin,
            message: message.clone(),
        };
        if self.command(publish).await.is_err() {
            warn!("Message stored in {} but hub is gone; not broadcast", room_id);
        }
        Ok(message)
    }

    /// Relay a typing signal to the room's other connections
    ///
    /// Only subscribed connections may signal. Nothing is stored.
    pub async fn typing(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        self.request(|reply| HubCommand::Typing {
            connection_id,
            room_id,
            is_typing,
            reply,
        })
        .await?
    }

    /// Tell the room's subscribers it has ended
    pub async fn notify_room_ended(
        &self,
        origin: Option<ConnectionId>,
        room_id: RoomId,
        ended_by: UserId,
    ) {
        let cmd = HubCommand::RoomEnded {
            room_id,
            ended_by,
            origin,
        };
        if self.command(cmd).await.is_err() {
            debug!("Hub gone while ending {}", room_id);
        }
    }

    pub async fn stats(&self) -> Result<HubStats, ChatError> {
        self.request(|reply| HubCommand::Stats { reply }).await
    }

    fn validate_content(&self, content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidContent("message is empty".to_string()));
        }
        if content.chars().count() > self.max_message_len {
            return Err(ChatError::InvalidContent(format!(
                "message exceeds {} characters",
                self.max_message_len
            )));
        }
        Ok(())
    }

    async fn command(&self, cmd: HubCommand) -> Result<(), ChatError> {
        self.commands.send(cmd).await.map_err(|_| hub_stopped())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, ChatError> {
        let (reply, response) = oneshot::channel();
        self.command(make(reply)).await?;
        response.await.map_err(|_| hub_stopped())
    }
}

fn hub_stopped() -> ChatError {
    ChatError::Internal("session hub stopped".to_string())
}

/// The hub actor
///
/// Owns all live-connection state; only this task mutates it, so no
/// locks are needed.
pub struct HubActor {
    /// All registered connections
    connections: HashMap<ConnectionId, Connection>,
    /// Room -> subscribed connections
    subscriptions: HashMap<RoomId, HashSet<ConnectionId>>,
    /// Rooms already announced as ended; a join that read the room
    /// before it ended must not bring its group back
    ended: HashSet<RoomId>,
    receiver: mpsc::Receiver<HubCommand>,
}

impl HubActor {
    fn new(receiver: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            connections: HashMap::new(),
            subscriptions: HashMap::new(),
            ended: HashSet::new(),
            receiver,
        }
    }

    /// Run the event loop until every handle is dropped
    pub async fn run(mut self) {
        info!("Session hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Session hub shutting down");
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Connect {
                connection_id,
                user_id,
                sender,
            } => self.handle_connect(connection_id, user_id, sender),
            HubCommand::Disconnect { connection_id } => self.handle_disconnect(connection_id),
            HubCommand::Subscribe {
                connection_id,
                room_id,
                reply,
            } => {
                let _ = reply.send(self.handle_subscribe(connection_id, room_id));
            }
            HubCommand::Unsubscribe {
                connection_id,
                room_id,
                reply,
            } => {
                let _ = reply.send(self.handle_unsubscribe(connection_id, room_id));
            }
            HubCommand::Publish {
                room_id,
                origin,
                message,
            } => self.handle_publish(room_id, origin, message),
            HubCommand::Typing {
                connection_id,
                room_id,
                is_typing,
                reply,
            } => {
                let _ = reply.send(self.handle_typing(connection_id, room_id, is_typing));
            }
            HubCommand::RoomEnded {
                room_id,
                ended_by,
                origin,
            } => self.handle_room_ended(room_id, ended_by, origin),
            HubCommand::Stats { reply } => {
                let _ = reply.send(HubStats {
                    connections: self.connections.len(),
                    rooms: self.subscriptions.len(),
                });
            }
        }
    }

    fn handle_connect(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        info!("Connection {} registered for user {}", connection_id, user_id);
        self.connections
            .insert(connection_id, Connection::new(connection_id, user_id, sender));
        debug!(
            "Total connections: {}, Rooms with subscribers: {}",
            self.connections.len(),
            self.subscriptions.len()
        );
    }

    fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return;
        };
        info!("Connection {} removed", connection_id);

        for room_id in &conn.rooms {
            self.remove_subscriber(*room_id, connection_id);
        }

        // Partner should not see a stale indicator
        for room_id in &conn.typing_in {
            let event = ServerMessage::TypingIndicator {
                room_id: *room_id,
                user_id: conn.user_id,
                is_typing: false,
            };
            // The closing connection is already out of the registry
            self.broadcast(*room_id, &event, |_| false);
        }

        debug!(
            "Total connections: {}, Rooms with subscribers: {}",
            self.connections.len(),
            self.subscriptions.len()
        );
    }

    fn handle_subscribe(
        &mut self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<(), ChatError> {
        let conn = self
            .connections
            .get_mut(&connection_id)
            .ok_or(ChatError::Unauthenticated)?;
        if self.ended.contains(&room_id) {
            return Err(ChatError::RoomEnded);
        }

        conn.rooms.insert(room_id);
        self.subscriptions
            .entry(room_id)
            .or_default()
            .insert(connection_id);

        info!("Connection {} joined room {}", connection_id, room_id);
        Ok(())
    }

    fn handle_unsubscribe(
        &mut self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<(), ChatError> {
        let conn = self
            .connections
            .get_mut(&connection_id)
            .ok_or(ChatError::Unauthenticated)?;

        if conn.rooms.remove(&room_id) {
            conn.typing_in.remove(&room_id);
            self.remove_subscriber(room_id, connection_id);
            info!("Connection {} left room {}", connection_id, room_id);
        }
        Ok(())
    }

    fn handle_publish(&mut self, room_id: RoomId, origin: Option<ConnectionId>, message: Message) {
        let was_typing = origin
            .and_then(|id| self.connections.get_mut(&id))
            .map(|conn| conn.set_typing(room_id, false))
            .unwrap_or(false);

        let sender = message.sender;
        if was_typing {
            let event = ServerMessage::TypingIndicator {
                room_id,
                user_id: sender,
                is_typing: false,
            };
            self.broadcast(room_id, &event, |c| Some(c.id) == origin);
        }

        let event = ServerMessage::MessageReceived { room_id, message };
        let delivered = self.broadcast(room_id, &event, |_| false);
        debug!("Message from {} in {} delivered to {} connections", sender, room_id, delivered);
    }

    fn handle_typing(
        &mut self,
        connection_id: ConnectionId,
        room_id: RoomId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let conn = self
            .connections
            .get_mut(&connection_id)
            .ok_or(ChatError::Unauthenticated)?;

        if self.ended.contains(&room_id) {
            return Err(ChatError::RoomEnded);
        }
        if !conn.is_subscribed(room_id) {
            return Err(ChatError::Unauthorized);
        }

        // Repeated signals are not relayed
        if !conn.set_typing(room_id, is_typing) {
            return Ok(());
        }

        let user_id = conn.user_id;
        let event = ServerMessage::TypingIndicator {
            room_id,
            user_id,
            is_typing,
        };
        self.broadcast(room_id, &event, |c| c.id == connection_id);
        Ok(())
    }

    fn handle_room_ended(&mut self, room_id: RoomId, ended_by: UserId, origin: Option<ConnectionId>) {
        let event = ServerMessage::RoomEnded { room_id, ended_by };
        self.broadcast(room_id, &event, |c| Some(c.id) == origin);
        self.ended.insert(room_id);

        // Ended rooms carry no more live traffic
        if let Some(members) = self.subscriptions.remove(&room_id) {
            for id in members {
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.rooms.remove(&room_id);
                    conn.typing_in.remove(&room_id);
                }
            }
        }
        info!("Room {} closed for live traffic", room_id);
    }

    /// Deliver an event to a room's subscribers, skipping some
    ///
    /// Returns the number of connections the event was handed to.
    fn broadcast(
        &self,
        room_id: RoomId,
        event: &ServerMessage,
        skip: impl Fn(&Connection) -> bool,
    ) -> usize {
        let Some(members) = self.subscriptions.get(&room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in members.iter().filter_map(|id| self.connections.get(id)) {
            if skip(conn) {
                continue;
            }
            match conn.deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Dropped event for connection {} in {}: {}", conn.id, room_id, e),
            }
        }
        delivered
    }

    fn remove_subscriber(&mut self, room_id: RoomId, connection_id: ConnectionId) {
        if let Some(members) = self.subscriptions.get_mut(&room_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.subscriptions.remove(&room_id);
            }
        }
    }
}
