//! Per-connection protocol state
//!
//! Turns decoded client frames into calls on the matcher, lifecycle and
//! session hub, and turns their results into replies for the same
//! connection. Errors never close the connection; they come back as
//! `ServerMessage::Error`.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::identity::User;
use crate::message::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::ConnectionId;

pub struct Session {
    connection_id: ConnectionId,
    /// Set once `authenticate` succeeds
    user: Option<User>,
    state: AppState,
    /// Own outbound channel, handed to the hub on authentication
    outbound: mpsc::Sender<ServerMessage>,
}

impl Session {
    pub fn new(
        connection_id: ConnectionId,
        state: AppState,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            connection_id,
            user: None,
            state,
            outbound,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Handle one text frame, returning the reply for this connection
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerMessage> {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Invalid JSON from {}: {}", self.connection_id, e);
                return Some(e.into());
            }
        };

        match self.handle(msg).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Request from {} failed: {}", self.connection_id, e);
                Some(e.into())
            }
        }
    }

    /// Dispatch a decoded message
    pub async fn handle(&mut self, msg: ClientMessage) -> Result<Option<ServerMessage>, ChatError> {
        match msg {
            ClientMessage::Authenticate { token } => self.authenticate(&token).await.map(Some),
            ClientMessage::RequestMatch => {
                let user = self.require_user()?;
                let outcome = self.state.matcher.request_match(user).await?;
                Ok(Some(outcome.into()))
            }
            ClientMessage::ListRooms => {
                let user_id = self.require_user()?.id;
                let rooms = self.state.lifecycle.list_active_rooms(user_id).await?;
                Ok(Some(ServerMessage::Rooms { rooms }))
            }
            ClientMessage::GetRoom { room_id } => {
                let user_id = self.require_user()?.id;
                let room = self.state.lifecycle.get_room(room_id, user_id).await?;
                Ok(Some(ServerMessage::Room { room }))
            }
            ClientMessage::EndRoom { room_id } => {
                let user_id = self.require_user()?.id;
                self.state.lifecycle.end_room(room_id, user_id).await?;
                self.state
                    .hub
                    .notify_room_ended(Some(self.connection_id), room_id, user_id)
                    .await;
                Ok(Some(ServerMessage::RoomEnded {
                    room_id,
                    ended_by: user_id,
                }))
            }
            ClientMessage::Join { room_id } => {
                let user_id = self.require_user()?.id;
                self.state
                    .hub
                    .join_room(self.connection_id, user_id, room_id)
                    .await?;
                Ok(Some(ServerMessage::Joined { room_id }))
            }
            ClientMessage::Leave { room_id } => {
                self.require_user()?;
                self.state.hub.leave_room(self.connection_id, room_id).await?;
                Ok(Some(ServerMessage::Left { room_id }))
            }
            ClientMessage::Send { room_id, content } => {
                let user_id = self.require_user()?.id;
                // Subscribers, including this connection, get it via broadcast
                self.state
                    .hub
                    .send_message(Some(self.connection_id), room_id, user_id, content)
                    .await?;
                Ok(None)
            }
            ClientMessage::Typing { room_id } => {
                self.require_user()?;
                self.state.hub.typing(self.connection_id, room_id, true).await?;
                Ok(None)
            }
            ClientMessage::StopTyping { room_id } => {
                self.require_user()?;
                self.state.hub.typing(self.connection_id, room_id, false).await?;
                Ok(None)
            }
        }
    }

    async fn authenticate(&mut self, token: &str) -> Result<ServerMessage, ChatError> {
        if self.user.is_some() {
            return Err(ChatError::AlreadyAuthenticated);
        }

        let user = self.state.identity.authenticate(token).await?;
        self.state
            .hub
            .connect(self.connection_id, user.id, self.outbound.clone())
            .await?;

        info!("Connection {} authenticated as {}", self.connection_id, user.id);
        let reply = ServerMessage::Authenticated {
            user_id: user.id,
            display_name: user.display_name.clone(),
        };
        self.user = Some(user);
        Ok(reply)
    }

    fn require_user(&self) -> Result<&User, ChatError> {
        self.user.as_ref().ok_or(ChatError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::config::ChatLimits;
    use crate::identity::TokenIdentity;
    use crate::message::ErrorCode;
    use crate::store::MemoryRoomStore;
    use crate::types::{RoomId, UserId};

    struct Client {
        session: Session,
        rx: mpsc::Receiver<ServerMessage>,
    }

    struct Fixture {
        state: AppState,
        identity: Arc<TokenIdentity>,
        alice: User,
        bob: User,
    }

    fn setup() -> Fixture {
        let alice = User {
            id: UserId::new(),
            display_name: "Alice".to_string(),
        };
        let bob = User {
            id: UserId::new(),
            display_name: "Bob".to_string(),
        };
        let identity = Arc::new(TokenIdentity::new(
            "secret",
            Duration::hours(1),
            [alice.clone(), bob.clone()],
        ));
        let store = Arc::new(MemoryRoomStore::new());
        let (state, actor) = AppState::new(identity.clone(), store, &ChatLimits::default());
        tokio::spawn(actor.run());
        Fixture {
            state,
            identity,
            alice,
            bob,
        }
    }

    fn client(f: &Fixture) -> Client {
        let (tx, rx) = mpsc::channel(32);
        Client {
            session: Session::new(ConnectionId::new(), f.state.clone(), tx),
            rx,
        }
    }

    async fn login(f: &Fixture, user: &User) -> Client {
        let mut c = client(f);
        let token = f.identity.issue_token(user.id).unwrap();
        let reply = c
            .session
            .handle(ClientMessage::Authenticate { token })
            .await
            .unwrap();
        assert!(matches!(reply, Some(ServerMessage::Authenticated { .. })));
        c
    }

    fn error_code(reply: Option<ServerMessage>) -> ErrorCode {
        match reply {
            Some(ServerMessage::Error { code, .. }) => code,
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requests_need_authentication() {
        let f = setup();
        let mut c = client(&f);

        let reply = c.session.handle_text(r#"{"type": "request_match"}"#).await;
        assert_eq!(error_code(reply), ErrorCode::Unauthenticated);

        let reply = c
            .session
            .handle_text(r#"{"type": "authenticate", "token": "bogus"}"#)
            .await;
        assert_eq!(error_code(reply), ErrorCode::Unauthenticated);
        assert!(c.session.user().is_none());
    }

    #[tokio::test]
    async fn test_authenticate_once() {
        let f = setup();
        let mut c = login(&f, &f.alice).await;
        assert_eq!(c.session.user().unwrap().display_name, "Alice");

        let token = f.identity.issue_token(f.alice.id).unwrap();
        let err = c
            .session
            .handle(ClientMessage::Authenticate { token })
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::AlreadyAuthenticated);
    }

    #[tokio::test]
    async fn test_malformed_frame_reported() {
        let f = setup();
        let mut c = client(&f);

        let reply = c.session.handle_text("{not json").await;
        assert_eq!(error_code(reply), ErrorCode::InvalidMessage);
        let reply = c.session.handle_text(r#"{"type": "fly_away"}"#).await;
        assert_eq!(error_code(reply), ErrorCode::InvalidMessage);
    }

    #[tokio::test]
    async fn test_full_conversation() {
        let f = setup();
        let mut alice = login(&f, &f.alice).await;
        let mut bob = login(&f, &f.bob).await;

        let room_id = match alice.session.handle(ClientMessage::RequestMatch).await.unwrap() {
            Some(ServerMessage::Matched {
                room_id,
                partner_id,
                partner_display_name,
            }) => {
                assert_eq!(partner_id, f.bob.id);
                assert_eq!(partner_display_name, "Bob");
                room_id
            }
            other => panic!("Unexpected reply: {:?}", other),
        };

        for c in [&mut alice, &mut bob] {
            let reply = c.session.handle(ClientMessage::Join { room_id }).await.unwrap();
            assert!(matches!(reply, Some(ServerMessage::Joined { .. })));
        }

        let reply = alice
            .session
            .handle(ClientMessage::Send {
                room_id,
                content: "hi".to_string(),
            })
            .await
            .unwrap();
        assert!(reply.is_none());
        f.state.hub.stats().await.unwrap();

        for c in [&mut alice, &mut bob] {
            match c.rx.try_recv().unwrap() {
                ServerMessage::MessageReceived { message, .. } => {
                    assert_eq!(message.content, "hi");
                    assert_eq!(message.sender, f.alice.id);
                }
                other => panic!("Unexpected event: {:?}", other),
            }
        }

        match bob.session.handle(ClientMessage::ListRooms).await.unwrap() {
            Some(ServerMessage::Rooms { rooms }) => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].id, room_id);
                assert_eq!(rooms[0].message_count, 1);
            }
            other => panic!("Unexpected reply: {:?}", other),
        }

        let reply = bob.session.handle(ClientMessage::EndRoom { room_id }).await.unwrap();
        assert!(matches!(reply, Some(ServerMessage::RoomEnded { .. })));
        f.state.hub.stats().await.unwrap();
        match alice.rx.try_recv().unwrap() {
            ServerMessage::RoomEnded { ended_by, .. } => assert_eq!(ended_by, f.bob.id),
            other => panic!("Unexpected event: {:?}", other),
        }

        let reply = alice
            .session
            .handle_text(&format!(
                r#"{{"type": "send", "room_id": "{room_id}", "content": "wait"}}"#
            ))
            .await;
        assert_eq!(error_code(reply), ErrorCode::RoomEnded);

        let reply = alice
            .session
            .handle_text(&format!(r#"{{"type": "end_room", "room_id": "{room_id}"}}"#))
            .await;
        assert_eq!(error_code(reply), ErrorCode::AlreadyEnded);

        match alice.session.handle(ClientMessage::GetRoom { room_id }).await.unwrap() {
            Some(ServerMessage::Room { room }) => {
                assert!(!room.is_active);
                assert_eq!(room.messages.len(), 1);
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_user_and_missing_room() {
        let f = setup();
        let mut alice = login(&f, &f.alice).await;
        let room_id = match alice.session.handle(ClientMessage::RequestMatch).await.unwrap() {
            Some(ServerMessage::Matched { room_id, .. }) => room_id,
            other => panic!("Unexpected reply: {:?}", other),
        };

        let eve = User {
            id: UserId::new(),
            display_name: "Eve".to_string(),
        };
        let identity = TokenIdentity::new("secret", Duration::hours(1), [eve.clone()]);
        let mut eve_client = client(&f);
        // Eve is unknown to the server's directory, so her token is refused
        let token = identity.issue_token(eve.id).unwrap();
        let reply = eve_client
            .session
            .handle(ClientMessage::Authenticate { token })
            .await
            .unwrap_err();
        assert_eq!(reply, ChatError::Unauthenticated);

        let mut bob = login(&f, &f.bob).await;
        let other_room = RoomId::new();
        let err = bob
            .session
            .handle(ClientMessage::Join { room_id: other_room })
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::RoomNotFound(other_room));

        // Bob is the partner here, so he may read it
        assert!(bob.session.handle(ClientMessage::GetRoom { room_id }).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_partner_reported() {
        let lonely = User {
            id: UserId::new(),
            display_name: "Lonely".to_string(),
        };
        let identity = Arc::new(TokenIdentity::new("secret", Duration::hours(1), [lonely.clone()]));
        let store = Arc::new(MemoryRoomStore::new());
        let (state, actor) = AppState::new(identity.clone(), store, &ChatLimits::default());
        tokio::spawn(actor.run());

        let (tx, _rx) = mpsc::channel(8);
        let mut session = Session::new(ConnectionId::new(), state, tx);
        let token = identity.issue_token(lonely.id).unwrap();
        session.handle(ClientMessage::Authenticate { token }).await.unwrap();

        let reply = session.handle_text(r#"{"type": "request_match"}"#).await;
        assert_eq!(error_code(reply), ErrorCode::NoPartnerAvailable);
    }
}
