//! Shared application state handed to every connection

use std::sync::Arc;

use crate::config::ChatLimits;
use crate::hub::{HubActor, SessionHub};
use crate::identity::IdentityProvider;
use crate::lifecycle::RoomLifecycle;
use crate::matcher::Matcher;
use crate::store::RoomStore;

#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityProvider>,
    pub matcher: Arc<Matcher>,
    pub lifecycle: Arc<RoomLifecycle>,
    pub hub: SessionHub,
}

impl AppState {
    /// Wire the services around one identity provider and one store
    ///
    /// The returned actor must be spawned before connections are served.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RoomStore>,
        limits: &ChatLimits,
    ) -> (Self, HubActor) {
        let matcher = Matcher::new(identity.clone(), store.clone(), limits.candidate_pool_size);
        let lifecycle = RoomLifecycle::new(identity.clone(), store.clone(), limits.page_size);
        let (hub, actor) = SessionHub::new(store, limits.max_message_len, limits.channel_buffer);

        let state = Self {
            identity,
            matcher: Arc::new(matcher),
            lifecycle: Arc::new(lifecycle),
            hub,
        };
        (state, actor)
    }
}
