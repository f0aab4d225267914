use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{Authenticator, JwtValidator};
use crate::config::Settings;
use crate::events::{
    ActivityTracker, Collaborators, EventDispatcher, InMemoryActivityTracker, InMemoryMessageStore,
    MessageStore,
};
use crate::relay::CredentialIssuer;
use crate::room::{PolicyAccess, RoomRouter, SpaceAccess};
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub authenticator: Arc<dyn Authenticator>,
    pub registry: Arc<SessionRegistry>,
    pub router: Arc<RoomRouter>,
    pub dispatcher: Arc<EventDispatcher>,
    pub collaborators: Collaborators,
    pub credential_issuer: Arc<CredentialIssuer>,
    pub start_time: Instant,
}

impl AppState {
    /// State backed by the config-driven access policy and in-memory collaborators
    pub fn new(settings: Settings) -> Self {
        let access = Arc::new(PolicyAccess::new(&settings.access));
        Self::with_collaborators(
            settings,
            access,
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(InMemoryActivityTracker::new()),
        )
    }

    pub fn with_collaborators(
        settings: Settings,
        access: Arc<dyn SpaceAccess>,
        store: Arc<dyn MessageStore>,
        tracker: Arc<dyn ActivityTracker>,
    ) -> Self {
        let timeout = Duration::from_millis(settings.collaborators.timeout_ms);

        let authenticator: Arc<dyn Authenticator> = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(RoomRouter::new(registry.clone(), access, timeout));
        let dispatcher = Arc::new(EventDispatcher::new(registry.clone()));
        let collaborators = Collaborators::new(store, tracker, timeout);
        let credential_issuer = Arc::new(CredentialIssuer::new(&settings.relay));

        Self {
            settings: Arc::new(settings),
            authenticator,
            registry,
            router,
            dispatcher,
            collaborators,
            credential_issuer,
            start_time: Instant::now(),
        }
    }
}
