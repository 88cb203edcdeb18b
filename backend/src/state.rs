use sqlx::PgPool;
use std::sync::Arc;

use crate::db::{
    MemoryNotificationSink, MemoryRelationshipStore, MemoryUserDirectory, NotificationSink,
    PgNotificationSink, PgRelationshipStore, PgUserDirectory, RelationshipStore, UserDirectory,
};
use crate::services::{
    CallSignalRelay, CandidateDiscoveryEngine, InMemoryPresenceRegistry, LiveNotifier, MeetNegotiator,
    PresenceRegistry, RelationshipStateMachine, SessionRouter, VenueSearch,
};
use crate::utils::{Config, PairLocks};

/// The three external collaborators
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserDirectory>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(MemoryUserDirectory::new()),
            relationships: Arc::new(MemoryRelationshipStore::new()),
            notifications: Arc::new(MemoryNotificationSink::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserDirectory::new(pool.clone())),
            relationships: Arc::new(PgRelationshipStore::new(pool.clone())),
            notifications: Arc::new(PgNotificationSink::new(pool)),
        }
    }
}

/// Service graph shared by every handler and connection
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserDirectory>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub router: Arc<SessionRouter>,
    pub notifier: Arc<dyn NotificationSink>,
    pub discovery: Arc<CandidateDiscoveryEngine>,
    pub relationships: Arc<RelationshipStateMachine>,
    pub meet: Arc<MeetNegotiator>,
    pub calls: Arc<CallSignalRelay>,
    pub locks: Arc<PairLocks>,
}

impl AppState {
    pub fn new(config: Config, stores: Stores, venues: Arc<dyn VenueSearch>) -> Self {
        let presence: Arc<dyn PresenceRegistry> = Arc::new(InMemoryPresenceRegistry::new());
        let router = Arc::new(SessionRouter::new(presence.clone()));
        let locks = Arc::new(PairLocks::new());
        let notifier: Arc<dyn NotificationSink> =
            Arc::new(LiveNotifier::new(stores.notifications, router.clone()));

        let discovery = Arc::new(CandidateDiscoveryEngine::new(
            stores.users.clone(),
            stores.relationships.clone(),
            &config,
        ));
        let relationships = Arc::new(RelationshipStateMachine::new(
            stores.users.clone(),
            stores.relationships.clone(),
            notifier.clone(),
            router.clone(),
            locks.clone(),
            config.buzz_cooldown,
        ));
        let meet = Arc::new(MeetNegotiator::new(
            stores.users.clone(),
            stores.relationships,
            venues,
            notifier.clone(),
            router.clone(),
            locks.clone(),
            config.meet_idle_timeout,
            config.meet_venue_radius_meters,
        ));
        let calls = Arc::new(CallSignalRelay::new(router.clone()));

        Self {
            config,
            users: stores.users,
            presence,
            router,
            notifier,
            discovery,
            relationships,
            meet,
            calls,
            locks,
        }
    }
}
