//! Who is online, and through which connection.
//!
//! One live connection per user: registering again replaces the previous
//! handle (last writer wins). For multi-device fan-out the map value would
//! become a set of handles and delivery would go to each of them.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{ServerEvent, UserId};

/// Outbound side of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    /// Handle plus the receiver a connection writer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// False once the connection's writer has gone away
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

pub trait PresenceRegistry: Send + Sync {
    /// Returns the handle that was replaced, if any
    fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle>;

    /// Returns the user that went offline. A connection that had already been
    /// replaced unregisters silently and returns `None`.
    fn unregister(&self, connection_id: Uuid) -> Option<UserId>;

    fn lookup(&self, user_id: &str) -> Option<ConnectionHandle>;

    fn is_online(&self, user_id: &str) -> bool {
        self.lookup(user_id).is_some()
    }

    fn online_users(&self) -> Vec<UserId>;
}

/// Per-key concurrent maps; connect and disconnect of different users never contend.
#[derive(Debug, Default)]
pub struct InMemoryPresenceRegistry {
    users: DashMap<UserId, ConnectionHandle>,
    connections: DashMap<Uuid, UserId>,
}

impl InMemoryPresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advisory presence signal to every other live connection
    fn broadcast_except(&self, user_id: &str, event: ServerEvent) {
        let targets: Vec<ConnectionHandle> = self
            .users
            .iter()
            .filter(|entry| entry.key() != user_id)
            .map(|entry| entry.value().clone())
            .collect();

        for handle in targets {
            handle.send(event.clone());
        }
    }
}

impl PresenceRegistry for InMemoryPresenceRegistry {
    fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.id(), user_id.to_string());
        let previous = self.users.insert(user_id.to_string(), handle);

        if let Some(prev) = &previous {
            self.connections.remove(&prev.id());
            debug!("Replaced live connection {} for user {}", prev.id(), user_id);
        }

        info!("User {} is online", user_id);
        self.broadcast_except(
            user_id,
            ServerEvent::PresenceOnline {
                user_id: user_id.to_string(),
            },
        );
        previous
    }

    fn unregister(&self, connection_id: Uuid) -> Option<UserId> {
        let (_, user_id) = self.connections.remove(&connection_id)?;
        let removed = self
            .users
            .remove_if(&user_id, |_, handle| handle.id() == connection_id)
            .is_some();

        if !removed {
            return None;
        }

        info!("User {} is offline", user_id);
        self.broadcast_except(
            &user_id,
            ServerEvent::PresenceOffline {
                user_id: user_id.clone(),
            },
        );
        Some(user_id)
    }

    fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.users.get(user_id).map(|entry| entry.value().clone())
    }

    fn online_users(&self) -> Vec<UserId> {
        self.users.iter().map(|entry| entry.key().clone()).collect()
    }
}
