//! Two-party relay: resolves the other member of a pair and delivers to their
//! live connection if they have one. An offline recipient is a normal outcome;
//! durable history belongs to whoever stores messages, not to this router.

use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::models::{ServerEvent, UserId};
use crate::utils::PairKey;
use super::presence::PresenceRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    Peer(UserId),
    /// Canonical pair key, e.g. `alice_bob`
    Room(String),
}

impl RelayTarget {
    /// An explicit recipient wins over a room key
    pub fn from_parts(room_id: Option<String>, to: Option<UserId>) -> Result<Self> {
        match (to, room_id) {
            (Some(to), _) => Ok(RelayTarget::Peer(to)),
            (None, Some(room)) => Ok(RelayTarget::Room(room)),
            (None, None) => Err(CoreError::validation("either 'to' or 'roomId' is required")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub pair: PairKey,
    pub peer: UserId,
}

impl Route {
    pub fn room_id(&self) -> String {
        self.pair.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    RecipientOffline,
}

pub struct SessionRouter {
    presence: Arc<dyn PresenceRegistry>,
    rooms: DashMap<String, DashSet<UserId>>,
    memberships: DashMap<UserId, DashSet<String>>,
}

impl SessionRouter {
    pub fn new(presence: Arc<dyn PresenceRegistry>) -> Self {
        Self {
            presence,
            rooms: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    pub fn presence(&self) -> &Arc<dyn PresenceRegistry> {
        &self.presence
    }

    pub fn resolve(&self, sender: &str, target: &RelayTarget) -> Result<Route> {
        let pair = match target {
            RelayTarget::Peer(peer) => PairKey::new(sender, peer)?,
            RelayTarget::Room(room) => PairKey::parse_for(room, sender)?,
        };
        let peer = pair
            .peer_of(sender)
            .ok_or_else(|| CoreError::validation("sender is not part of the pair"))?
            .to_string();
        Ok(Route { pair, peer })
    }

    /// Live delivery to one user
    pub fn deliver(&self, user_id: &str, event: ServerEvent) -> Delivery {
        let name = event.name();
        match self.presence.lookup(user_id) {
            Some(handle) if handle.send(event) => {
                debug!("Delivered {} to {}", name, user_id);
                Delivery::Delivered
            }
            _ => {
                debug!("{} not delivered, {} is offline", name, user_id);
                Delivery::RecipientOffline
            }
        }
    }

    /// Resolves the peer and delivers whatever `build` makes of the route
    pub fn relay(
        &self,
        sender: &str,
        target: &RelayTarget,
        build: impl FnOnce(&Route) -> ServerEvent,
    ) -> Result<Delivery> {
        let route = self.resolve(sender, target)?;
        let event = build(&route);
        Ok(self.deliver(&route.peer, event))
    }

    /// The sender's message id is passed through untouched for receiver-side de-duplication
    pub fn send_message(
        &self,
        sender: &str,
        target: &RelayTarget,
        message_id: &str,
        payload: Value,
    ) -> Result<Delivery> {
        if message_id.trim().is_empty() {
            return Err(CoreError::validation("messageId is required"));
        }
        self.relay(sender, target, |route| ServerEvent::Message {
            from: sender.to_string(),
            room_id: route.room_id(),
            message_id: message_id.to_string(),
            payload,
        })
    }

    pub fn typing(&self, sender: &str, target: &RelayTarget, is_typing: bool) -> Result<Delivery> {
        self.relay(sender, target, |route| ServerEvent::Typing {
            from: sender.to_string(),
            room_id: route.room_id(),
            is_typing,
        })
    }

    pub fn message_seen(
        &self,
        sender: &str,
        target: &RelayTarget,
        message_ids: Vec<String>,
    ) -> Result<Delivery> {
        self.relay(sender, target, |route| ServerEvent::MessageSeen {
            from: sender.to_string(),
            room_id: route.room_id(),
            message_ids,
        })
    }

    // =========================================================================
    // Room membership (bookkeeping only)
    // =========================================================================

    /// Returns false when the user was already in the room
    pub fn join_room(&self, user_id: &str, room_id: &str) -> Result<bool> {
        let pair = PairKey::parse_for(room_id, user_id)?;
        let room = pair.to_string();
        let joined = self
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(user_id.to_string());
        self.memberships
            .entry(user_id.to_string())
            .or_default()
            .insert(room);
        Ok(joined)
    }

    /// Returns false when the user was not in the room
    pub fn leave_room(&self, user_id: &str, room_id: &str) -> bool {
        let left = self
            .rooms
            .get(room_id)
            .map(|members| members.remove(user_id).is_some())
            .unwrap_or(false);
        self.rooms.remove_if(room_id, |_, members| members.is_empty());

        if let Some(rooms) = self.memberships.get(user_id) {
            rooms.remove(room_id);
        }
        self.memberships.remove_if(user_id, |_, rooms| rooms.is_empty());
        left
    }

    /// Drops every membership of a user, returning the rooms left
    pub fn leave_all(&self, user_id: &str) -> Vec<String> {
        let rooms: Vec<String> = self
            .memberships
            .get(user_id)
            .map(|set| set.iter().map(|r| r.clone()).collect())
            .unwrap_or_default();
        for room in &rooms {
            self.leave_room(user_id, room);
        }
        rooms
    }

    pub fn room_members(&self, room_id: &str) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().map(|u| u.clone()).collect())
            .unwrap_or_default()
    }
}
