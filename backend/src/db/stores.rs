//! Interfaces to the collaborators the core reads from and writes to.
//!
//! The core never reaches a concrete database. `db::memory` backs tests and
//! single-process runs; the Postgres implementations live next to this file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::error::Result;
use crate::models::{
    Coordinates, DiscoveryFilters, EdgeType, Match, MatchStreak, NewNotification, Notification, UserId,
    UserSnapshot, UserUpdate,
};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<UserSnapshot>>;

    /// Fails with `NotFound` when the user does not exist
    async fn update(&self, id: &str, update: UserUpdate) -> Result<()>;

    /// Users passing the structural filters, minus `exclude` and anyone hidden,
    /// nearest to `origin` first. Users without a location come last.
    async fn find_candidates(
        &self,
        filters: &DiscoveryFilters,
        exclude: &HashSet<UserId>,
        origin: Coordinates,
    ) -> Result<Vec<UserSnapshot>>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn edge_exists(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool>;

    /// Returns false when the edge was already there
    async fn insert_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool>;

    async fn delete_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool>;

    /// Block edge in either direction
    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool>;

    /// Targets of the user's outgoing, unresolved likes
    async fn liked_by(&self, user_id: &str) -> Result<Vec<UserId>>;

    /// Everyone the user blocked or was blocked by
    async fn blocked_with(&self, user_id: &str) -> Result<Vec<UserId>>;

    async fn find_match(&self, a: &str, b: &str) -> Result<Option<Match>>;

    /// One atomic unit: create the match unless the pair already has one, and
    /// delete both like edges either way. `None` means the match already existed.
    async fn create_match_if_absent(&self, a: &str, b: &str) -> Result<Option<Match>>;

    async fn delete_match(&self, a: &str, b: &str) -> Result<bool>;

    async fn increment_streak(&self, from: &str, to: &str, at: DateTime<Utc>) -> Result<MatchStreak>;

    async fn get_streak(&self, from: &str, to: &str) -> Result<Option<MatchStreak>>;

    /// Both directions
    async fn delete_streaks(&self, a: &str, b: &str) -> Result<u64>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Stores the notification. Never fails because the recipient is offline.
    async fn notify(&self, user_id: &str, notification: NewNotification) -> Result<Notification>;

    /// Most recent first
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>>;
}
