use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};

use crate::constants::MAX_CANDIDATE_SCAN;
use crate::error::{CoreError, Result};
use crate::models::{
    Coordinates, DiscoveryFilters, EdgeType, Match, MatchStreak, NewNotification, Notification, UserId,
    UserSnapshot, UserUpdate,
};
use crate::services::geo::haversine_km;
use super::stores::{NotificationSink, RelationshipStore, UserDirectory};

fn ordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

// =============================================================================
// USERS
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserSnapshot>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: UserSnapshot) {
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get(&self, id: &str) -> Result<Option<UserSnapshot>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn update(&self, id: &str, update: UserUpdate) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))?;
        update.apply_to(user);
        Ok(())
    }

    async fn find_candidates(
        &self,
        filters: &DiscoveryFilters,
        exclude: &HashSet<UserId>,
        origin: Coordinates,
    ) -> Result<Vec<UserSnapshot>> {
        let users = self.users.read().await;
        let mut found: Vec<(Option<f64>, UserSnapshot)> = users
            .values()
            .filter(|u| !exclude.contains(&u.id))
            .filter(|u| u.is_discoverable())
            .filter(|u| filters.matches(u))
            .map(|u| (u.location.map(|loc| haversine_km(origin, loc)), u.clone()))
            .collect();

        found.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => a.total_cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        found.truncate(MAX_CANDIDATE_SCAN as usize);
        Ok(found.into_iter().map(|(_, u)| u).collect())
    }
}

// =============================================================================
// RELATIONSHIPS
// =============================================================================

#[derive(Debug, Default)]
struct RelationshipTables {
    edges: HashMap<(UserId, UserId, EdgeType), DateTime<Utc>>,
    /// Keyed by the sorted pair
    matches: HashMap<(UserId, UserId), Match>,
    streaks: HashMap<(UserId, UserId), MatchStreak>,
}

/// Everything sits behind one mutex, which makes the match transition atomic.
#[derive(Debug, Default)]
pub struct MemoryRelationshipStore {
    tables: Mutex<RelationshipTables>,
}

impl MemoryRelationshipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn match_count(&self) -> usize {
        self.tables.lock().await.matches.len()
    }

    pub async fn edge_count(&self, edge_type: EdgeType) -> usize {
        self.tables
            .lock()
            .await
            .edges
            .keys()
            .filter(|(_, _, t)| *t == edge_type)
            .count()
    }
}

#[async_trait]
impl RelationshipStore for MemoryRelationshipStore {
    async fn edge_exists(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .edges
            .contains_key(&(from.to_string(), to.to_string(), edge_type)))
    }

    async fn insert_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let key = (from.to_string(), to.to_string(), edge_type);
        if tables.edges.contains_key(&key) {
            return Ok(false);
        }
        tables.edges.insert(key, Utc::now());
        Ok(true)
    }

    async fn delete_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .edges
            .remove(&(from.to_string(), to.to_string(), edge_type))
            .is_some())
    }

    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .edges
            .contains_key(&(a.to_string(), b.to_string(), EdgeType::Block))
            || tables
                .edges
                .contains_key(&(b.to_string(), a.to_string(), EdgeType::Block)))
    }

    async fn liked_by(&self, user_id: &str) -> Result<Vec<UserId>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .edges
            .keys()
            .filter(|(from, _, t)| from == user_id && *t == EdgeType::Like)
            .map(|(_, to, _)| to.clone())
            .collect())
    }

    async fn blocked_with(&self, user_id: &str) -> Result<Vec<UserId>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .edges
            .keys()
            .filter(|(_, _, t)| *t == EdgeType::Block)
            .filter_map(|(from, to, _)| {
                if from == user_id {
                    Some(to.clone())
                } else if to == user_id {
                    Some(from.clone())
                } else {
                    None
                }
            })
            .collect())
    }

    async fn find_match(&self, a: &str, b: &str) -> Result<Option<Match>> {
        let tables = self.tables.lock().await;
        Ok(tables.matches.get(&ordered(a, b)).cloned())
    }

    async fn create_match_if_absent(&self, a: &str, b: &str) -> Result<Option<Match>> {
        let mut tables = self.tables.lock().await;
        tables
            .edges
            .remove(&(a.to_string(), b.to_string(), EdgeType::Like));
        tables
            .edges
            .remove(&(b.to_string(), a.to_string(), EdgeType::Like));

        let key = ordered(a, b);
        if tables.matches.contains_key(&key) {
            return Ok(None);
        }
        let created = Match::new(a, b);
        tables.matches.insert(key, created.clone());
        Ok(Some(created))
    }

    async fn delete_match(&self, a: &str, b: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.matches.remove(&ordered(a, b)).is_some())
    }

    async fn increment_streak(&self, from: &str, to: &str, at: DateTime<Utc>) -> Result<MatchStreak> {
        let mut tables = self.tables.lock().await;
        let streak = tables
            .streaks
            .entry((from.to_string(), to.to_string()))
            .or_insert_with(|| MatchStreak {
                from_user_id: from.to_string(),
                to_user_id: to.to_string(),
                count: 0,
                last_buzz_at: at,
            });
        streak.count += 1;
        streak.last_buzz_at = at;
        Ok(streak.clone())
    }

    async fn get_streak(&self, from: &str, to: &str) -> Result<Option<MatchStreak>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .streaks
            .get(&(from.to_string(), to.to_string()))
            .cloned())
    }

    async fn delete_streaks(&self, a: &str, b: &str) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut removed = 0;
        for key in [(a.to_string(), b.to_string()), (b.to_string(), a.to_string())] {
            if tables.streaks.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    notifications: Mutex<Vec<Notification>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn notify(&self, user_id: &str, notification: NewNotification) -> Result<Notification> {
        let stored = Notification::from_new(user_id, notification);
        self.notifications.lock().await.push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        let notifications = self.notifications.lock().await;
        Ok(notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
