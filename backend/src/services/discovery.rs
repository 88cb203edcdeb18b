//! Ranked discovery of nearby users.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::{RelationshipStore, UserDirectory};
use crate::error::{CoreError, Result};
use crate::models::{Coordinates, DiscoveryFilters, UserId, UserSnapshot, UserUpdate, VisibilityMode};
use crate::utils::Config;
use super::geo::{self, ActivityBucket, RadiusTier};

/// Profile fields safe to hand to another user. Never carries coordinates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCard {
    pub id: UserId,
    pub name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub interests: Vec<String>,
    pub hobbies: Vec<String>,
    pub intent: Option<String>,
    pub vibe: Option<String>,
    pub verified: bool,
    /// "1 mile", "12 miles"; absent for users sharing limited visibility or no location
    pub distance: Option<String>,
    pub activity: ActivityBucket,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    /// The radius tier the candidates came from
    pub tier: RadiusTier,
    pub candidates: Vec<CandidateCard>,
}

struct Scored {
    user: UserSnapshot,
    distance_km: Option<f64>,
    score: f64,
}

fn rank(a: &Scored, b: &Scored) -> Ordering {
    fn nearest_first(a: Option<f64>, b: Option<f64>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
    fn latest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
        // Option orders None first, so reversing puts the most recent first and None last
        b.cmp(&a)
    }

    b.score
        .total_cmp(&a.score)
        .then_with(|| nearest_first(a.distance_km, b.distance_km))
        .then_with(|| latest_first(a.user.last_active_at, b.user.last_active_at))
}

pub struct CandidateDiscoveryEngine {
    users: Arc<dyn UserDirectory>,
    relationships: Arc<dyn RelationshipStore>,
    default_location: Coordinates,
    default_radius_km: f64,
    default_limit: usize,
}

impl CandidateDiscoveryEngine {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        relationships: Arc<dyn RelationshipStore>,
        config: &Config,
    ) -> Self {
        Self {
            users,
            relationships,
            default_location: config.default_location,
            default_radius_km: config.discovery_radius_km,
            default_limit: config.discovery_limit,
        }
    }

    pub async fn discover(
        &self,
        requester_id: &str,
        filters: &DiscoveryFilters,
        coords_override: Option<Coordinates>,
    ) -> Result<DiscoveryResult> {
        let mut requester = self
            .users
            .get(requester_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("user {}", requester_id)))?;

        let origin = match coords_override {
            Some(coords) => coords.validated()?,
            None => requester
                .location
                .filter(Coordinates::is_valid)
                .unwrap_or(self.default_location),
        };

        let now = Utc::now();
        let refresh = UserUpdate {
            location: Some(origin),
            last_active_at: Some(now),
            ..Default::default()
        };
        self.users.update(requester_id, refresh.clone()).await?;
        refresh.apply_to(&mut requester);

        let exclude = self.exclusions(requester_id).await?;
        let matches = self.users.find_candidates(filters, &exclude, origin).await?;
        debug!("{} structural candidate(s) for {}", matches.len(), requester_id);

        let with_distance: Vec<(UserSnapshot, Option<f64>)> = matches
            .into_iter()
            .filter(|u| !exclude.contains(&u.id) && u.is_discoverable())
            .map(|u| {
                let distance = u.location.map(|loc| geo::haversine_km(origin, loc));
                (u, distance)
            })
            .collect();

        let requested_km = filters.radius_km.unwrap_or(self.default_radius_km);
        let (tier, pool) = geo::pool_with_fallback(with_distance, requested_km);

        let mut scored: Vec<Scored> = pool
            .into_iter()
            .map(|(user, distance_km)| Scored {
                score: geo::hybrid_score(&requester, &user, distance_km, now),
                user,
                distance_km,
            })
            .collect();
        scored.sort_by(rank);

        let limit = filters.limit.filter(|l| *l > 0).unwrap_or(self.default_limit);
        let candidates: Vec<CandidateCard> = scored
            .into_iter()
            .take(limit)
            .map(|s| Self::card(s, now))
            .collect();

        info!(
            "Discovery for {} returned {} candidate(s) from tier {:?}",
            requester_id,
            candidates.len(),
            tier
        );
        Ok(DiscoveryResult { tier, candidates })
    }

    /// Self, one-sided likes and blocks in either direction
    async fn exclusions(&self, requester_id: &str) -> Result<HashSet<UserId>> {
        let mut exclude: HashSet<UserId> = HashSet::new();
        exclude.insert(requester_id.to_string());
        exclude.extend(self.relationships.liked_by(requester_id).await?);
        exclude.extend(self.relationships.blocked_with(requester_id).await?);
        Ok(exclude)
    }

    fn card(scored: Scored, now: DateTime<Utc>) -> CandidateCard {
        let Scored { user, distance_km, score } = scored;
        let distance = match user.visibility {
            VisibilityMode::Limited => None,
            _ => distance_km.map(geo::distance_label),
        };

        CandidateCard {
            activity: ActivityBucket::classify(user.last_active_at, now),
            id: user.id,
            name: user.name,
            age: user.age,
            gender: user.gender,
            bio: user.bio,
            photo_url: user.photo_url,
            interests: user.interests,
            hobbies: user.hobbies,
            intent: user.intent,
            vibe: user.vibe,
            verified: user.verified,
            distance,
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryRelationshipStore, MemoryUserDirectory};
    use crate::models::EdgeType;

    struct Fixture {
        users: Arc<MemoryUserDirectory>,
        relationships: Arc<MemoryRelationshipStore>,
        engine: CandidateDiscoveryEngine,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserDirectory::new());
        let relationships = Arc::new(MemoryRelationshipStore::new());
        let engine = CandidateDiscoveryEngine::new(users.clone(), relationships.clone(), &Config::default());
        Fixture { users, relationships, engine }
    }

    fn user_at(id: &str, latitude: f64, longitude: f64) -> UserSnapshot {
        let mut user = UserSnapshot::new(id);
        user.location = Some(Coordinates { latitude, longitude });
        user
    }

    fn ids(result: &DiscoveryResult) -> Vec<&str> {
        result.candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_sparse_area_falls_back_to_25km() {
        let f = fixture();
        f.users.insert(user_at("u", 41.87, -87.63)).await;

        // 30 users between roughly 13 and 20 km north, none inside 10 km
        for i in 0..30 {
            let mut user = user_at(&format!("near{}", i), 41.87 + 0.12 + i as f64 * 0.002, -87.63);
            if i % 3 == 0 {
                user.verified = true;
            }
            f.users.insert(user).await;
        }
        // Outside 25 km
        f.users.insert(user_at("far", 42.40, -87.63)).await;

        let result = f
            .engine
            .discover("u", &DiscoveryFilters::default(), None)
            .await
            .unwrap();

        assert_eq!(result.tier, RadiusTier::Km(25.0));
        assert_eq!(result.candidates.len(), 30);
        assert!(!ids(&result).contains(&"far"));
        assert!(result
            .candidates
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
        assert!(result.candidates.iter().all(|c| c.distance.is_some()));
    }

    #[tokio::test]
    async fn test_nearest_tier_wins_when_populated() {
        let f = fixture();
        f.users.insert(user_at("u", 41.87, -87.63)).await;
        f.users.insert(user_at("close", 41.88, -87.63)).await;
        f.users.insert(user_at("mid", 42.05, -87.63)).await;

        let result = f.engine.discover("u", &DiscoveryFilters::default(), None).await.unwrap();
        assert_eq!(result.tier, RadiusTier::Km(10.0));
        assert_eq!(ids(&result), vec!["close"]);
    }

    #[tokio::test]
    async fn test_blocks_hide_both_sides() {
        let f = fixture();
        f.users.insert(user_at("x", 41.87, -87.63)).await;
        f.users.insert(user_at("y", 41.871, -87.63)).await;
        f.users.insert(user_at("z", 41.872, -87.63)).await;
        f.relationships.insert_edge("y", "x", EdgeType::Block).await.unwrap();

        let for_x = f.engine.discover("x", &DiscoveryFilters::default(), None).await.unwrap();
        assert_eq!(ids(&for_x), vec!["z"]);
        let for_y = f.engine.discover("y", &DiscoveryFilters::default(), None).await.unwrap();
        assert_eq!(ids(&for_y), vec!["z"]);
    }

    #[tokio::test]
    async fn test_liked_and_hidden_users_are_excluded() {
        let f = fixture();
        f.users.insert(user_at("me", 41.87, -87.63)).await;
        f.users.insert(user_at("liked", 41.871, -87.63)).await;
        let mut hidden = user_at("hidden", 41.871, -87.63);
        hidden.visibility = VisibilityMode::Hidden;
        f.users.insert(hidden).await;
        f.users.insert(user_at("open", 41.872, -87.63)).await;
        f.relationships.insert_edge("me", "liked", EdgeType::Like).await.unwrap();

        let result = f.engine.discover("me", &DiscoveryFilters::default(), None).await.unwrap();
        assert_eq!(ids(&result), vec!["open"]);
    }

    #[tokio::test]
    async fn test_requester_location_is_refreshed() {
        let f = fixture();
        f.users.insert(UserSnapshot::new("nomad")).await;

        // No stored location and no override: configured default
        f.engine.discover("nomad", &DiscoveryFilters::default(), None).await.unwrap();
        let stored = f.users.get("nomad").await.unwrap().unwrap();
        assert_eq!(stored.location, Some(Config::default().default_location));
        assert!(stored.last_active_at.is_some());

        let moved = Coordinates { latitude: 40.71, longitude: -74.0 };
        f.engine.discover("nomad", &DiscoveryFilters::default(), Some(moved)).await.unwrap();
        assert_eq!(f.users.get("nomad").await.unwrap().unwrap().location, Some(moved));
    }

    #[tokio::test]
    async fn test_unknown_requester_and_bad_coordinates() {
        let f = fixture();
        let err = f.engine.discover("ghost", &DiscoveryFilters::default(), None).await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        f.users.insert(UserSnapshot::new("me")).await;
        let bad = Coordinates { latitude: 95.0, longitude: 0.0 };
        let err = f.engine.discover("me", &DiscoveryFilters::default(), Some(bad)).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn test_closer_candidate_ranks_first() {
        let f = fixture();
        f.users.insert(user_at("me", 0.0, 0.0)).await;
        // Identical profiles, only distance differs
        f.users.insert(user_at("b", 0.0, 0.05)).await;
        f.users.insert(user_at("a", 0.0, 0.01)).await;

        let result = f.engine.discover("me", &DiscoveryFilters::default(), None).await.unwrap();
        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_limited_visibility_hides_distance_and_limit_applies() {
        let f = fixture();
        f.users.insert(user_at("me", 0.0, 0.0)).await;
        let mut shy = user_at("shy", 0.0, 0.01);
        shy.visibility = VisibilityMode::Limited;
        f.users.insert(shy).await;
        f.users.insert(user_at("other", 0.0, 0.02)).await;

        let filters = DiscoveryFilters { limit: Some(1), ..Default::default() };
        let result = f.engine.discover("me", &filters, None).await.unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].id, "shy");
        assert!(result.candidates[0].distance.is_none());
    }
}
