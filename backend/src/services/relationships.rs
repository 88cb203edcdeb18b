//! Likes, matches, blocks and post-match buzz streaks.
//!
//! Every transition for a pair runs under that pair's lock, so two users
//! liking each other at the same moment resolve to exactly one match.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::constants::STREAK_MILESTONES;
use crate::db::{NotificationSink, RelationshipStore, UserDirectory};
use crate::error::{ConflictKind, CoreError, Result};
use crate::models::{EdgeType, NewNotification, NotificationKind, ServerEvent};
use crate::utils::{CooldownGate, PairKey, PairLocks};
use super::router::SessionRouter;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuzzOutcome {
    pub streak: i64,
    /// Set when `streak` lands exactly on a reward tier
    pub milestone: Option<i64>,
}

pub struct RelationshipStateMachine {
    users: Arc<dyn UserDirectory>,
    relationships: Arc<dyn RelationshipStore>,
    notifier: Arc<dyn NotificationSink>,
    router: Arc<SessionRouter>,
    locks: Arc<PairLocks>,
    cooldown: CooldownGate,
}

impl RelationshipStateMachine {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        relationships: Arc<dyn RelationshipStore>,
        notifier: Arc<dyn NotificationSink>,
        router: Arc<SessionRouter>,
        locks: Arc<PairLocks>,
        buzz_cooldown: Duration,
    ) -> Self {
        Self {
            users,
            relationships,
            notifier,
            router,
            locks,
            cooldown: CooldownGate::new(buzz_cooldown),
        }
    }

    async fn ensure_user(&self, id: &str) -> Result<()> {
        match self.users.get(id).await? {
            Some(_) => Ok(()),
            None => Err(CoreError::not_found(format!("user {}", id))),
        }
    }

    pub async fn like(&self, from: &str, to: &str) -> Result<LikeOutcome> {
        let pair = PairKey::new(from, to)?;
        self.ensure_user(from).await?;
        self.ensure_user(to).await?;

        let guard = self.locks.lock(&pair).await;

        if self.relationships.is_blocked(from, to).await? {
            return Err(ConflictKind::Blocked.into());
        }
        if self.relationships.find_match(from, to).await?.is_some() {
            return Err(ConflictKind::AlreadyMatched.into());
        }
        if !self.relationships.insert_edge(from, to, EdgeType::Like).await? {
            return Err(ConflictKind::AlreadyLiked.into());
        }

        if !self.relationships.edge_exists(to, from, EdgeType::Like).await? {
            drop(guard);
            info!("{} liked {}", from, to);
            self.announce_like(from, to).await;
            return Ok(LikeOutcome { matched: false, match_id: None });
        }

        let created = self.relationships.create_match_if_absent(from, to).await?;
        drop(guard);

        let Some(m) = created else {
            return Err(ConflictKind::AlreadyMatched.into());
        };
        info!("Match {} created for {}", m.id, pair);

        // The user who liked first hears about it too
        for (user, other) in [(to, from), (from, to)] {
            self.router.deliver(
                user,
                ServerEvent::Match {
                    match_id: m.id,
                    with: other.to_string(),
                },
            );
            let notification = NewNotification::new(other, NotificationKind::Match, "It's a match!")
                .with_href(format!("/chat/{}", pair));
            self.store_notification(user, notification).await;
        }

        Ok(LikeOutcome {
            matched: true,
            match_id: Some(m.id),
        })
    }

    /// One-sided like: live hint if the target is online, stored notification regardless
    async fn announce_like(&self, from: &str, to: &str) {
        self.router.deliver(to, ServerEvent::BuzzRequest { from: from.to_string() });
        let notification =
            NewNotification::new(from, NotificationKind::BuzzRequest, "Someone buzzed you")
                .with_href(format!("/profile/{}", from));
        self.store_notification(to, notification).await;
    }

    /// Runs after the transition is committed, so a sink failure is logged and not returned
    async fn store_notification(&self, user: &str, notification: NewNotification) {
        if let Err(e) = self.notifier.notify(user, notification).await {
            warn!("Failed to store notification for {}: {}", user, e);
        }
    }

    /// Removes the match, residual likes and streaks. True when anything was removed.
    pub async fn unmatch(&self, a: &str, b: &str) -> Result<bool> {
        let pair = PairKey::new(a, b)?;
        let _guard = self.locks.lock(&pair).await;
        self.clear_pair(&pair).await
    }

    /// Blocks are stored one way but hide the pair from each other both ways.
    pub async fn block(&self, from: &str, to: &str) -> Result<bool> {
        let pair = PairKey::new(from, to)?;
        let _guard = self.locks.lock(&pair).await;

        let inserted = self.relationships.insert_edge(from, to, EdgeType::Block).await?;
        self.clear_pair(&pair).await?;
        if inserted {
            info!("{} blocked {}", from, to);
        }
        Ok(inserted)
    }

    async fn clear_pair(&self, pair: &PairKey) -> Result<bool> {
        let (a, b) = (pair.low(), pair.high());
        let mut removed = self.relationships.delete_match(a, b).await?;
        removed |= self.relationships.delete_edge(a, b, EdgeType::Like).await?;
        removed |= self.relationships.delete_edge(b, a, EdgeType::Like).await?;
        removed |= self.relationships.delete_streaks(a, b).await? > 0;
        self.cooldown.clear(pair);

        if removed {
            info!("Cleared relationship state for {}", pair);
        }
        Ok(removed)
    }

    pub async fn buzz_matched(&self, from: &str, to: &str) -> Result<BuzzOutcome> {
        let pair = PairKey::new(from, to)?;

        let streak = {
            let _guard = self.locks.lock(&pair).await;
            if self.relationships.find_match(from, to).await?.is_none() {
                return Err(ConflictKind::NotMatched.into());
            }
            if let Err(retry_after) = self.cooldown.try_stamp(&pair) {
                warn!("Buzz {} -> {} inside cooldown", from, to);
                return Err(CoreError::Cooldown { retry_after });
            }
            match self.relationships.increment_streak(from, to, Utc::now()).await {
                Ok(streak) => streak,
                Err(e) => {
                    error!("Failed to record buzz {} -> {}: {}", from, to, e);
                    self.cooldown.clear(&pair);
                    return Err(e);
                }
            }
        };

        let milestone = STREAK_MILESTONES.contains(&streak.count).then_some(streak.count);
        self.router.deliver(
            to,
            ServerEvent::Buzz {
                from: from.to_string(),
                streak: streak.count,
                milestone,
            },
        );
        let message = match milestone {
            Some(n) => format!("Buzz streak hit {}!", n),
            None => "You got a buzz".to_string(),
        };
        self.store_notification(to, NewNotification::new(from, NotificationKind::Buzz, message))
            .await;

        Ok(BuzzOutcome {
            streak: streak.count,
            milestone,
        })
    }

    /// Forgets cooldown stamps whose window has passed
    pub fn prune_cooldowns(&self) {
        self.cooldown.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryNotificationSink, MemoryRelationshipStore, MemoryUserDirectory};
    use crate::models::UserSnapshot;
    use crate::models::Notification;
    use crate::services::presence::{ConnectionHandle, InMemoryPresenceRegistry};
    use async_trait::async_trait;

    /// Sink whose storage is down
    struct BrokenSink;

    #[async_trait]
    impl NotificationSink for BrokenSink {
        async fn notify(&self, _user_id: &str, _notification: NewNotification) -> Result<Notification> {
            Err(CoreError::Storage(sqlx::Error::PoolClosed))
        }

        async fn recent(&self, _user_id: &str, _limit: usize) -> Result<Vec<Notification>> {
            Err(CoreError::Storage(sqlx::Error::PoolClosed))
        }
    }

    struct Fixture {
        relationships: Arc<MemoryRelationshipStore>,
        notifications: Arc<MemoryNotificationSink>,
        router: Arc<SessionRouter>,
        locks: Arc<PairLocks>,
        machine: Arc<RelationshipStateMachine>,
    }

    async fn fixture(cooldown: Duration) -> Fixture {
        fixture_with_sink(cooldown, None).await
    }

    async fn fixture_with_sink(cooldown: Duration, sink: Option<Arc<dyn NotificationSink>>) -> Fixture {
        let users = Arc::new(MemoryUserDirectory::new());
        for id in ["alice", "bob", "carol"] {
            users.insert(UserSnapshot::new(id)).await;
        }
        let relationships = Arc::new(MemoryRelationshipStore::new());
        let notifications = Arc::new(MemoryNotificationSink::new());
        let router = Arc::new(SessionRouter::new(Arc::new(InMemoryPresenceRegistry::new())));
        let locks = Arc::new(PairLocks::new());
        let machine = Arc::new(RelationshipStateMachine::new(
            users,
            relationships.clone(),
            sink.unwrap_or_else(|| notifications.clone() as Arc<dyn NotificationSink>),
            router.clone(),
            locks.clone(),
            cooldown,
        ));
        Fixture { relationships, notifications, router, locks, machine }
    }

    async fn matched_pair(f: &Fixture) {
        f.machine.like("alice", "bob").await.unwrap();
        assert!(f.machine.like("bob", "alice").await.unwrap().matched);
    }

    #[tokio::test]
    async fn test_one_sided_like_notifies_target() {
        let f = fixture(Duration::from_secs(10)).await;
        let (bob, mut bob_rx) = ConnectionHandle::channel();
        f.router.presence().register("bob", bob);

        let outcome = f.machine.like("alice", "bob").await.unwrap();
        assert_eq!(outcome, LikeOutcome { matched: false, match_id: None });
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::BuzzRequest { from: "alice".to_string() }
        );

        let stored = f.notifications.recent("bob", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::BuzzRequest);

        let err = f.machine.like("alice", "bob").await.unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::AlreadyLiked));
    }

    #[tokio::test]
    async fn test_mutual_like_matches_and_notifies_both() {
        let f = fixture(Duration::from_secs(10)).await;
        let (alice, mut alice_rx) = ConnectionHandle::channel();
        f.router.presence().register("alice", alice);

        f.machine.like("alice", "bob").await.unwrap();
        let outcome = f.machine.like("bob", "alice").await.unwrap();
        assert!(outcome.matched);

        let event = alice_rx.try_recv().unwrap();
        assert_eq!(
            event,
            ServerEvent::Match { match_id: outcome.match_id.unwrap(), with: "bob".to_string() }
        );
        assert_eq!(f.notifications.recent("alice", 10).await.unwrap()[0].kind, NotificationKind::Match);
        assert_eq!(f.notifications.recent("bob", 10).await.unwrap()[0].kind, NotificationKind::Match);

        assert_eq!(f.relationships.edge_count(EdgeType::Like).await, 0);
        let err = f.machine.like("alice", "bob").await.unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::AlreadyMatched));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_likes_create_one_match() {
        let f = fixture(Duration::from_secs(10)).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let machine = f.machine.clone();
            let (from, to) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
            tasks.push(tokio::spawn(async move { machine.like(from, to).await }));
        }

        let mut matched = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(outcome) if outcome.matched => matched += 1,
                Ok(_) => {}
                Err(e) => assert!(matches!(
                    e.conflict(),
                    Some(ConflictKind::AlreadyLiked | ConflictKind::AlreadyMatched)
                )),
            }
        }

        assert_eq!(matched, 1);
        assert_eq!(f.relationships.match_count().await, 1);
        assert_eq!(f.relationships.edge_count(EdgeType::Like).await, 0);
    }

    #[tokio::test]
    async fn test_blocked_pair_cannot_like() {
        let f = fixture(Duration::from_secs(10)).await;
        matched_pair(&f).await;

        assert!(f.machine.block("bob", "alice").await.unwrap());
        assert!(f.relationships.find_match("alice", "bob").await.unwrap().is_none());

        for (from, to) in [("alice", "bob"), ("bob", "alice")] {
            let err = f.machine.like(from, to).await.unwrap_err();
            assert_eq!(err.conflict(), Some(ConflictKind::Blocked));
        }
    }

    #[tokio::test]
    async fn test_like_validation() {
        let f = fixture(Duration::from_secs(10)).await;
        assert_eq!(f.machine.like("alice", "alice").await.unwrap_err().code(), "validation");
        assert_eq!(f.machine.like("alice", "nobody").await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn test_unmatch_is_idempotent() {
        let f = fixture(Duration::from_millis(0)).await;
        matched_pair(&f).await;
        f.machine.buzz_matched("alice", "bob").await.unwrap();

        assert!(f.machine.unmatch("bob", "alice").await.unwrap());
        assert!(!f.machine.unmatch("bob", "alice").await.unwrap());
        assert!(f.relationships.get_streak("alice", "bob").await.unwrap().is_none());

        // Residual one-sided like is cleaned up too
        f.machine.like("alice", "carol").await.unwrap();
        assert!(f.machine.unmatch("carol", "alice").await.unwrap());
        assert_eq!(f.relationships.edge_count(EdgeType::Like).await, 0);
    }

    #[tokio::test]
    async fn test_buzz_requires_match() {
        let f = fixture(Duration::from_secs(10)).await;
        let err = f.machine.buzz_matched("alice", "bob").await.unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::NotMatched));
    }

    #[tokio::test]
    async fn test_buzz_cooldown_window() {
        let f = fixture(Duration::from_millis(150)).await;
        matched_pair(&f).await;

        assert_eq!(f.machine.buzz_matched("alice", "bob").await.unwrap().streak, 1);

        // The cooldown is per pair, not per direction
        match f.machine.buzz_matched("bob", "alice").await.unwrap_err() {
            CoreError::Cooldown { retry_after } => assert!(retry_after <= Duration::from_millis(150)),
            other => panic!("expected cooldown, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.machine.buzz_matched("alice", "bob").await.unwrap().streak, 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.machine.buzz_matched("alice", "bob").await.unwrap().streak, 3);
    }

    #[tokio::test]
    async fn test_buzz_milestone_and_live_event() {
        let f = fixture(Duration::from_millis(0)).await;
        matched_pair(&f).await;
        let (bob, mut bob_rx) = ConnectionHandle::channel();
        f.router.presence().register("bob", bob);

        let mut last = None;
        for _ in 0..5 {
            last = Some(f.machine.buzz_matched("alice", "bob").await.unwrap());
        }
        assert_eq!(last, Some(BuzzOutcome { streak: 5, milestone: Some(5) }));

        let buzzes: Vec<ServerEvent> = std::iter::from_fn(|| bob_rx.try_recv().ok())
            .filter(|e| matches!(e, ServerEvent::Buzz { .. }))
            .collect();
        assert_eq!(buzzes.len(), 5);
        assert_eq!(
            buzzes[4],
            ServerEvent::Buzz { from: "alice".to_string(), streak: 5, milestone: Some(5) }
        );
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_committed_transitions() {
        let f = fixture_with_sink(Duration::from_millis(0), Some(Arc::new(BrokenSink))).await;
        let (alice, mut alice_rx) = ConnectionHandle::channel();
        f.router.presence().register("alice", alice);

        assert_eq!(
            f.machine.like("alice", "bob").await.unwrap(),
            LikeOutcome { matched: false, match_id: None }
        );
        let outcome = f.machine.like("bob", "alice").await.unwrap();
        assert!(outcome.matched);
        assert_eq!(f.relationships.match_count().await, 1);
        assert!(matches!(alice_rx.try_recv().unwrap(), ServerEvent::Match { .. }));

        assert_eq!(f.machine.buzz_matched("bob", "alice").await.unwrap().streak, 1);
    }

    #[tokio::test]
    async fn test_buzz_queued_behind_unmatch_is_rejected() {
        let f = fixture(Duration::from_millis(0)).await;
        matched_pair(&f).await;

        let pair = PairKey::new("alice", "bob").unwrap();
        let guard = f.locks.lock(&pair).await;

        let machine = f.machine.clone();
        let unmatch = tokio::spawn(async move { machine.unmatch("bob", "alice").await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let machine = f.machine.clone();
        let buzz = tokio::spawn(async move { machine.buzz_matched("alice", "bob").await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        assert!(unmatch.await.unwrap().unwrap());
        let err = buzz.await.unwrap().unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::NotMatched));
        assert!(f.relationships.get_streak("alice", "bob").await.unwrap().is_none());
        let stored = f.notifications.recent("bob", 10).await.unwrap();
        assert!(stored.iter().all(|n| n.kind != NotificationKind::Buzz));
    }
}
