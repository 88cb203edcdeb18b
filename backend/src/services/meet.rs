//! Meet-in-the-middle negotiation between two matched users.
//!
//! Sessions live in memory only, keyed by pair. Every transition runs under the
//! shared pair lock; the venue lookup runs with the lock released and its
//! result is committed only if the session has not moved on in the meantime.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants::MEET_MAX_VENUE_RADIUS_METERS;
use crate::db::{NotificationSink, RelationshipStore, UserDirectory};
use crate::error::{ConflictKind, CoreError, Result};
use crate::models::{Coordinates, NewNotification, NotificationKind, ServerEvent, UserId, Venue};
use crate::utils::{PairKey, PairLocks};
use super::geo;
use super::router::{Delivery, SessionRouter};
use super::venues::VenueSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetState {
    Idle,
    Requested,
    Accepted,
    Suggested,
    PlaceProposed,
    Confirmed,
    Declined,
}

#[derive(Debug, Clone)]
struct MeetSession {
    initiator: UserId,
    target: UserId,
    state: MeetState,
    initiator_coords: Option<Coordinates>,
    target_coords: Option<Coordinates>,
    midpoint: Option<Coordinates>,
    venues: Vec<Venue>,
    radius_meters: u32,
    proposal: Option<(UserId, Venue)>,
    /// Bumped on every venue search so stale results are discarded
    round: u64,
    touched_at: Instant,
}

impl MeetSession {
    fn new(initiator: &str, target: &str, coords: Option<Coordinates>, radius_meters: u32) -> Self {
        Self {
            initiator: initiator.to_string(),
            target: target.to_string(),
            state: MeetState::Requested,
            initiator_coords: coords,
            target_coords: None,
            midpoint: None,
            venues: Vec::new(),
            radius_meters,
            proposal: None,
            round: 0,
            touched_at: Instant::now(),
        }
    }

    fn require_state(&self, allowed: &[MeetState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CoreError::validation(format!(
                "cannot {} while the meet is {:?}",
                action, self.state
            )))
        }
    }

    fn can_expand(&self) -> bool {
        self.venues.is_empty() && self.radius_meters < MEET_MAX_VENUE_RADIUS_METERS
    }
}

/// Read-only view of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetSnapshot {
    pub room_id: String,
    pub initiator: Option<UserId>,
    pub state: MeetState,
    pub midpoint: Option<Coordinates>,
    pub venues: Vec<Venue>,
    pub radius_meters: u32,
    pub proposed_venue: Option<Venue>,
    pub can_expand: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Delivered,
    /// The initiator was told via `meet:unavailable`; no session was kept
    TargetOffline,
}

pub struct MeetNegotiator {
    users: Arc<dyn UserDirectory>,
    relationships: Arc<dyn RelationshipStore>,
    venues: Arc<dyn VenueSearch>,
    notifier: Arc<dyn NotificationSink>,
    router: Arc<SessionRouter>,
    locks: Arc<PairLocks>,
    sessions: DashMap<PairKey, MeetSession>,
    idle_timeout: Duration,
    venue_radius_meters: u32,
}

impl MeetNegotiator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserDirectory>,
        relationships: Arc<dyn RelationshipStore>,
        venues: Arc<dyn VenueSearch>,
        notifier: Arc<dyn NotificationSink>,
        router: Arc<SessionRouter>,
        locks: Arc<PairLocks>,
        idle_timeout: Duration,
        venue_radius_meters: u32,
    ) -> Self {
        Self {
            users,
            relationships,
            venues,
            notifier,
            router,
            locks,
            sessions: DashMap::new(),
            idle_timeout,
            venue_radius_meters,
        }
    }

    /// Runs `apply` on the pair's session under the pair lock
    async fn update<T>(
        &self,
        pair: &PairKey,
        apply: impl FnOnce(&mut MeetSession) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.locks.lock(pair).await;
        let mut session = self
            .sessions
            .get_mut(pair)
            .ok_or_else(|| CoreError::not_found(format!("meet session {}", pair)))?;
        let out = apply(&mut *session)?;
        session.touched_at = Instant::now();
        Ok(out)
    }

    /// Like `update`, but the session is removed in the same critical section
    async fn finish<T>(
        &self,
        pair: &PairKey,
        apply: impl FnOnce(&mut MeetSession) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.locks.lock(pair).await;
        let out = {
            let mut session = self
                .sessions
                .get_mut(pair)
                .ok_or_else(|| CoreError::not_found(format!("meet session {}", pair)))?;
            apply(&mut *session)?
        };
        self.sessions.remove(pair);
        Ok(out)
    }

    fn tell_both(&self, pair: &PairKey, event: ServerEvent) {
        self.router.deliver(pair.low(), event.clone());
        self.router.deliver(pair.high(), event);
    }

    pub async fn request(
        &self,
        initiator: &str,
        target: &str,
        coords: Option<Coordinates>,
    ) -> Result<RequestOutcome> {
        let pair = PairKey::new(initiator, target)?;
        let coords = coords.map(Coordinates::validated).transpose()?;
        if self.relationships.find_match(initiator, target).await?.is_none() {
            return Err(ConflictKind::NotMatched.into());
        }

        if !self.router.presence().is_online(target) {
            info!("Meet request {} -> {} undeliverable, target offline", initiator, target);
            self.router.deliver(initiator, ServerEvent::MeetUnavailable { to: target.to_string() });
            let notification = NewNotification::new(
                initiator,
                NotificationKind::MeetRequest,
                "Wants to meet halfway",
            )
            .with_href(format!("/chat/{}", pair));
            if let Err(e) = self.notifier.notify(target, notification).await {
                warn!("Failed to store meet request notification for {}: {}", target, e);
            }
            return Ok(RequestOutcome::TargetOffline);
        }

        {
            let _guard = self.locks.lock(&pair).await;
            let session = MeetSession::new(initiator, target, coords, self.venue_radius_meters);
            if self.sessions.insert(pair.clone(), session).is_some() {
                debug!("Meet session {} restarted by {}", pair, initiator);
            }
        }

        info!("Meet requested {} -> {}", initiator, target);
        let delivery = self.router.deliver(target, ServerEvent::MeetRequest { from: initiator.to_string() });
        Ok(match delivery {
            Delivery::Delivered => RequestOutcome::Delivered,
            Delivery::RecipientOffline => RequestOutcome::TargetOffline,
        })
    }

    pub async fn accept(&self, by: &str, with: &str, coords: Option<Coordinates>) -> Result<()> {
        let pair = PairKey::new(by, with)?;
        let coords = coords
            .ok_or_else(|| CoreError::validation("coordinates are required to accept"))?
            .validated()?;

        let (initiator, initiator_coords) = self
            .update(&pair, |s| {
                s.require_state(&[MeetState::Requested], "accept")?;
                if s.target != by {
                    return Err(CoreError::validation("only the invited user can accept"));
                }
                s.target_coords = Some(coords);
                s.state = MeetState::Accepted;
                Ok((s.initiator.clone(), s.initiator_coords))
            })
            .await?;

        info!("Meet {} accepted by {}", pair, by);
        self.router.deliver(
            &initiator,
            ServerEvent::MeetAccepted {
                from: by.to_string(),
                coords,
            },
        );

        if initiator_coords.is_some() {
            return self.suggest(&pair).await;
        }

        let stored = self
            .users
            .get(&initiator)
            .await?
            .and_then(|u| u.location)
            .filter(Coordinates::is_valid);
        match stored {
            Some(location) => self.share_location(&initiator, by, Some(location)).await,
            None => {
                self.router.deliver(&initiator, ServerEvent::MeetLocationRequired { with: by.to_string() });
                Ok(())
            }
        }
    }

    /// Initiator coordinates supplied after acceptance
    pub async fn share_location(&self, by: &str, with: &str, coords: Option<Coordinates>) -> Result<()> {
        let pair = PairKey::new(by, with)?;
        let coords = coords
            .ok_or_else(|| CoreError::validation("coordinates are required"))?
            .validated()?;

        self.update(&pair, |s| {
            s.require_state(&[MeetState::Accepted], "share a location")?;
            if s.initiator != by {
                return Err(CoreError::validation("only the initiator shares a location here"));
            }
            s.initiator_coords = Some(coords);
            Ok(())
        })
        .await?;

        self.suggest(&pair).await
    }

    /// Doubles the search radius, up to the cap, and searches again
    pub async fn expand(&self, by: &str, with: &str) -> Result<()> {
        let pair = PairKey::new(by, with)?;
        self.update(&pair, |s| {
            s.require_state(&[MeetState::Suggested], "expand the search")?;
            if s.radius_meters >= MEET_MAX_VENUE_RADIUS_METERS {
                return Err(CoreError::validation("search radius is already at its maximum"));
            }
            s.radius_meters = (s.radius_meters.saturating_mul(2)).min(MEET_MAX_VENUE_RADIUS_METERS);
            Ok(())
        })
        .await?;

        self.suggest(&pair).await
    }

    /// Midpoint plus venue search. The search runs outside the pair lock.
    async fn suggest(&self, pair: &PairKey) -> Result<()> {
        let (round, midpoint, radius) = self
            .update(pair, |s| {
                let (Some(a), Some(b)) = (s.initiator_coords, s.target_coords) else {
                    return Err(CoreError::validation("both locations are needed"));
                };
                let midpoint = geo::midpoint(a, b);
                s.midpoint = Some(midpoint);
                s.round += 1;
                Ok((s.round, midpoint, s.radius_meters))
            })
            .await?;

        let venues = match self.venues.find_venues(midpoint, radius).await {
            Ok(venues) => venues,
            Err(e) => {
                warn!("Venue search for {} failed, offering expansion: {}", pair, e);
                Vec::new()
            }
        };

        let committed = self
            .update(pair, |s| {
                if s.round != round {
                    return Ok(None);
                }
                s.venues = venues;
                s.proposal = None;
                s.state = MeetState::Suggested;
                Ok(Some((s.venues.clone(), s.can_expand())))
            })
            .await;

        let (venues, can_expand) = match committed {
            Ok(Some(found)) => found,
            // Superseded by a newer search, or declined meanwhile
            Ok(None) | Err(CoreError::NotFound(_)) => {
                debug!("Dropping stale venue results for {}", pair);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        info!("Suggesting {} venue(s) for {} within {}m", venues.len(), pair, radius);
        for (user, other) in [(pair.low(), pair.high()), (pair.high(), pair.low())] {
            self.router.deliver(
                user,
                ServerEvent::MeetSuggest {
                    with: other.to_string(),
                    midpoint,
                    venues: venues.clone(),
                    can_expand,
                    radius_meters: radius,
                },
            );
        }
        Ok(())
    }

    /// With an empty venue list any valid place may be proposed (meeting at the midpoint itself).
    pub async fn propose_place(&self, by: &str, with: &str, venue: Venue) -> Result<()> {
        let pair = PairKey::new(by, with)?;
        if venue.name.trim().is_empty() {
            return Err(CoreError::validation("venue name is required"));
        }
        venue.coords.validated()?;

        self.update(&pair, |s| {
            s.require_state(&[MeetState::Suggested, MeetState::PlaceProposed], "propose a place")?;
            if !s.venues.is_empty() && !s.venues.iter().any(|v| v.same_place(&venue)) {
                return Err(CoreError::validation("venue is not one of the suggestions"));
            }
            s.proposal = Some((by.to_string(), venue.clone()));
            s.state = MeetState::PlaceProposed;
            Ok(())
        })
        .await?;

        debug!("{} proposed {} for {}", by, venue.name, pair);
        self.router.deliver(
            with,
            ServerEvent::MeetPlaceSelected {
                by: by.to_string(),
                venue,
            },
        );
        Ok(())
    }

    /// Confirms the other side's proposal and ends the session
    pub async fn accept_place(&self, by: &str, with: &str) -> Result<Venue> {
        let pair = PairKey::new(by, with)?;
        let venue = self
            .finish(&pair, |s| {
                s.require_state(&[MeetState::PlaceProposed], "accept a place")?;
                match &s.proposal {
                    Some((proposer, venue)) if proposer != by => {
                        let venue = venue.clone();
                        s.state = MeetState::Confirmed;
                        Ok(venue)
                    }
                    _ => Err(CoreError::validation("only the other side can accept a proposal")),
                }
            })
            .await?;

        info!("Meet {} confirmed at {}", pair, venue.name);
        self.tell_both(
            &pair,
            ServerEvent::MeetPlaceAccepted {
                by: by.to_string(),
                venue: venue.clone(),
            },
        );
        Ok(venue)
    }

    /// Back to the suggestion list with the proposal cleared
    pub async fn reject_place(&self, by: &str, with: &str) -> Result<()> {
        let pair = PairKey::new(by, with)?;
        self.update(&pair, |s| {
            s.require_state(&[MeetState::PlaceProposed], "reject a place")?;
            match &s.proposal {
                Some((proposer, _)) if proposer != by => {
                    s.proposal = None;
                    s.state = MeetState::Suggested;
                    Ok(())
                }
                _ => Err(CoreError::validation("only the other side can reject a proposal")),
            }
        })
        .await?;

        self.tell_both(&pair, ServerEvent::MeetPlaceRejected { by: by.to_string() });
        Ok(())
    }

    pub async fn decline(&self, by: &str, with: &str) -> Result<()> {
        let pair = PairKey::new(by, with)?;
        self.finish(&pair, |s| {
            s.require_state(
                &[
                    MeetState::Requested,
                    MeetState::Accepted,
                    MeetState::Suggested,
                    MeetState::PlaceProposed,
                ],
                "decline",
            )?;
            s.state = MeetState::Declined;
            Ok(())
        })
        .await?;

        info!("Meet {} declined by {}", pair, by);
        self.tell_both(&pair, ServerEvent::MeetDeclined { by: by.to_string() });
        Ok(())
    }

    /// Drops sessions idle for longer than the timeout and tells both sides.
    pub async fn sweep_expired(&self) -> usize {
        let stale: Vec<PairKey> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().touched_at.elapsed() >= self.idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = 0;
        for pair in stale {
            let removed = {
                let _guard = self.locks.lock(&pair).await;
                self.sessions
                    .remove_if(&pair, |_, s| s.touched_at.elapsed() >= self.idle_timeout)
                    .is_some()
            };
            if removed {
                expired += 1;
                self.router.deliver(pair.low(), ServerEvent::MeetExpired { with: pair.high().to_string() });
                self.router.deliver(pair.high(), ServerEvent::MeetExpired { with: pair.low().to_string() });
            }
        }

        let pruned = self.locks.prune();
        if expired > 0 || pruned > 0 {
            info!("Expired {} meet session(s), pruned {} idle pair lock(s)", expired, pruned);
        }
        expired
    }

    pub fn session(&self, a: &str, b: &str) -> Result<MeetSnapshot> {
        let pair = PairKey::new(a, b)?;
        let snapshot = match self.sessions.get(&pair) {
            Some(s) => MeetSnapshot {
                room_id: pair.to_string(),
                initiator: Some(s.initiator.clone()),
                state: s.state,
                midpoint: s.midpoint,
                venues: s.venues.clone(),
                radius_meters: s.radius_meters,
                proposed_venue: s.proposal.as_ref().map(|(_, v)| v.clone()),
                can_expand: s.state == MeetState::Suggested && s.can_expand(),
            },
            None => MeetSnapshot {
                room_id: pair.to_string(),
                initiator: None,
                state: MeetState::Idle,
                midpoint: None,
                venues: Vec::new(),
                radius_meters: self.venue_radius_meters,
                proposed_venue: None,
                can_expand: false,
            },
        };
        Ok(snapshot)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryNotificationSink, MemoryRelationshipStore, MemoryUserDirectory};
    use crate::models::UserSnapshot;
    use crate::services::presence::{ConnectionHandle, InMemoryPresenceRegistry};
    use crate::services::venues::StaticVenueSearch;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        users: Arc<MemoryUserDirectory>,
        notifications: Arc<MemoryNotificationSink>,
        search: Arc<StaticVenueSearch>,
        router: Arc<SessionRouter>,
        locks: Arc<PairLocks>,
        meet: Arc<MeetNegotiator>,
    }

    async fn fixture(venues: Vec<Venue>, idle_timeout: Duration) -> Fixture {
        let users = Arc::new(MemoryUserDirectory::new());
        for id in ["alice", "bob", "carol"] {
            users.insert(UserSnapshot::new(id)).await;
        }
        let relationships = Arc::new(MemoryRelationshipStore::new());
        relationships.create_match_if_absent("alice", "bob").await.unwrap();

        let notifications = Arc::new(MemoryNotificationSink::new());
        let search = Arc::new(StaticVenueSearch::new(venues));
        let router = Arc::new(SessionRouter::new(Arc::new(InMemoryPresenceRegistry::new())));
        let locks = Arc::new(PairLocks::new());
        let meet = Arc::new(MeetNegotiator::new(
            users.clone(),
            relationships,
            search.clone(),
            notifications.clone(),
            router.clone(),
            locks.clone(),
            idle_timeout,
            2500,
        ));
        Fixture { users, notifications, search, router, locks, meet }
    }

    fn connect(f: &Fixture, user: &str) -> UnboundedReceiver<ServerEvent> {
        let (handle, rx) = ConnectionHandle::channel();
        f.router.presence().register(user, handle);
        rx
    }

    /// Everything queued, minus presence chatter
    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| !matches!(e, ServerEvent::PresenceOnline { .. } | ServerEvent::PresenceOffline { .. }))
            .collect()
    }

    fn at(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates { latitude, longitude }
    }

    fn cafe() -> Venue {
        Venue {
            name: "Halfway Cafe".to_string(),
            category: "cafe".to_string(),
            coords: at(1.0, 0.001),
            address: None,
        }
    }

    async fn suggested(f: &Fixture) {
        f.meet.request("alice", "bob", Some(at(0.0, 0.0))).await.unwrap();
        f.meet.accept("bob", "alice", Some(at(2.0, 0.0))).await.unwrap();
    }

    #[tokio::test]
    async fn test_midpoint_with_no_venues_offers_expansion() {
        let f = fixture(vec![], Duration::from_secs(600)).await;
        let mut alice = connect(&f, "alice");
        let mut bob = connect(&f, "bob");

        assert_eq!(
            f.meet.request("alice", "bob", Some(at(0.0, 0.0))).await.unwrap(),
            RequestOutcome::Delivered
        );
        assert_eq!(drain(&mut bob), vec![ServerEvent::MeetRequest { from: "alice".to_string() }]);

        f.meet.accept("bob", "alice", Some(at(2.0, 0.0))).await.unwrap();

        let expected_for_alice = vec![
            ServerEvent::MeetAccepted { from: "bob".to_string(), coords: at(2.0, 0.0) },
            ServerEvent::MeetSuggest {
                with: "bob".to_string(),
                midpoint: at(1.0, 0.0),
                venues: vec![],
                can_expand: true,
                radius_meters: 2500,
            },
        ];
        assert_eq!(drain(&mut alice), expected_for_alice);
        assert!(matches!(
            drain(&mut bob).as_slice(),
            [ServerEvent::MeetSuggest { can_expand: true, .. }]
        ));

        let snapshot = f.meet.session("alice", "bob").unwrap();
        assert_eq!(snapshot.state, MeetState::Suggested);
        assert_eq!(snapshot.midpoint, Some(at(1.0, 0.0)));
        assert!(snapshot.can_expand);
    }

    #[tokio::test]
    async fn test_full_negotiation_confirms_and_tears_down() {
        let f = fixture(vec![cafe()], Duration::from_secs(600)).await;
        let mut alice = connect(&f, "alice");
        let mut bob = connect(&f, "bob");
        suggested(&f).await;
        drain(&mut alice);
        drain(&mut bob);

        f.meet.propose_place("alice", "bob", cafe()).await.unwrap();
        assert_eq!(
            drain(&mut bob),
            vec![ServerEvent::MeetPlaceSelected { by: "alice".to_string(), venue: cafe() }]
        );

        // The proposer cannot confirm their own pick
        assert!(f.meet.accept_place("alice", "bob").await.is_err());

        let venue = f.meet.accept_place("bob", "alice").await.unwrap();
        assert_eq!(venue, cafe());
        let accepted = ServerEvent::MeetPlaceAccepted { by: "bob".to_string(), venue: cafe() };
        assert_eq!(drain(&mut alice), vec![accepted.clone()]);
        assert_eq!(drain(&mut bob), vec![accepted]);

        assert_eq!(f.meet.active_sessions(), 0);
        assert_eq!(f.meet.session("alice", "bob").unwrap().state, MeetState::Idle);
    }

    #[tokio::test]
    async fn test_rejected_place_returns_to_suggestions() {
        let f = fixture(vec![cafe()], Duration::from_secs(600)).await;
        let _alice = connect(&f, "alice");
        let _bob = connect(&f, "bob");
        suggested(&f).await;

        f.meet.propose_place("bob", "alice", cafe()).await.unwrap();
        f.meet.reject_place("alice", "bob").await.unwrap();

        let snapshot = f.meet.session("alice", "bob").unwrap();
        assert_eq!(snapshot.state, MeetState::Suggested);
        assert!(snapshot.proposed_venue.is_none());
        assert_eq!(snapshot.venues, vec![cafe()]);
    }

    #[tokio::test]
    async fn test_unknown_venue_rejected_when_suggestions_exist() {
        let f = fixture(vec![cafe()], Duration::from_secs(600)).await;
        let _alice = connect(&f, "alice");
        let _bob = connect(&f, "bob");
        suggested(&f).await;

        let mut elsewhere = cafe();
        elsewhere.name = "Somewhere Else".to_string();
        let err = f.meet.propose_place("alice", "bob", elsewhere).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn test_invalid_coordinates_change_nothing() {
        let f = fixture(vec![], Duration::from_secs(600)).await;
        let _alice = connect(&f, "alice");
        let _bob = connect(&f, "bob");
        f.meet.request("alice", "bob", Some(at(0.0, 0.0))).await.unwrap();

        assert_eq!(f.meet.accept("bob", "alice", None).await.unwrap_err().code(), "validation");
        let bad = at(f64::NAN, 0.0);
        assert_eq!(f.meet.accept("bob", "alice", Some(bad)).await.unwrap_err().code(), "validation");
        assert_eq!(f.meet.session("alice", "bob").unwrap().state, MeetState::Requested);

        let err = f.meet.request("alice", "bob", Some(at(0.0, 500.0))).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn test_offline_target_is_reported_and_notified() {
        let f = fixture(vec![], Duration::from_secs(600)).await;
        let mut alice = connect(&f, "alice");

        let outcome = f.meet.request("alice", "bob", None).await.unwrap();
        assert_eq!(outcome, RequestOutcome::TargetOffline);
        assert_eq!(drain(&mut alice), vec![ServerEvent::MeetUnavailable { to: "bob".to_string() }]);
        assert_eq!(f.meet.active_sessions(), 0);

        let stored = f.notifications.recent("bob", 10).await.unwrap();
        assert_eq!(stored[0].kind, NotificationKind::MeetRequest);
    }

    #[tokio::test]
    async fn test_unmatched_pair_cannot_meet() {
        let f = fixture(vec![], Duration::from_secs(600)).await;
        let _carol = connect(&f, "carol");
        let err = f.meet.request("alice", "carol", None).await.unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::NotMatched));
    }

    #[tokio::test]
    async fn test_initiator_location_fallbacks() {
        let f = fixture(vec![], Duration::from_secs(600)).await;
        let mut alice = connect(&f, "alice");
        let _bob = connect(&f, "bob");

        // Nothing supplied, nothing stored: ask the initiator
        f.meet.request("alice", "bob", None).await.unwrap();
        f.meet.accept("bob", "alice", Some(at(2.0, 2.0))).await.unwrap();
        let events = drain(&mut alice);
        assert_eq!(events.last(), Some(&ServerEvent::MeetLocationRequired { with: "bob".to_string() }));
        assert_eq!(f.meet.session("alice", "bob").unwrap().state, MeetState::Accepted);

        f.meet.share_location("alice", "bob", Some(at(0.0, 0.0))).await.unwrap();
        assert_eq!(f.meet.session("alice", "bob").unwrap().midpoint, Some(at(1.0, 1.0)));

        // Stored location is used when the request carries none
        let mut stored = UserSnapshot::new("alice");
        stored.location = Some(at(4.0, 4.0));
        f.users.insert(stored).await;
        f.meet.request("alice", "bob", None).await.unwrap();
        f.meet.accept("bob", "alice", Some(at(2.0, 2.0))).await.unwrap();
        let snapshot = f.meet.session("alice", "bob").unwrap();
        assert_eq!(snapshot.state, MeetState::Suggested);
        assert_eq!(snapshot.midpoint, Some(at(3.0, 3.0)));
    }

    #[tokio::test]
    async fn test_expand_doubles_radius_and_failed_search_degrades() {
        let f = fixture(vec![], Duration::from_secs(600)).await;
        let mut alice = connect(&f, "alice");
        let _bob = connect(&f, "bob");
        f.search.set_unavailable(true);
        suggested(&f).await;

        assert!(f.meet.session("alice", "bob").unwrap().can_expand);
        drain(&mut alice);

        f.search.set_unavailable(false);
        f.meet.expand("alice", "bob").await.unwrap();
        match drain(&mut alice).as_slice() {
            [ServerEvent::MeetSuggest { radius_meters, .. }] => assert_eq!(*radius_meters, 5000),
            other => panic!("unexpected events {:?}", other),
        }

        // 5000 -> 10000 -> 16000, then no further
        f.meet.expand("alice", "bob").await.unwrap();
        f.meet.expand("alice", "bob").await.unwrap();
        let snapshot = f.meet.session("alice", "bob").unwrap();
        assert_eq!(snapshot.radius_meters, MEET_MAX_VENUE_RADIUS_METERS);
        assert!(!snapshot.can_expand);
        assert!(f.meet.expand("alice", "bob").await.is_err());

        // Empty list: the midpoint itself can be proposed
        let spot = Venue {
            name: "Midpoint".to_string(),
            category: "midpoint".to_string(),
            coords: at(1.0, 0.0),
            address: None,
        };
        f.meet.propose_place("alice", "bob", spot).await.unwrap();
        assert_eq!(f.meet.session("alice", "bob").unwrap().state, MeetState::PlaceProposed);
    }

    #[tokio::test]
    async fn test_decline_from_any_state() {
        let f = fixture(vec![], Duration::from_secs(600)).await;
        let mut alice = connect(&f, "alice");
        let mut bob = connect(&f, "bob");
        f.meet.request("alice", "bob", Some(at(0.0, 0.0))).await.unwrap();
        drain(&mut bob);

        f.meet.decline("bob", "alice").await.unwrap();
        let declined = ServerEvent::MeetDeclined { by: "bob".to_string() };
        assert_eq!(drain(&mut alice), vec![declined.clone()]);
        assert_eq!(drain(&mut bob), vec![declined]);
        assert_eq!(f.meet.active_sessions(), 0);
        assert_eq!(f.meet.decline("bob", "alice").await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn test_idle_sessions_are_swept() {
        let f = fixture(vec![], Duration::ZERO).await;
        let mut alice = connect(&f, "alice");
        let mut bob = connect(&f, "bob");
        f.meet.request("alice", "bob", Some(at(0.0, 0.0))).await.unwrap();
        drain(&mut bob);

        assert_eq!(f.meet.sweep_expired().await, 1);
        assert_eq!(f.meet.active_sessions(), 0);
        assert_eq!(drain(&mut alice), vec![ServerEvent::MeetExpired { with: "bob".to_string() }]);
        assert_eq!(drain(&mut bob), vec![ServerEvent::MeetExpired { with: "alice".to_string() }]);
    }

    #[tokio::test]
    async fn test_request_queued_behind_confirmation_survives() {
        let f = fixture(vec![cafe()], Duration::from_secs(600)).await;
        let _alice = connect(&f, "alice");
        let mut bob = connect(&f, "bob");
        suggested(&f).await;
        f.meet.propose_place("alice", "bob", cafe()).await.unwrap();
        drain(&mut bob);

        let pair = PairKey::new("alice", "bob").unwrap();
        let guard = f.locks.lock(&pair).await;

        let meet = f.meet.clone();
        let confirm = tokio::spawn(async move { meet.accept_place("bob", "alice").await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let meet = f.meet.clone();
        let again = tokio::spawn(async move { meet.request("alice", "bob", Some(at(0.0, 0.0))).await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        assert_eq!(confirm.await.unwrap().unwrap(), cafe());
        assert_eq!(again.await.unwrap().unwrap(), RequestOutcome::Delivered);

        // The fresh request is still open and bob can act on it
        assert_eq!(f.meet.active_sessions(), 1);
        assert_eq!(f.meet.session("alice", "bob").unwrap().state, MeetState::Requested);
        assert!(drain(&mut bob).contains(&ServerEvent::MeetRequest { from: "alice".to_string() }));
        f.meet.accept("bob", "alice", Some(at(2.0, 0.0))).await.unwrap();
        assert_eq!(f.meet.session("alice", "bob").unwrap().state, MeetState::Suggested);
    }

    #[tokio::test]
    async fn test_decline_queued_behind_confirmation_finds_nothing() {
        let f = fixture(vec![cafe()], Duration::from_secs(600)).await;
        let mut alice = connect(&f, "alice");
        let _bob = connect(&f, "bob");
        suggested(&f).await;
        f.meet.propose_place("bob", "alice", cafe()).await.unwrap();
        drain(&mut alice);

        let pair = PairKey::new("alice", "bob").unwrap();
        let guard = f.locks.lock(&pair).await;
        let meet = f.meet.clone();
        let confirm = tokio::spawn(async move { meet.accept_place("alice", "bob").await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let meet = f.meet.clone();
        let decline = tokio::spawn(async move { meet.decline("bob", "alice").await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        confirm.await.unwrap().unwrap();
        assert_eq!(decline.await.unwrap().unwrap_err().code(), "not_found");
        let events = drain(&mut alice);
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::MeetDeclined { .. })));
    }
}
