//! Pure geo and ranking functions: haversine distance, radius-fallback pooling
//! and the hybrid candidate score.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::constants::*;
use crate::models::{Coordinates, UserSnapshot};

/// Great-circle distance in kilometres
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Arithmetic mean of the two coordinate pairs
pub fn midpoint(a: Coordinates, b: Coordinates) -> Coordinates {
    Coordinates {
        latitude: (a.latitude + b.latitude) / 2.0,
        longitude: (a.longitude + b.longitude) / 2.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RadiusTier {
    Km(f64),
    Global,
}

impl RadiusTier {
    pub fn km(&self) -> Option<f64> {
        match self {
            RadiusTier::Km(km) => Some(*km),
            RadiusTier::Global => None,
        }
    }

    fn admits(&self, distance_km: Option<f64>) -> bool {
        match (self, distance_km) {
            (RadiusTier::Global, _) => true,
            (RadiusTier::Km(limit), Some(d)) => d <= *limit,
            (RadiusTier::Km(_), None) => false,
        }
    }
}

/// The requested radius, then every configured tier wider than it, then global.
pub fn radius_tiers(requested_km: f64) -> Vec<RadiusTier> {
    let requested = if requested_km.is_finite() && requested_km > 0.0 {
        requested_km
    } else {
        DEFAULT_DISCOVERY_RADIUS_KM
    };

    let mut tiers = vec![RadiusTier::Km(requested)];
    tiers.extend(
        FALLBACK_RADIUS_TIERS_KM
            .iter()
            .copied()
            .filter(|km| *km > requested)
            .map(RadiusTier::Km),
    );
    tiers.push(RadiusTier::Global);
    tiers
}

/// Keeps the candidates inside the first non-empty tier. Candidates without a
/// distance only ever show up in the global tier.
pub fn pool_with_fallback<T>(
    candidates: Vec<(T, Option<f64>)>,
    requested_km: f64,
) -> (RadiusTier, Vec<(T, Option<f64>)>) {
    let tiers = radius_tiers(requested_km);
    let tier = tiers
        .iter()
        .copied()
        .find(|tier| candidates.iter().any(|(_, d)| tier.admits(*d)))
        .unwrap_or(RadiusTier::Global);

    let pool = candidates
        .into_iter()
        .filter(|(_, d)| tier.admits(*d))
        .collect();
    (tier, pool)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityBucket {
    Active,
    Recent,
    Idle,
}

impl ActivityBucket {
    pub fn classify(last_active_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(at) = last_active_at else {
            return ActivityBucket::Idle;
        };
        let minutes = (now - at).num_minutes();
        if minutes < ACTIVE_NOW_MINUTES {
            ActivityBucket::Active
        } else if minutes < RECENTLY_ACTIVE_MINUTES {
            ActivityBucket::Recent
        } else {
            ActivityBucket::Idle
        }
    }

    pub fn bonus(&self) -> f64 {
        match self {
            ActivityBucket::Active => ACTIVE_NOW_BONUS,
            ActivityBucket::Recent => RECENTLY_ACTIVE_BONUS,
            ActivityBucket::Idle => 0.0,
        }
    }
}

fn overlap(a: &[String], b: &[String]) -> usize {
    let left: HashSet<String> = a.iter().map(|s| s.trim().to_lowercase()).collect();
    b.iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect::<HashSet<_>>()
        .intersection(&left)
        .count()
}

fn same_text(a: &Option<String>, b: &Option<String>) -> bool {
    match (a.as_deref(), b.as_deref()) {
        (Some(a), Some(b)) => !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Linear falloff from 1.0 at zero distance to 0.0 at `PROXIMITY_CAP_KM`
pub fn proximity(distance_km: Option<f64>) -> f64 {
    match distance_km {
        Some(d) => (1.0 - d / PROXIMITY_CAP_KM).clamp(0.0, 1.0),
        None => 0.0,
    }
}

pub fn hybrid_score(
    requester: &UserSnapshot,
    candidate: &UserSnapshot,
    distance_km: Option<f64>,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = proximity(distance_km) * PROXIMITY_WEIGHT * SCORE_SCALE;

    if same_text(&requester.intent, &candidate.intent) {
        score += INTENT_MATCH_BONUS;
    }
    if same_text(&requester.vibe, &candidate.vibe) {
        score += VIBE_MATCH_BONUS;
    }

    let interests = overlap(&requester.interests, &candidate.interests) as f64;
    score += (interests * INTEREST_OVERLAP_POINTS).min(INTEREST_OVERLAP_CAP);

    let hobbies = overlap(&requester.hobbies, &candidate.hobbies) as f64;
    score += (hobbies * HOBBY_OVERLAP_POINTS).min(HOBBY_OVERLAP_CAP);

    score += ActivityBucket::classify(candidate.last_active_at, now).bonus();

    if candidate.verified {
        score += VERIFIED_BONUS;
    }

    score
}

/// Whole miles, never below one: "1 mile", "12 miles"
pub fn distance_label(distance_km: f64) -> String {
    let miles = (distance_km / KM_PER_MILE).round().max(1.0) as u64;
    if miles == 1 {
        "1 mile".to_string()
    } else {
        format!("{} miles", miles)
    }
}
