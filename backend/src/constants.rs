// =============================================================================
// Halfway Backend Constants
// =============================================================================
// This file contains all constants used throughout the backend to enable
// easy tuning and configuration from a single location.

use once_cell::sync::Lazy;
use regex::Regex;

// =============================================================================
// DISCOVERY
// =============================================================================

/// Radius tried first when the client does not ask for one
pub const DEFAULT_DISCOVERY_RADIUS_KM: f64 = 10.0;

/// Wider radii tried in order when the pool at the requested radius is empty.
/// After the last tier the search goes global.
pub const FALLBACK_RADIUS_TIERS_KM: [f64; 3] = [25.0, 50.0, 100.0];

/// Maximum number of ranked candidates returned by one discovery call
pub const DEFAULT_DISCOVERY_LIMIT: usize = 50;

/// Upper bound on rows pulled from the user directory per discovery call
pub const MAX_CANDIDATE_SCAN: i64 = 2000;

/// Fallback coordinates when neither the request nor the profile has any (Chicago Loop)
pub const DEFAULT_LATITUDE: f64 = 41.8781;
pub const DEFAULT_LONGITUDE: f64 = -87.6298;

// =============================================================================
// HYBRID SCORE WEIGHTS
// =============================================================================

/// Proximity falls off linearly to zero at this distance
pub const PROXIMITY_CAP_KM: f64 = 100.0;

/// Proximity contributes at most `PROXIMITY_WEIGHT * SCORE_SCALE` points
pub const PROXIMITY_WEIGHT: f64 = 0.5;
pub const SCORE_SCALE: f64 = 100.0;

pub const INTENT_MATCH_BONUS: f64 = 20.0;
pub const VIBE_MATCH_BONUS: f64 = 10.0;

pub const INTEREST_OVERLAP_POINTS: f64 = 5.0;
pub const INTEREST_OVERLAP_CAP: f64 = 15.0;

pub const HOBBY_OVERLAP_POINTS: f64 = 3.0;
pub const HOBBY_OVERLAP_CAP: f64 = 9.0;

pub const ACTIVE_NOW_BONUS: f64 = 10.0;
pub const RECENTLY_ACTIVE_BONUS: f64 = 5.0;
pub const VERIFIED_BONUS: f64 = 5.0;

/// Activity buckets, in minutes since last activity
pub const ACTIVE_NOW_MINUTES: i64 = 5;
pub const RECENTLY_ACTIVE_MINUTES: i64 = 60;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const KM_PER_MILE: f64 = 1.609_344;

// =============================================================================
// RELATIONSHIPS
// =============================================================================

/// Minimum gap between two buzzes on the same matched pair
pub const BUZZ_COOLDOWN_SECS: u64 = 10;

/// Streak counts that unlock a milestone effect on the client
pub const STREAK_MILESTONES: [i64; 5] = [5, 10, 25, 50, 100];

// =============================================================================
// MEET IN THE MIDDLE
// =============================================================================

/// Sessions with no transition for this long are dropped
pub const MEET_IDLE_TIMEOUT_SECS: u64 = 600;

/// Initial venue search radius around the midpoint (~1.55 miles)
pub const MEET_VENUE_RADIUS_METERS: u32 = 2500;

/// `meet:expand` doubles the radius up to this ceiling
pub const MEET_MAX_VENUE_RADIUS_METERS: u32 = 16_000;

/// Venues kept per suggestion round
pub const MEET_MAX_VENUES: usize = 12;

/// How often the background sweeper looks for idle sessions
pub const MEET_SWEEP_INTERVAL_SECS: u64 = 30;

// =============================================================================
// VENUE SEARCH
// =============================================================================

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Venue search is a network call and must never stall a negotiation
pub const VENUE_SEARCH_TIMEOUT_SECS: u64 = 8;

// =============================================================================
// SERVER CONFIGURATION
// =============================================================================

/// Default server port if not specified in environment
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Default database pool size
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

// =============================================================================
// HELPER FUNCTIONS FOR VALIDATION
// =============================================================================

static USER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid user id regex"));

/// Validates if a string is a well-formed user id
pub fn is_valid_user_id(id: &str) -> bool {
    USER_ID_PATTERN.is_match(id)
}

/// Validates a latitude/longitude pair
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
