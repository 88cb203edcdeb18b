use anyhow::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::models::Coordinates;

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs the service on in-memory stores
    pub database_url: Option<String>,
    pub port: u16,
    pub default_location: Coordinates,
    pub discovery_radius_km: f64,
    pub discovery_limit: usize,
    pub buzz_cooldown: Duration,
    pub meet_idle_timeout: Duration,
    pub meet_venue_radius_meters: u32,
    pub overpass_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let latitude = parse_or("DEFAULT_LATITUDE", DEFAULT_LATITUDE);
        let longitude = parse_or("DEFAULT_LONGITUDE", DEFAULT_LONGITUDE);
        let default_location = Coordinates::new(latitude, longitude)
            .map_err(|e| anyhow::anyhow!("DEFAULT_LATITUDE/DEFAULT_LONGITUDE: {}", e))?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            port: parse_or("PORT", DEFAULT_SERVER_PORT),
            default_location,
            discovery_radius_km: parse_or("DISCOVERY_RADIUS_KM", DEFAULT_DISCOVERY_RADIUS_KM),
            discovery_limit: parse_or("DISCOVERY_LIMIT", DEFAULT_DISCOVERY_LIMIT),
            buzz_cooldown: Duration::from_secs(parse_or("BUZZ_COOLDOWN_SECS", BUZZ_COOLDOWN_SECS)),
            meet_idle_timeout: Duration::from_secs(parse_or(
                "MEET_IDLE_TIMEOUT_SECS",
                MEET_IDLE_TIMEOUT_SECS,
            )),
            meet_venue_radius_meters: parse_or("MEET_VENUE_RADIUS_METERS", MEET_VENUE_RADIUS_METERS),
            overpass_url: env::var("OVERPASS_URL").unwrap_or_else(|_| DEFAULT_OVERPASS_URL.to_string()),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: DEFAULT_SERVER_PORT,
            default_location: Coordinates {
                latitude: DEFAULT_LATITUDE,
                longitude: DEFAULT_LONGITUDE,
            },
            discovery_radius_km: DEFAULT_DISCOVERY_RADIUS_KM,
            discovery_limit: DEFAULT_DISCOVERY_LIMIT,
            buzz_cooldown: Duration::from_secs(BUZZ_COOLDOWN_SECS),
            meet_idle_timeout: Duration::from_secs(MEET_IDLE_TIMEOUT_SECS),
            meet_venue_radius_meters: MEET_VENUE_RADIUS_METERS,
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
