//! Venue lookup around a meeting midpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error};

use crate::constants::*;
use crate::error::{CoreError, Result};
use crate::models::{Coordinates, Venue};

#[async_trait]
pub trait VenueSearch: Send + Sync {
    /// Named venues within `radius_meters` of `center`. An empty list is a
    /// valid answer; an unreachable provider is an `UpstreamUnavailable` error.
    async fn find_venues(&self, center: Coordinates, radius_meters: u32) -> Result<Vec<Venue>>;
}

// =============================================================================
// OVERPASS (OpenStreetMap)
// =============================================================================

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    lat: Option<f64>,
    lon: Option<f64>,
    /// Ways and relations carry a computed center instead of lat/lon
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl OverpassElement {
    fn into_venue(self) -> Option<Venue> {
        let name = self.tags.get("name")?.trim().to_string();
        if name.is_empty() {
            return None;
        }

        let (latitude, longitude) = match (self.lat, self.lon, &self.center) {
            (Some(lat), Some(lon), _) => (lat, lon),
            (_, _, Some(c)) => (c.lat, c.lon),
            _ => return None,
        };
        let coords = Coordinates::new(latitude, longitude).ok()?;

        let category = self
            .tags
            .get("amenity")
            .or_else(|| self.tags.get("leisure"))
            .cloned()
            .unwrap_or_else(|| "venue".to_string());

        let address = match (self.tags.get("addr:housenumber"), self.tags.get("addr:street")) {
            (Some(number), Some(street)) => Some(format!("{} {}", number, street)),
            (None, Some(street)) => Some(street.clone()),
            _ => None,
        };

        Some(Venue { name, category, coords, address })
    }
}

#[derive(Debug, Clone)]
pub struct OverpassVenueSearch {
    client: Client,
    base_url: String,
}

impl OverpassVenueSearch {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(VENUE_SEARCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn build_query(center: Coordinates, radius_meters: u32) -> String {
        let around = format!("(around:{},{},{})", radius_meters, center.latitude, center.longitude);
        format!(
            "[out:json][timeout:{timeout}];(\
             nwr[\"amenity\"~\"^(cafe|restaurant|bar|cinema)$\"][\"name\"]{around};\
             nwr[\"leisure\"=\"park\"][\"name\"]{around};\
             );out center {limit};",
            timeout = VENUE_SEARCH_TIMEOUT_SECS,
            around = around,
            limit = MEET_MAX_VENUES * 2,
        )
    }
}

#[async_trait]
impl VenueSearch for OverpassVenueSearch {
    async fn find_venues(&self, center: Coordinates, radius_meters: u32) -> Result<Vec<Venue>> {
        let query = Self::build_query(center, radius_meters);
        let response = self
            .client
            .post(&self.base_url)
            .form(&[("data", query)])
            .send()
            .await
            .map_err(|e| {
                error!("Venue search request failed: {}", e);
                CoreError::UpstreamUnavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            error!("Venue search returned error status: {}", response.status());
            return Err(CoreError::UpstreamUnavailable(format!(
                "venue provider returned {}",
                response.status()
            )));
        }

        let body: OverpassResponse = response
            .json()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(format!("bad venue response: {}", e)))?;

        let venues = dedupe(body.elements.into_iter().filter_map(OverpassElement::into_venue));
        debug!(
            "Found {} venue(s) within {}m of ({}, {})",
            venues.len(),
            radius_meters,
            center.latitude,
            center.longitude
        );
        Ok(venues)
    }
}

fn dedupe(venues: impl Iterator<Item = Venue>) -> Vec<Venue> {
    let mut unique: Vec<Venue> = Vec::new();
    for venue in venues {
        if !unique.iter().any(|v| v.same_place(&venue)) {
            unique.push(venue);
        }
        if unique.len() == MEET_MAX_VENUES {
            break;
        }
    }
    unique
}

// =============================================================================
// FIXED LIST (tests, offline runs)
// =============================================================================

/// Returns a fixed list, or fails every call when set to unavailable.
#[derive(Debug, Default)]
pub struct StaticVenueSearch {
    venues: Vec<Venue>,
    unavailable: AtomicBool,
}

impl StaticVenueSearch {
    pub fn new(venues: Vec<Venue>) -> Self {
        Self {
            venues,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl VenueSearch for StaticVenueSearch {
    async fn find_venues(&self, _center: Coordinates, _radius_meters: u32) -> Result<Vec<Venue>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::UpstreamUnavailable("venue search disabled".to_string()));
        }
        Ok(self.venues.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_overpass_elements() {
        let raw = json!({
            "elements": [
                {"type": "node", "lat": 41.88, "lon": -87.63,
                 "tags": {"name": "Intelligentsia", "amenity": "cafe",
                          "addr:housenumber": "53", "addr:street": "E Randolph St"}},
                {"type": "way", "center": {"lat": 41.87, "lon": -87.62},
                 "tags": {"name": "Grant Park", "leisure": "park"}},
                {"type": "node", "lat": 41.0, "lon": -87.0, "tags": {"amenity": "cafe"}},
                {"type": "node", "lat": 41.88, "lon": -87.63,
                 "tags": {"name": "Intelligentsia", "amenity": "cafe"}}
            ]
        });
        let body: OverpassResponse = serde_json::from_value(raw).unwrap();
        let venues = dedupe(body.elements.into_iter().filter_map(OverpassElement::into_venue));

        assert_eq!(venues.len(), 2);
        assert_eq!(venues[0].category, "cafe");
        assert_eq!(venues[0].address.as_deref(), Some("53 E Randolph St"));
        assert_eq!(venues[1].name, "Grant Park");
        assert_eq!(venues[1].category, "park");
    }

    #[test]
    fn test_query_mentions_radius_and_center() {
        let query = OverpassVenueSearch::build_query(Coordinates { latitude: 1.5, longitude: -2.0 }, 2500);
        assert!(query.contains("(around:2500,1.5,-2)"));
        assert!(query.starts_with("[out:json]"));
    }

    #[tokio::test]
    async fn test_static_search_can_fail() {
        let search = StaticVenueSearch::new(vec![]);
        let center = Coordinates { latitude: 0.0, longitude: 0.0 };
        assert!(search.find_venues(center, 100).await.unwrap().is_empty());

        search.set_unavailable(true);
        let err = search.find_venues(center, 100).await.unwrap_err();
        assert_eq!(err.code(), "upstream_unavailable");
    }
}
