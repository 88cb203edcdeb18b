use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::is_valid_coordinate;
use crate::error::{CoreError, Result};
use super::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
}

impl Coordinates {
    /// Rejects NaN, infinities and out-of-range values instead of clamping them.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !is_valid_coordinate(latitude, longitude) {
            return Err(CoreError::validation(format!(
                "invalid coordinates ({}, {})",
                latitude, longitude
            )));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn validated(self) -> Result<Self> {
        Self::new(self.latitude, self.longitude)
    }

    pub fn is_valid(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    #[default]
    Auto,
    Limited,
    Full,
    Hidden,
}

impl VisibilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityMode::Auto => "auto",
            VisibilityMode::Limited => "limited",
            VisibilityMode::Full => "full",
            VisibilityMode::Hidden => "hidden",
        }
    }

    /// Unknown values are treated as `auto`
    pub fn parse(raw: &str) -> Self {
        match raw {
            "limited" => VisibilityMode::Limited,
            "full" => VisibilityMode::Full,
            "hidden" => VisibilityMode::Hidden,
            _ => VisibilityMode::Auto,
        }
    }
}

/// A user record as read from the user directory. The core never deletes one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub location: Option<Coordinates>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub interests: Vec<String>,
    pub hobbies: Vec<String>,
    pub intent: Option<String>,
    pub vibe: Option<String>,
    pub zodiac: Option<String>,
    pub love_language: Option<String>,
    pub visibility: VisibilityMode,
    pub verified: bool,
}

impl UserSnapshot {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn is_discoverable(&self) -> bool {
        self.visibility != VisibilityMode::Hidden
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub location: Option<Coordinates>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub visibility: Option<VisibilityMode>,
    pub interests: Option<Vec<String>>,
    pub hobbies: Option<Vec<String>>,
    pub intent: Option<String>,
    pub vibe: Option<String>,
    pub verified: Option<bool>,
}

impl UserUpdate {
    pub fn apply_to(&self, user: &mut UserSnapshot) {
        if let Some(location) = self.location {
            user.location = Some(location);
        }
        if let Some(at) = self.last_active_at {
            user.last_active_at = Some(at);
        }
        if let Some(visibility) = self.visibility {
            user.visibility = visibility;
        }
        if let Some(interests) = &self.interests {
            user.interests = interests.clone();
        }
        if let Some(hobbies) = &self.hobbies {
            user.hobbies = hobbies.clone();
        }
        if let Some(intent) = &self.intent {
            user.intent = Some(intent.clone());
        }
        if let Some(vibe) = &self.vibe {
            user.vibe = Some(vibe.clone());
        }
        if let Some(verified) = self.verified {
            user.verified = verified;
        }
    }
}

/// Structural filters applied by the user directory before any geo work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryFilters {
    pub gender: Option<String>,
    pub intent: Option<String>,
    pub vibe: Option<String>,
    #[serde(default)]
    pub verified_only: bool,
    pub zodiac: Option<String>,
    pub love_language: Option<String>,
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}

impl DiscoveryFilters {
    /// Case-insensitive structural match. Visibility and exclusions are handled separately.
    pub fn matches(&self, user: &UserSnapshot) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            match filter.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
                None => true,
                Some(f) => value.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(f)),
            }
        }

        eq(&self.gender, &user.gender)
            && eq(&self.intent, &user.intent)
            && eq(&self.vibe, &user.vibe)
            && eq(&self.zodiac, &user.zodiac)
            && eq(&self.love_language, &user.love_language)
            && (!self.verified_only || user.verified)
    }
}
