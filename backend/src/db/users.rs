use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;

use crate::constants::MAX_CANDIDATE_SCAN;
use crate::error::{CoreError, Result};
use crate::models::{Coordinates, DiscoveryFilters, UserId, UserSnapshot, UserUpdate, VisibilityMode};
use super::stores::UserDirectory;

const USER_COLUMNS: &str = "id, name, age, gender, bio, photo_url, latitude, longitude, last_active_at, \
     interests, hobbies, intent, vibe, zodiac, love_language, visibility, verified";

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: String,
    name: Option<String>,
    age: Option<i32>,
    gender: Option<String>,
    bio: Option<String>,
    photo_url: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    last_active_at: Option<DateTime<Utc>>,
    interests: Vec<String>,
    hobbies: Vec<String>,
    intent: Option<String>,
    vibe: Option<String>,
    zodiac: Option<String>,
    love_language: Option<String>,
    visibility: String,
    verified: bool,
}

impl From<UserRow> for UserSnapshot {
    fn from(row: UserRow) -> Self {
        // A half-written or out-of-range location counts as no location
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Coordinates::new(latitude, longitude).ok(),
            _ => None,
        };

        UserSnapshot {
            id: row.id,
            name: row.name,
            age: row.age,
            gender: row.gender,
            bio: row.bio,
            photo_url: row.photo_url,
            location,
            last_active_at: row.last_active_at,
            interests: row.interests,
            hobbies: row.hobbies,
            intent: row.intent,
            vibe: row.vibe,
            zodiac: row.zodiac,
            love_language: row.love_language,
            visibility: VisibilityMode::parse(&row.visibility),
            verified: row.verified,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Structural filters in SQL, then the nearest rows first so the scan cap never
/// drops a close user in favour of a distant one.
fn candidate_query(
    filters: &DiscoveryFilters,
    exclude: &HashSet<UserId>,
    origin: Coordinates,
) -> QueryBuilder<'static, Postgres> {
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {} FROM users WHERE visibility <> 'hidden'",
        USER_COLUMNS
    ));

    if !exclude.is_empty() {
        let excluded: Vec<String> = exclude.iter().cloned().collect();
        query.push(" AND id <> ALL(").push_bind(excluded).push(")");
    }

    let text_filters = [
        ("gender", non_empty(&filters.gender)),
        ("intent", non_empty(&filters.intent)),
        ("vibe", non_empty(&filters.vibe)),
        ("zodiac", non_empty(&filters.zodiac)),
        ("love_language", non_empty(&filters.love_language)),
    ];
    for (column, value) in text_filters {
        if let Some(value) = value {
            query
                .push(format!(" AND LOWER({}) = LOWER(", column))
                .push_bind(value)
                .push(")");
        }
    }

    if filters.verified_only {
        query.push(" AND verified = TRUE");
    }

    // Equirectangular approximation, wrapping across the antimeridian
    query
        .push(" ORDER BY POWER(latitude - ")
        .push_bind(origin.latitude)
        .push(", 2) + POWER(LEAST(ABS(longitude - ")
        .push_bind(origin.longitude)
        .push("), 360 - ABS(longitude - ")
        .push_bind(origin.longitude)
        .push(")) * COS(RADIANS(")
        .push_bind(origin.latitude)
        .push(")), 2) ASC NULLS LAST, last_active_at DESC NULLS LAST LIMIT ")
        .push_bind(MAX_CANDIDATE_SCAN);

    query
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get(&self, id: &str) -> Result<Option<UserSnapshot>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserSnapshot::from))
    }

    async fn update(&self, id: &str, update: UserUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                latitude = COALESCE($2, latitude),
                longitude = COALESCE($3, longitude),
                last_active_at = COALESCE($4, last_active_at),
                visibility = COALESCE($5, visibility),
                interests = COALESCE($6, interests),
                hobbies = COALESCE($7, hobbies),
                intent = COALESCE($8, intent),
                vibe = COALESCE($9, vibe),
                verified = COALESCE($10, verified),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.location.map(|c| c.latitude))
        .bind(update.location.map(|c| c.longitude))
        .bind(update.last_active_at)
        .bind(update.visibility.map(|v| v.as_str()))
        .bind(update.interests)
        .bind(update.hobbies)
        .bind(update.intent)
        .bind(update.vibe)
        .bind(update.verified)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("user {}", id)));
        }
        Ok(())
    }

    async fn find_candidates(
        &self,
        filters: &DiscoveryFilters,
        exclude: &HashSet<UserId>,
        origin: Coordinates,
    ) -> Result<Vec<UserSnapshot>> {
        let mut query = candidate_query(filters, exclude, origin);
        let rows = query
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(UserSnapshot::from).collect())
    }
}
