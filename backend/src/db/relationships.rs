use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EdgeType, Match, MatchStreak, UserId};
use super::stores::RelationshipStore;

#[derive(Debug, Clone, FromRow)]
struct MatchRow {
    id: Uuid,
    user_low: String,
    user_high: String,
    created_at: DateTime<Utc>,
}

impl From<MatchRow> for Match {
    fn from(row: MatchRow) -> Self {
        Match {
            id: row.id,
            users: [row.user_low, row.user_high],
            created_at: row.created_at,
        }
    }
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Debug, Clone)]
pub struct PgRelationshipStore {
    pool: PgPool,
}

impl PgRelationshipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelationshipStore for PgRelationshipStore {
    async fn edge_exists(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM relationship_edges WHERE from_user_id = $1 AND to_user_id = $2 AND edge_type = $3)",
        )
        .bind(from)
        .bind(to)
        .bind(edge_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO relationship_edges (from_user_id, to_user_id, edge_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (from_user_id, to_user_id, edge_type) DO NOTHING
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(edge_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM relationship_edges WHERE from_user_id = $1 AND to_user_id = $2 AND edge_type = $3",
        )
        .bind(from)
        .bind(to)
        .bind(edge_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool> {
        let blocked = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM relationship_edges
                WHERE edge_type = 'block'
                AND ((from_user_id = $1 AND to_user_id = $2) OR (from_user_id = $2 AND to_user_id = $1))
            )
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;

        Ok(blocked)
    }

    async fn liked_by(&self, user_id: &str) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT to_user_id FROM relationship_edges WHERE from_user_id = $1 AND edge_type = 'like'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn blocked_with(&self, user_id: &str) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT CASE WHEN from_user_id = $1 THEN to_user_id ELSE from_user_id END
            FROM relationship_edges
            WHERE edge_type = 'block' AND (from_user_id = $1 OR to_user_id = $1)
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn find_match(&self, a: &str, b: &str) -> Result<Option<Match>> {
        let (low, high) = ordered(a, b);
        let row = sqlx::query_as::<_, MatchRow>(
            "SELECT id, user_low, user_high, created_at FROM matches WHERE user_low = $1 AND user_high = $2",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Match::from))
    }

    async fn create_match_if_absent(&self, a: &str, b: &str) -> Result<Option<Match>> {
        let (low, high) = ordered(a, b);
        let mut tx = self.pool.begin().await?;

        // The unique (user_low, user_high) index turns a concurrent duplicate into a no-op
        let created = sqlx::query_as::<_, MatchRow>(
            r#"
            INSERT INTO matches (id, user_low, user_high)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_low, user_high) DO NOTHING
            RETURNING id, user_low, user_high, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(low)
        .bind(high)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM relationship_edges
            WHERE edge_type = 'like'
            AND ((from_user_id = $1 AND to_user_id = $2) OR (from_user_id = $2 AND to_user_id = $1))
            "#,
        )
        .bind(low)
        .bind(high)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(created.map(Match::from))
    }

    async fn delete_match(&self, a: &str, b: &str) -> Result<bool> {
        let (low, high) = ordered(a, b);
        let result = sqlx::query("DELETE FROM matches WHERE user_low = $1 AND user_high = $2")
            .bind(low)
            .bind(high)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_streak(&self, from: &str, to: &str, at: DateTime<Utc>) -> Result<MatchStreak> {
        let streak = sqlx::query_as::<_, MatchStreak>(
            r#"
            INSERT INTO match_streaks (from_user_id, to_user_id, count, last_buzz_at)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (from_user_id, to_user_id) DO UPDATE SET
                count = match_streaks.count + 1,
                last_buzz_at = EXCLUDED.last_buzz_at
            RETURNING from_user_id, to_user_id, count, last_buzz_at
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;

        Ok(streak)
    }

    async fn get_streak(&self, from: &str, to: &str) -> Result<Option<MatchStreak>> {
        let streak = sqlx::query_as::<_, MatchStreak>(
            "SELECT from_user_id, to_user_id, count, last_buzz_at FROM match_streaks WHERE from_user_id = $1 AND to_user_id = $2",
        )
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(streak)
    }

    async fn delete_streaks(&self, a: &str, b: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM match_streaks
            WHERE (from_user_id = $1 AND to_user_id = $2) OR (from_user_id = $2 AND to_user_id = $1)
            "#,
        )
        .bind(a)
        .bind(b)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
