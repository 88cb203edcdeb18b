use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Like,
    Block,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Like => "like",
            EdgeType::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    /// Sorted, distinct
    pub users: [UserId; 2],
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            id: Uuid::new_v4(),
            users: [low.to_string(), high.to_string()],
            created_at: Utc::now(),
        }
    }
}

/// Directional buzz counter between two matched users
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchStreak {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub count: i64,
    pub last_buzz_at: DateTime<Utc>,
}
