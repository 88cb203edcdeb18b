use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{NewNotification, Notification, NotificationKind};
use super::stores::NotificationSink;

#[derive(Debug, Clone, FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: String,
    from_user_id: String,
    kind: String,
    message: String,
    href: Option<String>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_notification(self) -> Option<Notification> {
        let kind = NotificationKind::parse(&self.kind)?;
        Some(Notification {
            id: self.id,
            user_id: self.user_id,
            from_user_id: self.from_user_id,
            kind,
            message: self.message,
            href: self.href,
            read: self.read,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgNotificationSink {
    pool: PgPool,
}

impl PgNotificationSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for PgNotificationSink {
    async fn notify(&self, user_id: &str, notification: NewNotification) -> Result<Notification> {
        let stored = Notification::from_new(user_id, notification);

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, from_user_id, kind, message, href, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.user_id)
        .bind(&stored.from_user_id)
        .bind(stored.kind.as_str())
        .bind(&stored.message)
        .bind(&stored.href)
        .bind(stored.read)
        .bind(stored.created_at)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, user_id, from_user_id, kind, message, href, read, created_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // Rows written by a newer build may carry kinds this one does not know
        Ok(rows
            .into_iter()
            .filter_map(NotificationRow::into_notification)
            .collect())
    }
}
