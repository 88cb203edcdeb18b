use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Match,
    BuzzRequest,
    Buzz,
    MeetRequest,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Match => "match",
            NotificationKind::BuzzRequest => "buzz_request",
            NotificationKind::Buzz => "buzz",
            NotificationKind::MeetRequest => "meet_request",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "match" => Some(NotificationKind::Match),
            "buzz_request" => Some(NotificationKind::BuzzRequest),
            "buzz" => Some(NotificationKind::Buzz),
            "meet_request" => Some(NotificationKind::MeetRequest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub from_user_id: UserId,
    pub kind: NotificationKind,
    pub message: String,
    pub href: Option<String>,
}

impl NewNotification {
    pub fn new(from_user_id: &str, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            from_user_id: from_user_id.to_string(),
            kind,
            message: message.into(),
            href: None,
        }
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub from_user_id: UserId,
    pub kind: NotificationKind,
    pub message: String,
    pub href: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_new(user_id: &str, new: NewNotification) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            from_user_id: new.from_user_id,
            kind: new.kind,
            message: new.message,
            href: new.href,
            read: false,
            created_at: Utc::now(),
        }
    }
}
