use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::db::NotificationSink;
use crate::error::Result;
use crate::models::{NewNotification, Notification, ServerEvent};
use super::router::{Delivery, SessionRouter};

/// Stores through the inner sink, then pushes the stored record to the
/// recipient's live connection when there is one.
pub struct LiveNotifier {
    store: Arc<dyn NotificationSink>,
    router: Arc<SessionRouter>,
}

impl LiveNotifier {
    pub fn new(store: Arc<dyn NotificationSink>, router: Arc<SessionRouter>) -> Self {
        Self { store, router }
    }
}

#[async_trait]
impl NotificationSink for LiveNotifier {
    async fn notify(&self, user_id: &str, notification: NewNotification) -> Result<Notification> {
        let stored = self.store.notify(user_id, notification).await?;
        if self.router.deliver(user_id, ServerEvent::Notification(stored.clone()))
            == Delivery::RecipientOffline
        {
            debug!("Notification {} kept for offline user {}", stored.id, user_id);
        }
        Ok(stored)
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        self.store.recent(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryNotificationSink;
    use crate::models::NotificationKind;
    use crate::services::presence::{ConnectionHandle, InMemoryPresenceRegistry};

    #[tokio::test]
    async fn test_notification_is_stored_and_pushed() {
        let router = Arc::new(SessionRouter::new(Arc::new(InMemoryPresenceRegistry::new())));
        let notifier = LiveNotifier::new(Arc::new(MemoryNotificationSink::new()), router.clone());

        let (bob, mut bob_rx) = ConnectionHandle::channel();
        router.presence().register("bob", bob);

        let stored = notifier
            .notify("bob", NewNotification::new("alice", NotificationKind::Match, "It's a match!"))
            .await
            .unwrap();

        assert_eq!(bob_rx.try_recv().unwrap(), ServerEvent::Notification(stored.clone()));
        assert_eq!(notifier.recent("bob", 10).await.unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn test_offline_recipient_still_stored() {
        let router = Arc::new(SessionRouter::new(Arc::new(InMemoryPresenceRegistry::new())));
        let notifier = LiveNotifier::new(Arc::new(MemoryNotificationSink::new()), router);

        notifier
            .notify("bob", NewNotification::new("alice", NotificationKind::BuzzRequest, "Someone likes you"))
            .await
            .unwrap();
        assert_eq!(notifier.recent("bob", 10).await.unwrap().len(), 1);
    }
}
