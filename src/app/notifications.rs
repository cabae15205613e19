use anyhow::Result;

use crate::domain::notification::{NewNotification, Notification};
use crate::infra::store::{Cursor, Store};

#[derive(Clone)]
pub struct NotificationService {
    store: Store,
}

impl NotificationService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list(
        &self,
        user_id: i64,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        self.store.list_notifications(user_id, cursor, limit).await
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64> {
        self.store.unread_notification_count(user_id).await
    }

    pub async fn mark_read(&self, notification_id: i64, user_id: i64) -> Result<bool> {
        self.store
            .mark_notification_read(notification_id, user_id)
            .await
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        self.store.mark_all_notifications_read(user_id).await
    }

    /// Records the notification unless the actor is acting on their own content.
    /// Failures are logged and swallowed; the triggering action already happened.
    pub async fn notify(&self, notification: NewNotification) {
        if notification.recipient_id == notification.actor_id {
            return;
        }
        let kind = notification.kind.as_db();
        let recipient_id = notification.recipient_id;
        if let Err(err) = self.store.insert_notification(notification).await {
            tracing::warn!(error = ?err, kind, recipient_id, "failed to record notification");
        }
    }
}
