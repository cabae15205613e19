use anyhow::Result;

use crate::app::notifications::NotificationService;
use crate::domain::engagement::Comment;
use crate::domain::notification::NewNotification;
use crate::infra::store::Store;

#[derive(Clone)]
pub struct EngagementService {
    store: Store,
}

impl EngagementService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Likes or unlikes. Returns the new state, `None` when the post does not exist.
    pub async fn toggle_like(&self, user_id: i64, post_id: i64) -> Result<Option<bool>> {
        self.store.toggle_like(user_id, post_id).await
    }

    pub async fn comment(
        &self,
        author_id: i64,
        post_id: i64,
        content: String,
    ) -> Result<Option<Comment>> {
        let comment = match self.store.insert_comment(author_id, post_id, content).await? {
            Some(comment) => comment,
            None => return Ok(None),
        };

        if let Some(post_author) = self.store.post_author(post_id).await? {
            NotificationService::new(self.store.clone())
                .notify(NewNotification::comment(
                    post_author,
                    author_id,
                    post_id,
                    comment.id,
                ))
                .await;
        }

        Ok(Some(comment))
    }
}
