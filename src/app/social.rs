use anyhow::Result;

use crate::domain::user::UserSummary;
use crate::infra::store::Store;

#[derive(Clone)]
pub struct SocialService {
    store: Store,
}

impl SocialService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Follows or unfollows. Returns the new state, `None` when the target
    /// does not exist. Callers reject self-follows before getting here.
    pub async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<Option<bool>> {
        self.store.toggle_follow(follower_id, following_id).await
    }

    pub async fn followers(&self, user_id: i64) -> Result<Option<Vec<UserSummary>>> {
        if self.store.find_identity(user_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.store.list_followers(user_id).await?))
    }

    pub async fn following(&self, user_id: i64) -> Result<Option<Vec<UserSummary>>> {
        if self.store.find_identity(user_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.store.list_following(user_id).await?))
    }
}
