use anyhow::Result;

use crate::domain::post::{Post, PostFilter};
use crate::domain::user::{ProfileUpdate, ProfileView, UserProfile};
use crate::infra::store::Store;

#[derive(Clone)]
pub struct UserService {
    store: Store,
}

impl UserService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        self.store.find_profile(user_id).await
    }

    pub async fn update_profile(
        &self,
        user_id: i64,
        update: ProfileUpdate,
    ) -> Result<Option<ProfileView>> {
        self.store.update_profile(user_id, update).await
    }

    /// `None` when the user does not exist.
    pub async fn list_posts(
        &self,
        user_id: i64,
        viewer_id: Option<i64>,
    ) -> Result<Option<Vec<Post>>> {
        if self.store.find_identity(user_id).await?.is_none() {
            return Ok(None);
        }
        let posts = self
            .store
            .list_posts(PostFilter::by_author(user_id), viewer_id)
            .await?;
        Ok(Some(posts))
    }
}
