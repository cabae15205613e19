use anyhow::Result;

use crate::domain::post::{NewPost, Post, PostDetail, PostFilter};
use crate::infra::store::Store;

#[derive(Clone)]
pub struct PostService {
    store: Store,
}

impl PostService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// `None` when the referenced topic does not exist.
    pub async fn create_post(&self, post: NewPost) -> Result<Option<Post>> {
        if let Some(topic_id) = post.topic_id {
            if self.store.find_topic(topic_id).await?.is_none() {
                return Ok(None);
            }
        }
        let post = self.store.insert_post(post).await?;
        Ok(Some(post))
    }

    pub async fn list_posts(&self, viewer_id: Option<i64>) -> Result<Vec<Post>> {
        self.store.list_posts(PostFilter::default(), viewer_id).await
    }

    pub async fn get_post(&self, post_id: i64, viewer_id: Option<i64>) -> Result<Option<PostDetail>> {
        self.store.find_post(post_id, viewer_id).await
    }

    /// Only the author may delete; anyone else sees the same `false` as for a
    /// missing post.
    pub async fn delete_post(&self, post_id: i64, author_id: i64) -> Result<bool> {
        self.store.delete_post(post_id, author_id).await
    }
}
