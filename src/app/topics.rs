use anyhow::Result;

use crate::domain::post::{Post, PostFilter};
use crate::domain::topic::{NewTopic, Topic};
use crate::infra::store::Store;

#[derive(Clone)]
pub struct TopicService {
    store: Store,
}

impl TopicService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list_topics(&self, category: Option<String>) -> Result<Vec<Topic>> {
        self.store.list_topics(category).await
    }

    /// Duplicate titles surface as a `UniqueViolation` inside the error.
    pub async fn create_topic(&self, topic: NewTopic) -> Result<Topic> {
        self.store.insert_topic(topic).await
    }

    pub async fn get_topic(&self, topic_id: i64) -> Result<Option<Topic>> {
        self.store.find_topic(topic_id).await
    }

    pub async fn list_posts(
        &self,
        topic_id: i64,
        viewer_id: Option<i64>,
    ) -> Result<Option<Vec<Post>>> {
        if self.store.find_topic(topic_id).await?.is_none() {
            return Ok(None);
        }
        let posts = self
            .store
            .list_posts(PostFilter::by_topic(topic_id), viewer_id)
            .await?;
        Ok(Some(posts))
    }
}
