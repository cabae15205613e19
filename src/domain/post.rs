use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::engagement::Comment;
use crate::domain::user::UserSummary;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub content: String,
    pub image: Option<String>,
    pub author_id: i64,
    pub topic_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author: UserSummary,
    #[serde(rename = "_count")]
    pub counts: PostCounts,
    /// Whether the requesting user likes this post; false for anonymous reads.
    pub liked: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PostCounts {
    pub comments: i64,
    pub likes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: i64,
    pub content: String,
    pub image: Option<String>,
    pub topic_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostFilter {
    pub author_id: Option<i64>,
    pub topic_id: Option<i64>,
}

impl PostFilter {
    pub fn by_author(author_id: i64) -> Self {
        Self {
            author_id: Some(author_id),
            topic_id: None,
        }
    }

    pub fn by_topic(topic_id: i64) -> Self {
        Self {
            author_id: None,
            topic_id: Some(topic_id),
        }
    }

    pub fn matches(&self, author_id: i64, topic_id: Option<i64>) -> bool {
        self.author_id.map_or(true, |id| id == author_id)
            && self.topic_id.map_or(true, |id| Some(id) == topic_id)
    }
}
