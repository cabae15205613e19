use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(rename = "_count")]
    pub counts: TopicCounts,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TopicCounts {
    pub posts: i64,
}

#[derive(Debug, Clone)]
pub struct NewTopic {
    pub title: String,
    pub category: String,
    pub description: String,
}
